use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ChatApiConfig;
use crate::credentials::CredentialProvider;
use crate::error::{parse_error_message, ChatApiError};
use crate::headers::{build_headers, HeaderContext, ACCEPT_JSON, ACCEPT_STREAM};
use crate::payload::{
    status_is_online, ChatCompletionRequest, CreatedSession, LoginResponse, MessageRecord,
    MessagesEnvelope, Profile, SessionRecord, SessionsEnvelope,
};
use crate::retry::is_retryable_http_error;
use crate::stream::{await_or_cancel, ByteStream, CancellationSignal};
use crate::url::endpoint_url;

pub const PATH_PROFILE: &str = "/account/profile";
pub const PATH_SESSIONS: &str = "/sessions";
pub const PATH_CHAT_COMPLETIONS: &str = "/v1/chat/completions";
pub const PATH_LOGIN: &str = "/auth/login";
pub const PATH_LOGOUT: [&str; 2] = ["/auth/logout", "/logout"];
pub const PATH_STATUS: &str = "/status";
pub const PATH_ADMIN_PROBE: &str = "/admin/tickets?limit=1";

/// Notified when a user-scoped request fails with 401/403.
///
/// Hosts use this to route back to their login surface.
pub trait AuthObserver: Send + Sync {
    fn on_auth_lost(&self, status: StatusCode);
}

/// Body shape the caller is prepared to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Json,
    Stream,
}

#[derive(Debug, Clone)]
pub struct RequestOptions<'a> {
    pub method: Method,
    pub body: Option<Value>,
    pub accept: Accept,
    pub session_id: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
}

impl<'a> RequestOptions<'a> {
    #[must_use]
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            accept: Accept::Json,
            session_id: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get()
        }
    }

    #[must_use]
    pub fn with_accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<&'a str>) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<&'a str>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

pub enum ResponseBody {
    Json(Value),
    Text(String),
    Stream(ByteStream),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: ResponseBody,
}

impl TransportResponse {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Turns a non-2xx response into [`ChatApiError::Status`].
    pub fn error_for_status(self) -> Result<Self, ChatApiError> {
        if self.ok() {
            return Ok(self);
        }

        let raw = match &self.body {
            ResponseBody::Json(value) => value.to_string(),
            ResponseBody::Text(text) => text.clone(),
            ResponseBody::Stream(_) => String::new(),
        };
        Err(ChatApiError::Status(
            self.status,
            parse_error_message(self.status, &raw),
        ))
    }

    pub fn into_json(self) -> Result<Value, ChatApiError> {
        match self.body {
            ResponseBody::Json(value) => Ok(value),
            ResponseBody::Text(text) => Err(ChatApiError::Protocol(format!(
                "expected a JSON body, got: {}",
                text.chars().take(200).collect::<String>()
            ))),
            ResponseBody::Stream(_) => Err(ChatApiError::Protocol(
                "expected a JSON body, got an open stream".to_string(),
            )),
        }
    }
}

/// What `POST /v1/chat/completions` answered with.
pub enum ChatResponse {
    Stream(ByteStream),
    /// Non-stream fallback: a single completion document.
    Completion(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAccess {
    Granted,
    Denied,
}

pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
    credentials: Arc<dyn CredentialProvider>,
    auth_observer: Option<Arc<dyn AuthObserver>>,
}

impl std::fmt::Debug for ChatApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChatApiClient {
    pub fn new(
        config: ChatApiConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ChatApiError> {
        endpoint_url(&config.base_url, "/")?;
        let http = Client::builder().build().map_err(ChatApiError::from)?;
        Ok(Self {
            http,
            config,
            credentials,
            auth_observer: None,
        })
    }

    #[must_use]
    pub fn with_auth_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.auth_observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn build_headers(&self, options: &RequestOptions<'_>) -> Result<HeaderMap, ChatApiError> {
        let context = HeaderContext {
            session_id: options.session_id,
            correlation_id: options.correlation_id,
            accept: Some(match options.accept {
                Accept::Json => ACCEPT_JSON,
                Accept::Stream => ACCEPT_STREAM,
            }),
            has_body: options.body.is_some(),
        };

        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config, self.credentials.as_ref(), context) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        path: &str,
        options: &RequestOptions<'_>,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        let url = endpoint_url(&self.config.base_url, path)?;
        let mut builder = self
            .http
            .request(options.method.clone(), url)
            .headers(self.build_headers(options)?);

        if let Some(body) = &options.body {
            builder = builder.json(body);
        }
        // A whole-request timeout would also bound the body read, so streams only get
        // the idle timeout applied by the read loop.
        if options.accept == Accept::Json {
            if let Some(timeout) = self.config.timeout {
                builder = builder.timeout(timeout);
            }
        }

        Ok(builder)
    }

    /// Transport primitive: one request, status classification, no retries.
    ///
    /// 401/403 never come back as a response. `/admin` paths yield
    /// [`ChatApiError::AdminDenied`]; every other path clears the stored credentials,
    /// notifies the [`AuthObserver`] and yields [`ChatApiError::Unauthorized`].
    pub async fn send(
        &self,
        path: &str,
        options: RequestOptions<'_>,
        cancel: Option<&CancellationSignal>,
    ) -> Result<TransportResponse, ChatApiError> {
        let request = self.build_request(path, &options)?;
        let response = await_or_cancel(request.send(), cancel).await??;
        let status = response.status();
        debug!(method = %options.method, path, status = status.as_u16(), "backend response");

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(self.auth_failure(path, status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let is_json = content_type.as_deref().is_some_and(is_json_content_type);

        let body = if options.accept == Accept::Stream && status.is_success() && !is_json {
            ResponseBody::Stream(into_byte_stream(response))
        } else {
            let text = await_or_cancel(response.text(), cancel).await??;
            decode_text_body(text, is_json, path)
        };

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }

    pub async fn profile(&self) -> Result<Profile, ChatApiError> {
        decode(self.get_json(PATH_PROFILE).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError> {
        let envelope: SessionsEnvelope = decode(self.get_json(PATH_SESSIONS).await?)?;
        Ok(envelope.sessions)
    }

    /// Creates a session and returns its server-assigned id.
    pub async fn create_session(&self, name: &str) -> Result<String, ChatApiError> {
        let created: CreatedSession =
            decode(self.post_json(PATH_SESSIONS, json!({ "name": name })).await?)?;
        created
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ChatApiError::Protocol("create session response carried no session id".to_string())
            })
    }

    pub async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<MessageRecord>, ChatApiError> {
        let session_id = validate_path_segment(session_id)?;
        let envelope: MessagesEnvelope =
            decode(self.get_json(&format!("/share/{session_id}")).await?)?;
        Ok(envelope.messages)
    }

    /// Exchanges a username/password for a bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ChatApiError> {
        let response: LoginResponse = decode(
            self.post_json(
                PATH_LOGIN,
                json!({ "username": username, "password": password }),
            )
            .await?,
        )?;
        response
            .token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ChatApiError::Protocol("login response carried no token".to_string()))
    }

    /// Best-effort server logout; failures are logged and ignored.
    pub async fn logout(&self) {
        for path in PATH_LOGOUT {
            if let Err(error) = self
                .send(path, RequestOptions::post(json!({})), None)
                .await
                .and_then(TransportResponse::error_for_status)
            {
                debug!(path, %error, "logout endpoint failed");
            }
        }
        self.credentials.clear();
        info!("signed out");
    }

    pub async fn status(&self) -> Result<bool, ChatApiError> {
        let value = self
            .send(PATH_STATUS, RequestOptions::get(), None)
            .await?
            .error_for_status()?
            .into_json()?;
        Ok(status_is_online(&value))
    }

    /// Checks admin access without risking a logout.
    pub async fn probe_admin_access(&self) -> Result<AdminAccess, ChatApiError> {
        match self
            .send(PATH_ADMIN_PROBE, RequestOptions::get(), None)
            .await
            .and_then(TransportResponse::error_for_status)
        {
            Ok(_) => Ok(AdminAccess::Granted),
            Err(ChatApiError::AdminDenied { .. }) => Ok(AdminAccess::Denied),
            Err(error) => Err(error),
        }
    }

    /// Issues a chat completion and hands back the unread body.
    pub async fn open_chat(
        &self,
        request: &ChatCompletionRequest,
        session_id: Option<&str>,
        correlation_id: Option<&str>,
        cancel: Option<&CancellationSignal>,
    ) -> Result<ChatResponse, ChatApiError> {
        let options = RequestOptions::post(serde_json::to_value(request)?)
            .with_accept(Accept::Stream)
            .with_session_id(session_id)
            .with_correlation_id(correlation_id);

        let response = self
            .send(PATH_CHAT_COMPLETIONS, options, cancel)
            .await?
            .error_for_status()?;

        match response.body {
            ResponseBody::Stream(body) => Ok(ChatResponse::Stream(body)),
            ResponseBody::Json(value) => Ok(ChatResponse::Completion(value)),
            ResponseBody::Text(_) => Err(ChatApiError::Protocol(
                "completion response was not valid JSON".to_string(),
            )),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, ChatApiError> {
        let policy = self.config.retry;
        let mut attempt = 0u32;

        loop {
            let result = self
                .send(path, RequestOptions::get(), None)
                .await
                .and_then(TransportResponse::error_for_status)
                .and_then(TransportResponse::into_json);

            match result {
                Ok(value) => return Ok(value),
                Err(error) if attempt < policy.max_retries && is_retryable(&error) => {
                    let delay = policy.delay_for(attempt);
                    warn!(path, attempt, ?delay, %error, "retrying backend request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, ChatApiError> {
        self.send(path, RequestOptions::post(body), None)
            .await?
            .error_for_status()?
            .into_json()
    }

    fn auth_failure(&self, path: &str, status: StatusCode) -> ChatApiError {
        if is_admin_path(path) {
            warn!(path, status = status.as_u16(), "admin endpoint denied");
            return ChatApiError::AdminDenied { status };
        }

        warn!(path, status = status.as_u16(), "authentication lost, clearing credentials");
        self.credentials.clear();
        if let Some(observer) = &self.auth_observer {
            observer.on_auth_lost(status);
        }
        ChatApiError::Unauthorized { status }
    }
}

fn into_byte_stream(response: Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(ChatApiError::from)
        })
        .boxed()
}

fn decode_text_body(text: String, is_json: bool, path: &str) -> ResponseBody {
    if text.trim().is_empty() {
        return ResponseBody::Json(Value::Null);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => ResponseBody::Json(value),
        Err(error) => {
            if is_json {
                warn!(path, %error, "failed to parse JSON body");
            }
            ResponseBody::Text(text)
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ChatApiError> {
    serde_json::from_value(value).map_err(ChatApiError::from)
}

fn is_retryable(error: &ChatApiError) -> bool {
    match error {
        ChatApiError::Network(_) => true,
        ChatApiError::Status(status, message) => is_retryable_http_error(status.as_u16(), message),
        _ => false,
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// True for `/admin`, `/admin/...` and `/admin?...`.
pub fn is_admin_path(path: &str) -> bool {
    let trimmed = path.trim_start_matches('/');
    match trimmed.strip_prefix("admin") {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

fn validate_path_segment(value: &str) -> Result<&str, ChatApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '?', '#']) {
        return Err(ChatApiError::Protocol(format!(
            "invalid session id: {value:?}"
        )));
    }
    Ok(trimmed)
}
