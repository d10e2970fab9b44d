use std::collections::BTreeMap;

use crate::config::ChatApiConfig;
use crate::credentials::CredentialProvider;

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_TOKEN: &str = "x-user-token";
pub const HEADER_SESSION_ID: &str = "x-session-id";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const ACCEPT_JSON: &str = "application/json";
pub const ACCEPT_STREAM: &str = "text/event-stream, application/json";

/// Per-request header inputs that are not part of the static configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderContext<'a> {
    pub session_id: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
    pub accept: Option<&'a str>,
    pub has_body: bool,
}

/// Build a deterministic header map for backend requests.
pub fn build_headers(
    config: &ChatApiConfig,
    credentials: &dyn CredentialProvider,
    context: HeaderContext<'_>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    headers.insert(
        HEADER_AUTHORIZATION.to_owned(),
        format!("Bearer {}", credentials.bearer_token().trim()),
    );
    if let Some(cookie) = credentials.cookie_token().as_deref().and_then(sanitize_nonempty) {
        headers.insert(HEADER_USER_TOKEN.to_owned(), cookie);
    }
    if let Some(session_id) = context.session_id.and_then(sanitize_nonempty) {
        headers.insert(HEADER_SESSION_ID.to_owned(), session_id);
    }
    if let Some(correlation_id) = context.correlation_id.and_then(sanitize_nonempty) {
        headers.insert(HEADER_REQUEST_ID.to_owned(), correlation_id);
    }

    headers.insert(
        HEADER_ACCEPT.to_owned(),
        context.accept.unwrap_or(ACCEPT_JSON).to_owned(),
    );
    if context.has_body {
        headers.insert(HEADER_CONTENT_TYPE.to_owned(), "application/json".to_owned());
    }

    let user_agent = config
        .user_agent
        .as_deref()
        .and_then(sanitize_nonempty)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent);

    for (key, value) in &config.extra_headers {
        if let Some(value) = sanitize_nonempty(value) {
            headers.insert(key.trim().to_ascii_lowercase(), value);
        }
    }

    headers
}

fn sanitize_nonempty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn default_user_agent() -> String {
    format!(
        "jarvis-chat/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
