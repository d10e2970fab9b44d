use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_api::{
    extract_completion, pump_events, CancellationSignal, ChatApiClient, ChatApiError,
    ChatCompletionRequest, ChatResponse, FrameDecoder, ProtocolEvent, StreamEnd,
};
use session_store::{SessionBackend, SessionStore, SessionStoreError};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::i18n::Language;

/// Opens chat completions for the controller.
#[async_trait]
pub trait ChatStreamSource: Send + Sync {
    async fn open_chat(
        &self,
        request: &ChatCompletionRequest,
        session_id: &str,
        correlation_id: &str,
        cancel: &CancellationSignal,
    ) -> Result<ChatResponse, ChatApiError>;
}

#[async_trait]
impl ChatStreamSource for ChatApiClient {
    async fn open_chat(
        &self,
        request: &ChatCompletionRequest,
        session_id: &str,
        correlation_id: &str,
        cancel: &CancellationSignal,
    ) -> Result<ChatResponse, ChatApiError> {
        ChatApiClient::open_chat(
            self,
            request,
            Some(session_id),
            Some(correlation_id),
            Some(cancel),
        )
        .await
    }
}

#[async_trait]
impl<T> ChatStreamSource for Arc<T>
where
    T: ChatStreamSource + ?Sized,
{
    async fn open_chat(
        &self,
        request: &ChatCompletionRequest,
        session_id: &str,
        correlation_id: &str,
        cancel: &CancellationSignal,
    ) -> Result<ChatResponse, ChatApiError> {
        (**self)
            .open_chat(request, session_id, correlation_id, cancel)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Sending,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

/// Progress surfaced to the presentation layer while a turn runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Phase(StreamPhase),
    /// Advisory indicator, never message content.
    Status(String),
    Delta(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Done,
    /// The placeholder now shows `message`.
    Errored { message: String },
    Cancelled,
    /// Credentials were rejected; the optimistic pair was removed.
    AuthLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BeginError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("no active session")]
    NoActiveSession,
    #[error("a reply is already streaming")]
    Busy,
}

/// Idempotent cancel switch for one turn.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    signal: CancellationSignal,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.signal.swap(true, Ordering::AcqRel) {
            debug!("chat turn cancel requested");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.load(Ordering::Acquire)
    }
}

/// A started turn whose optimistic messages are already in the store.
#[derive(Debug)]
pub struct StreamRequest {
    pub session_id: String,
    pub prompt: String,
    pub correlation_id: String,
    pub placeholder_id: String,
    cancel: CancellationSignal,
}

impl StreamRequest {
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            signal: Arc::clone(&self.cancel),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Reload the log from the server after a completed turn.
    pub rehydrate_on_done: bool,
    pub idle_timeout: Option<Duration>,
    pub language: Language,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            rehydrate_on_done: true,
            idle_timeout: None,
            language: Language::default(),
        }
    }
}

pub struct StreamController<S> {
    source: S,
    options: ControllerOptions,
    phase: StreamPhase,
    current: Option<CancelHandle>,
}

impl<S: ChatStreamSource> StreamController<S> {
    pub fn new(source: S, options: ControllerOptions) -> Self {
        Self {
            source,
            options,
            phase: StreamPhase::Idle,
            current: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// Cancel switch of the running turn, if any.
    #[must_use]
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.current.clone()
    }

    pub fn set_language(&mut self, language: Language) {
        self.options.language = language;
    }

    /// Validates `prompt` and appends the optimistic user message and placeholder.
    ///
    /// Nothing is sent until [`StreamController::run`].
    pub fn begin<B>(
        &mut self,
        store: &mut SessionStore<B>,
        prompt: &str,
    ) -> Result<StreamRequest, BeginError>
    where
        B: SessionBackend,
    {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BeginError::EmptyPrompt);
        }
        if self.current.is_some() || store.is_turn_in_flight() {
            return Err(BeginError::Busy);
        }
        let session_id = store
            .active_session_id()
            .ok_or(BeginError::NoActiveSession)?
            .to_string();

        store
            .append_optimistic_user_message(prompt)
            .map_err(begin_error)?;
        let placeholder_id = match store.create_assistant_placeholder() {
            Ok(id) => id,
            Err(error) => {
                store.discard_pending_turn();
                return Err(begin_error(error));
            }
        };

        let request = StreamRequest {
            session_id,
            prompt: prompt.to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            placeholder_id,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        self.current = Some(request.cancel_handle());
        self.phase = StreamPhase::Sending;
        info!(
            session_id = %request.session_id,
            correlation_id = %request.correlation_id,
            "chat turn started"
        );
        Ok(request)
    }

    /// Sends `request` and applies its events to the store until the turn ends.
    pub async fn run<B, F>(
        &mut self,
        store: &mut SessionStore<B>,
        request: StreamRequest,
        mut on_update: F,
    ) -> StreamOutcome
    where
        B: SessionBackend,
        F: FnMut(&StreamUpdate),
    {
        on_update(&StreamUpdate::Phase(StreamPhase::Sending));
        let result = self.drive(store, &request, &mut on_update).await;
        let cancelled = request.cancel.load(Ordering::Acquire);

        let outcome = match result {
            Ok(()) if !cancelled => {
                self.finish_placeholder(store, &request);
                if self.options.rehydrate_on_done {
                    if let Err(error) = store.rehydrate().await {
                        warn!(%error, "rehydrate after completed turn failed");
                    }
                }
                StreamOutcome::Done
            }
            Ok(()) => self.cancelled(store, &request),
            Err(error) if error.is_cancelled() || cancelled => self.cancelled(store, &request),
            Err(error) if error.is_auth_failure() => {
                warn!(%error, "chat turn rejected, credentials lost");
                store.discard_pending_turn();
                StreamOutcome::AuthLost
            }
            Err(error) => {
                let message = self.error_text(&error);
                warn!(%error, correlation_id = %request.correlation_id, "chat turn failed");
                if let Err(store_error) = store.fail_placeholder(&request.placeholder_id, &message)
                {
                    debug!(%store_error, "placeholder already gone");
                }
                if let Err(error) = store.rehydrate().await {
                    debug!(%error, "rehydrate after failed turn failed");
                }
                StreamOutcome::Errored { message }
            }
        };

        self.phase = match &outcome {
            StreamOutcome::Done => StreamPhase::Done,
            StreamOutcome::Cancelled => StreamPhase::Cancelled,
            StreamOutcome::Errored { .. } | StreamOutcome::AuthLost => StreamPhase::Errored,
        };
        self.current = None;
        on_update(&StreamUpdate::Phase(self.phase));
        outcome
    }

    /// Stops the running turn and settles its placeholder.
    pub fn teardown<B>(&mut self, store: &mut SessionStore<B>)
    where
        B: SessionBackend,
    {
        let Some(handle) = self.current.take() else {
            return;
        };
        handle.cancel();
        if let Some(placeholder_id) = store.pending_placeholder_id().map(ToString::to_string) {
            if let Err(error) = store.finalize_placeholder(&placeholder_id) {
                debug!(%error, "placeholder already settled");
            }
        }
        self.phase = StreamPhase::Cancelled;
    }

    async fn drive<B, F>(
        &mut self,
        store: &mut SessionStore<B>,
        request: &StreamRequest,
        on_update: &mut F,
    ) -> Result<(), ChatApiError>
    where
        B: SessionBackend,
        F: FnMut(&StreamUpdate),
    {
        let body = ChatCompletionRequest::streaming(request.prompt.as_str());
        let response = self
            .source
            .open_chat(
                &body,
                &request.session_id,
                &request.correlation_id,
                &request.cancel,
            )
            .await?;

        let stream = match response {
            ChatResponse::Completion(value) => {
                return match extract_completion(&value) {
                    Some(ProtocolEvent::Error { message }) => {
                        Err(ChatApiError::StreamFailed { message })
                    }
                    Some(ProtocolEvent::Delta { text }) => {
                        apply_delta(store, request, &text, on_update);
                        Ok(())
                    }
                    Some(ProtocolEvent::Done | ProtocolEvent::Status { .. }) | None => {
                        debug!("completion carried no assistant text");
                        Ok(())
                    }
                };
            }
            ChatResponse::Stream(stream) => stream,
        };

        self.phase = StreamPhase::Streaming;
        on_update(&StreamUpdate::Phase(StreamPhase::Streaming));

        let mut decoder = FrameDecoder::with_correlation_id(request.correlation_id.as_str());
        let end = pump_events(
            stream,
            &mut decoder,
            Some(&request.cancel),
            self.options.idle_timeout,
            |event| match event {
                ProtocolEvent::Delta { text } => apply_delta(store, request, &text, on_update),
                ProtocolEvent::Status { text } => on_update(&StreamUpdate::Status(text)),
                ProtocolEvent::Done | ProtocolEvent::Error { .. } => {}
            },
        )
        .await?;

        match end {
            StreamEnd::Terminal(ProtocolEvent::Error { message }) => {
                Err(ChatApiError::StreamFailed { message })
            }
            StreamEnd::Terminal(_) => Ok(()),
            StreamEnd::Eof => {
                debug!("stream ended without a done event");
                Ok(())
            }
        }
    }

    fn finish_placeholder<B>(&self, store: &mut SessionStore<B>, request: &StreamRequest)
    where
        B: SessionBackend,
    {
        if let Err(error) = store.finalize_placeholder(&request.placeholder_id) {
            debug!(%error, "placeholder already settled");
        }
    }

    fn cancelled<B>(&self, store: &mut SessionStore<B>, request: &StreamRequest) -> StreamOutcome
    where
        B: SessionBackend,
    {
        info!(correlation_id = %request.correlation_id, "chat turn cancelled");
        self.finish_placeholder(store, request);
        StreamOutcome::Cancelled
    }

    fn error_text(&self, error: &ChatApiError) -> String {
        let language = self.options.language;
        match error {
            ChatApiError::StreamFailed { message } | ChatApiError::Status(_, message) => {
                format!("{}: {message}", language.t("error.prefix"))
            }
            _ => language.t("error.fetch_failed").to_string(),
        }
    }
}

fn apply_delta<B, F>(
    store: &mut SessionStore<B>,
    request: &StreamRequest,
    text: &str,
    on_update: &mut F,
) where
    B: SessionBackend,
    F: FnMut(&StreamUpdate),
{
    match store.append_delta_to_placeholder(&request.placeholder_id, text) {
        Ok(()) => on_update(&StreamUpdate::Delta(text.to_string())),
        Err(error) => debug!(%error, "dropping delta for settled placeholder"),
    }
}

fn begin_error(error: SessionStoreError) -> BeginError {
    match error {
        SessionStoreError::NoActiveSession => BeginError::NoActiveSession,
        _ => BeginError::Busy,
    }
}
