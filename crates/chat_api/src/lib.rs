//! Transport and wire-format primitives for the Jarvis chat backend.
//!
//! This crate owns request building, status classification and incremental decoding of
//! streamed chat responses. It holds no session state and no presentation code.
//!
//! Streamed bodies may be SSE (`event:`/`data:` records), bare newline-delimited JSON, or
//! plain text. [`FrameDecoder`] normalizes all three into [`ProtocolEvent`]s and yields
//! identical output regardless of how the bytes were split into network chunks.

pub mod client;
pub mod config;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod stream;
pub mod url;

pub use client::{
    AdminAccess, AuthObserver, ChatApiClient, ChatResponse, RequestOptions, ResponseBody,
    TransportResponse,
};
pub use config::ChatApiConfig;
pub use credentials::{CredentialProvider, MemoryCredentials};
pub use decoder::{extract_completion, FrameDecoder};
pub use error::{ChatApiError, ErrorKind};
pub use events::{ProtocolEvent, StreamEnd};
pub use payload::{ChatCompletionRequest, ChatTurn, MessageRecord, Profile, SessionRecord};
pub use retry::RetryPolicy;
pub use stream::{is_cancelled, pump_events, ByteStream, CancellationSignal};
pub use url::endpoint_url;

pub use reqwest::StatusCode;
