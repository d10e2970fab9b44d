//! Terminal chat client for the Jarvis backend.
//!
//! The transport and the frame decoder live in `chat_api`; the session list and message
//! log live in `session_store`. This crate adds the pieces a front end needs:
//!
//! - [`controller`]: one in-flight turn, from optimistic messages to reconciliation.
//! - [`auth`]: the signed-in user and persisted credentials.
//! - [`poller`]: background refresh of sessions and backend status.
//! - [`app`]: the line-oriented application driven by the binary.
//!
//! # Configuration
//!
//! All settings come from `JARVIS_*` environment variables, see [`config::EnvConfig`].
//! Diagnostics go to stderr through `tracing`, filtered by `JARVIS_LOG`.

pub mod app;
pub mod auth;
pub mod commands;
pub mod config;
pub mod controller;
pub mod i18n;
pub mod logging;
pub mod poller;
pub mod render;

pub use crate::app::{ChatApp, Dispatch};
pub use crate::auth::{AccountBackend, AuthContext, AuthError, AuthState, FileCredentials};
pub use crate::config::EnvConfig;
pub use crate::controller::{
    BeginError, CancelHandle, ChatStreamSource, ControllerOptions, StreamController,
    StreamOutcome, StreamPhase, StreamRequest, StreamUpdate,
};
pub use crate::i18n::Language;
pub use crate::poller::{spawn_poller, PollSource, PollUpdate};
