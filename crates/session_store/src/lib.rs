//! Client-side session state for the Jarvis chat backend.
//!
//! [`SessionStore`] holds the session list, the active session and its message log. The
//! streaming controller may only touch the log through the placeholder operations; every
//! other change is a full replace from a server fetch.

mod active;
mod backend;
mod error;
mod paths;
mod schema;
mod store;

pub use active::ActiveSessionFile;
pub use backend::SessionBackend;
pub use error::SessionStoreError;
pub use paths::{active_session_path, state_root, ACTIVE_SESSION_FILE, STATE_DIR_NAME};
pub use schema::{Message, MessageState, Role, Session};
pub use store::{SelectionTicket, SessionStore};
