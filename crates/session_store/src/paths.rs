use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".jarvis-chat";
pub const ACTIVE_SESSION_FILE: &str = "active_session.json";

/// State directory below a home directory.
#[must_use]
pub fn state_root(home: &Path) -> PathBuf {
    home.join(STATE_DIR_NAME)
}

#[must_use]
pub fn active_session_path(state_root: &Path) -> PathBuf {
    state_root.join(ACTIVE_SESSION_FILE)
}
