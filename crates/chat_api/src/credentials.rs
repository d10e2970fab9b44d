use std::sync::{Mutex, MutexGuard};

/// Bearer used when no credential has been stored yet.
pub const DEV_FALLBACK_TOKEN: &str = "devkey";

/// Source of the credentials attached to every backend request.
///
/// The persisted token is authoritative. The cookie token is a mirror that is used for
/// `Authorization` only when nothing is persisted, and is always sent as `X-User-Token`.
pub trait CredentialProvider: Send + Sync {
    /// Token persisted by a previous login.
    fn stored_token(&self) -> Option<String>;

    /// Token mirrored from the readable `jarvis_token` cookie.
    fn cookie_token(&self) -> Option<String> {
        None
    }

    /// Drops every stored credential after a confirmed auth failure.
    fn clear(&self);

    /// Bearer token for the `Authorization` header.
    fn bearer_token(&self) -> String {
        self.stored_token()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| self.cookie_token().filter(|token| !token.trim().is_empty()))
            .unwrap_or_else(|| DEV_FALLBACK_TOKEN.to_string())
    }
}

/// In-process credential holder.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    inner: Mutex<MemoryCredentialState>,
}

#[derive(Debug, Default)]
struct MemoryCredentialState {
    stored: Option<String>,
    cookie: Option<String>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new(stored: Option<String>, cookie: Option<String>) -> Self {
        Self {
            inner: Mutex::new(MemoryCredentialState { stored, cookie }),
        }
    }

    pub fn set_stored_token(&self, token: impl Into<String>) {
        self.lock().stored = Some(token.into());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCredentialState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CredentialProvider for MemoryCredentials {
    fn stored_token(&self) -> Option<String> {
        self.lock().stored.clone()
    }

    fn cookie_token(&self) -> Option<String> {
        self.lock().cookie.clone()
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.stored = None;
        state.cookie = None;
    }
}
