use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chat_api::{
    AdminAccess, AuthObserver, ChatApiClient, ChatApiError, CredentialProvider, Profile,
    StatusCode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ChatApiError),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    token: String,
}

#[derive(Debug, Default)]
struct CredentialState {
    stored: Option<String>,
    cookie: Option<String>,
}

/// Bearer token persisted under the state directory.
#[derive(Debug)]
pub struct FileCredentials {
    path: PathBuf,
    state: Mutex<CredentialState>,
}

impl FileCredentials {
    /// Loads `credentials.json` from `state_root`; a missing or corrupt file means
    /// no stored token.
    pub fn open(state_root: &Path, cookie: Option<String>) -> Self {
        let path = state_root.join(CREDENTIALS_FILE);
        let stored = read_token(&path);
        Self {
            path,
            state: Mutex::new(CredentialState { stored, cookie }),
        }
    }

    pub fn store_token(&self, token: &str) -> Result<(), AuthError> {
        let body = serde_json::to_string_pretty(&StoredCredentials {
            token: token.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| AuthError::Io {
                operation: "creating state directory",
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, body).map_err(|source| AuthError::Io {
            operation: "writing credentials",
            path: self.path.clone(),
            source,
        })?;

        self.lock().stored = Some(token.to_string());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CredentialState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CredentialProvider for FileCredentials {
    fn stored_token(&self) -> Option<String> {
        self.lock().stored.clone()
    }

    fn cookie_token(&self) -> Option<String> {
        self.lock().cookie.clone()
    }

    fn clear(&self) {
        {
            let mut state = self.lock();
            state.stored = None;
            state.cookie = None;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = %self.path.display(), %error, "failed to remove credentials"),
        }
    }
}

fn read_token(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<StoredCredentials>(&raw) {
        Ok(stored) if !stored.token.trim().is_empty() => Some(stored.token),
        Ok(_) => None,
        Err(error) => {
            warn!(path = %path.display(), %error, "ignoring corrupt credentials file");
            None
        }
    }
}

/// Set by the transport when a user-scoped request fails with 401/403.
#[derive(Debug, Default)]
pub struct AuthLostFlag {
    lost: AtomicBool,
}

impl AuthLostFlag {
    pub fn take(&self) -> bool {
        self.lost.swap(false, Ordering::AcqRel)
    }
}

impl AuthObserver for AuthLostFlag {
    fn on_auth_lost(&self, status: StatusCode) {
        info!(status = status.as_u16(), "session credentials rejected");
        self.lost.store(true, Ordering::Release);
    }
}

/// Account endpoints the auth context depends on.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    async fn profile(&self) -> Result<Profile, ChatApiError>;
    async fn login(&self, username: &str, password: &str) -> Result<String, ChatApiError>;
    async fn logout(&self);
    async fn probe_admin_access(&self) -> Result<AdminAccess, ChatApiError>;
}

#[async_trait]
impl AccountBackend for ChatApiClient {
    async fn profile(&self) -> Result<Profile, ChatApiError> {
        ChatApiClient::profile(self).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, ChatApiError> {
        ChatApiClient::login(self, username, password).await
    }

    async fn logout(&self) {
        ChatApiClient::logout(self).await;
    }

    async fn probe_admin_access(&self) -> Result<AdminAccess, ChatApiError> {
        ChatApiClient::probe_admin_access(self).await
    }
}

#[async_trait]
impl<T> AccountBackend for Arc<T>
where
    T: AccountBackend + ?Sized,
{
    async fn profile(&self) -> Result<Profile, ChatApiError> {
        (**self).profile().await
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, ChatApiError> {
        (**self).login(username, password).await
    }

    async fn logout(&self) {
        (**self).logout().await;
    }

    async fn probe_admin_access(&self) -> Result<AdminAccess, ChatApiError> {
        (**self).probe_admin_access().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unknown,
    SignedOut,
    SignedIn(Profile),
}

/// Who is signed in, constructed once and passed to whoever needs it.
pub struct AuthContext {
    credentials: Arc<FileCredentials>,
    lost: Arc<AuthLostFlag>,
    state: AuthState,
    admin_access: Option<AdminAccess>,
}

impl AuthContext {
    pub fn new(credentials: Arc<FileCredentials>) -> Self {
        Self {
            credentials,
            lost: Arc::new(AuthLostFlag::default()),
            state: AuthState::Unknown,
            admin_access: None,
        }
    }

    pub fn credentials(&self) -> Arc<FileCredentials> {
        Arc::clone(&self.credentials)
    }

    /// Observer to install on the transport client.
    pub fn observer(&self) -> Arc<AuthLostFlag> {
        Arc::clone(&self.lost)
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn profile(&self) -> Option<&Profile> {
        match &self.state {
            AuthState::SignedIn(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state, AuthState::SignedIn(_))
    }

    /// Admin per profile, unless the admin probe was denied.
    pub fn is_admin(&self) -> bool {
        self.profile().is_some_and(|profile| profile.is_admin)
            && self.admin_access != Some(AdminAccess::Denied)
    }

    /// Loads the profile. A 401/403 leaves the context signed out without failing.
    pub async fn init<A>(&mut self, backend: &A) -> Result<&AuthState, ChatApiError>
    where
        A: AccountBackend + ?Sized,
    {
        match backend.profile().await {
            Ok(profile) => {
                info!(username = %profile.username, admin = profile.is_admin, "signed in");
                self.lost.take();
                self.admin_access = None;
                if profile.is_admin {
                    self.refresh_admin_access(backend).await;
                }
                self.state = AuthState::SignedIn(profile);
            }
            Err(error) if error.is_auth_failure() => {
                self.lost.take();
                self.state = AuthState::SignedOut;
            }
            Err(error) => return Err(error),
        }
        Ok(&self.state)
    }

    pub async fn login<A>(
        &mut self,
        backend: &A,
        username: &str,
        password: &str,
    ) -> Result<&Profile, AuthError>
    where
        A: AccountBackend + ?Sized,
    {
        let token = backend.login(username, password).await?;
        self.credentials.store_token(&token)?;
        self.init(backend).await?;
        self.profile()
            .ok_or(AuthError::Api(ChatApiError::Unauthorized {
                status: StatusCode::UNAUTHORIZED,
            }))
    }

    /// Best-effort server logout followed by [`AuthContext::reset`].
    pub async fn logout<A>(&mut self, backend: &A)
    where
        A: AccountBackend + ?Sized,
    {
        backend.logout().await;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.credentials.clear();
        self.lost.take();
        self.state = AuthState::SignedOut;
        self.admin_access = None;
    }

    /// True once after the transport reported lost credentials.
    pub fn take_auth_lost(&mut self) -> bool {
        if !self.lost.take() {
            return false;
        }
        self.state = AuthState::SignedOut;
        self.admin_access = None;
        true
    }

    async fn refresh_admin_access<A>(&mut self, backend: &A)
    where
        A: AccountBackend + ?Sized,
    {
        match backend.probe_admin_access().await {
            Ok(access) => self.admin_access = Some(access),
            Err(error) => warn!(%error, "admin probe failed"),
        }
    }
}
