use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chat_api::ChatApiConfig;
use session_store::state_root;

use crate::i18n::Language;

pub const ENV_BASE_URL: &str = "JARVIS_BASE_URL";
pub const ENV_STATE_DIR: &str = "JARVIS_STATE_DIR";
pub const ENV_LANG: &str = "JARVIS_LANG";
pub const ENV_USER_TOKEN: &str = "JARVIS_USER_TOKEN";
pub const ENV_STREAM_IDLE_TIMEOUT_SECS: &str = "JARVIS_STREAM_IDLE_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL_SECS: &str = "JARVIS_POLL_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "JARVIS_REQUEST_TIMEOUT_SECS";
pub const ENV_LOG: &str = "JARVIS_LOG";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub base_url: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub language: Language,
    /// Mirror of the `jarvis_token` cookie, sent as `X-User-Token`.
    pub user_token: Option<String>,
    pub stream_idle_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string_opt(ENV_BASE_URL),
            state_dir: env_string_opt(ENV_STATE_DIR).map(PathBuf::from),
            language: env_string_opt(ENV_LANG)
                .and_then(|value| Language::parse(&value))
                .unwrap_or_default(),
            user_token: env_string_opt(ENV_USER_TOKEN),
            stream_idle_timeout: env_secs(ENV_STREAM_IDLE_TIMEOUT_SECS)
                .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT),
            poll_interval: env_secs(ENV_POLL_INTERVAL_SECS).unwrap_or(DEFAULT_POLL_INTERVAL),
            request_timeout: env_secs(ENV_REQUEST_TIMEOUT_SECS).unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            log_filter: env_string_opt(ENV_LOG),
        }
    }

    /// `JARVIS_STATE_DIR`, else `$HOME/.jarvis-chat`, else `./.jarvis-chat`.
    #[must_use]
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        let home = env_string_opt("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        state_root(&home)
    }

    #[must_use]
    pub fn api_config(&self) -> ChatApiConfig {
        let config = ChatApiConfig::default()
            .with_timeout(self.request_timeout)
            .with_stream_idle_timeout(self.stream_idle_timeout);
        match &self.base_url {
            Some(base_url) => config.with_base_url(base_url),
            None => config,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}

fn env_secs(key: &str) -> Option<Duration> {
    env_string_opt(key)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
