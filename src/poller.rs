use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_api::{ChatApiClient, ChatApiError, SessionRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive status failures tolerated before reporting offline.
pub const OFFLINE_AFTER_FAILURES: u32 = 3;

const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollUpdate {
    Sessions(Vec<SessionRecord>),
    Online(bool),
}

#[async_trait]
pub trait PollSource: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError>;

    async fn status(&self) -> Result<bool, ChatApiError>;
}

#[async_trait]
impl PollSource for ChatApiClient {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError> {
        ChatApiClient::list_sessions(self).await
    }

    async fn status(&self) -> Result<bool, ChatApiError> {
        ChatApiClient::status(self).await
    }
}

#[async_trait]
impl<T> PollSource for Arc<T>
where
    T: PollSource + ?Sized,
{
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError> {
        (**self).list_sessions().await
    }

    async fn status(&self) -> Result<bool, ChatApiError> {
        (**self).status().await
    }
}

/// Debounces status probes into online/offline transitions.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    online: Option<bool>,
    failures: u32,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            online: None,
            failures: 0,
        }
    }

    #[must_use]
    pub fn online(&self) -> Option<bool> {
        self.online
    }

    /// Records one probe and returns the new state when it changed.
    pub fn record(&mut self, probe: Result<bool, &ChatApiError>) -> Option<bool> {
        let next = match probe {
            Ok(true) => {
                self.failures = 0;
                true
            }
            Ok(false) | Err(_) => {
                self.failures = self.failures.saturating_add(1);
                if self.failures <= OFFLINE_AFTER_FAILURES {
                    return None;
                }
                false
            }
        };

        if self.online == Some(next) {
            return None;
        }
        self.online = Some(next);
        Some(next)
    }
}

/// Starts polling `source` every `period`, skipping the immediate first tick.
///
/// The task ends once the receiver is dropped.
pub fn spawn_poller<S>(source: S, period: Duration) -> (JoinHandle<()>, mpsc::Receiver<PollUpdate>)
where
    S: PollSource + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(period_ms = period.as_millis() as u64, "poller started");

        let mut tracker = StatusTracker::new();
        loop {
            ticker.tick().await;
            if poll_once(&source, &mut tracker, &tx).await.is_err() {
                break;
            }
        }
        debug!("poller stopped");
    });
    (handle, rx)
}

async fn poll_once<S>(
    source: &S,
    tracker: &mut StatusTracker,
    tx: &mpsc::Sender<PollUpdate>,
) -> Result<(), mpsc::error::SendError<PollUpdate>>
where
    S: PollSource,
{
    match source.list_sessions().await {
        Ok(records) => tx.send(PollUpdate::Sessions(records)).await?,
        Err(error) => debug!(%error, "session refresh failed"),
    }

    let probe = source.status().await;
    if let Err(error) = &probe {
        debug!(%error, "status probe failed");
    }
    if let Some(online) = tracker.record(probe.as_ref().copied()) {
        if !online {
            warn!("backend reported offline");
        }
        tx.send(PollUpdate::Online(online)).await?;
    }
    Ok(())
}
