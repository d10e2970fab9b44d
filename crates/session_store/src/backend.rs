use std::sync::Arc;

use async_trait::async_trait;
use chat_api::{ChatApiClient, ChatApiError, MessageRecord, SessionRecord};

/// Backend calls the session store depends on.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError>;

    /// Creates a session and returns its id.
    async fn create_session(&self, name: &str) -> Result<String, ChatApiError>;

    async fn session_messages(&self, session_id: &str)
        -> Result<Vec<MessageRecord>, ChatApiError>;
}

#[async_trait]
impl SessionBackend for ChatApiClient {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError> {
        ChatApiClient::list_sessions(self).await
    }

    async fn create_session(&self, name: &str) -> Result<String, ChatApiError> {
        ChatApiClient::create_session(self, name).await
    }

    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<MessageRecord>, ChatApiError> {
        ChatApiClient::session_messages(self, session_id).await
    }
}

#[async_trait]
impl<T> SessionBackend for Arc<T>
where
    T: SessionBackend + ?Sized,
{
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError> {
        (**self).list_sessions().await
    }

    async fn create_session(&self, name: &str) -> Result<String, ChatApiError> {
        (**self).create_session(name).await
    }

    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<MessageRecord>, ChatApiError> {
        (**self).session_messages(session_id).await
    }
}
