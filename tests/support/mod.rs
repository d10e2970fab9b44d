#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chat_api::{
    AdminAccess, ByteStream, CancellationSignal, ChatApiError, ChatCompletionRequest,
    ChatResponse, MessageRecord, Profile, SessionRecord, StatusCode,
};
use futures_util::stream::{self, StreamExt};
use jarvis_chat::{AccountBackend, ChatStreamSource};
use serde_json::Value;
use session_store::{active_session_path, ActiveSessionFile, SessionBackend};
use tempfile::TempDir;

/// Scripted answer to one chat completion.
pub enum Reply {
    /// Body chunks, then end of stream.
    Chunks(Vec<&'static str>),
    /// Body chunks, then a stream that never yields again.
    ChunksThenHang(Vec<&'static str>),
    Completion(Value),
    Unauthorized,
    Status(StatusCode, &'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCall {
    pub session_id: String,
    pub correlation_id: String,
    pub prompt: String,
}

/// In-memory backend covering sessions, chat and account endpoints.
#[derive(Default)]
pub struct FakeChat {
    sessions: Mutex<Vec<SessionRecord>>,
    messages: Mutex<HashMap<String, Vec<MessageRecord>>>,
    replies: Mutex<VecDeque<Reply>>,
    profile: Mutex<Option<Profile>>,
    fail_message_loads: AtomicBool,
    calls: Mutex<Vec<ChatCall>>,
    created: AtomicUsize,
    logouts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FakeChat {
    pub fn signed_in(username: &str) -> Arc<Self> {
        let fake = Self::default();
        *lock(&fake.profile) = Some(Profile {
            username: username.to_string(),
            is_admin: false,
        });
        Arc::new(fake)
    }

    pub fn set_sessions(&self, ids: &[&str]) {
        *lock(&self.sessions) = ids
            .iter()
            .map(|id| SessionRecord {
                id: (*id).to_string(),
                name: Some(format!("Session {id}")),
                created_at: None,
                last_message_at: None,
            })
            .collect();
    }

    pub fn set_messages(&self, session_id: &str, messages: &[(&str, &str)]) {
        lock(&self.messages).insert(
            session_id.to_string(),
            messages
                .iter()
                .map(|(role, content)| MessageRecord {
                    id: None,
                    role: (*role).to_string(),
                    content: (*content).to_string(),
                    created_at: None,
                })
                .collect(),
        );
    }

    pub fn push_reply(&self, reply: Reply) {
        lock(&self.replies).push_back(reply);
    }

    pub fn fail_message_loads(&self, fail: bool) {
        self.fail_message_loads.store(fail, Ordering::SeqCst);
    }

    pub fn revoke_profile(&self) {
        *lock(&self.profile) = None;
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        lock(&self.calls).clone()
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

fn body(chunks: Vec<&'static str>, hang: bool) -> ByteStream {
    let chunks = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, ChatApiError>(chunk.as_bytes().to_vec())),
    );
    if hang {
        chunks.chain(stream::pending()).boxed()
    } else {
        chunks.boxed()
    }
}

#[async_trait]
impl SessionBackend for FakeChat {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ChatApiError> {
        Ok(lock(&self.sessions).clone())
    }

    async fn create_session(&self, name: &str) -> Result<String, ChatApiError> {
        let index = self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("new-{index}");
        lock(&self.sessions).insert(
            0,
            SessionRecord {
                id: id.clone(),
                name: Some(name.to_string()),
                created_at: None,
                last_message_at: None,
            },
        );
        Ok(id)
    }

    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<MessageRecord>, ChatApiError> {
        if self.fail_message_loads.load(Ordering::SeqCst) {
            return Err(ChatApiError::Status(
                StatusCode::BAD_GATEWAY,
                "history unavailable".to_string(),
            ));
        }
        Ok(lock(&self.messages)
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatStreamSource for FakeChat {
    async fn open_chat(
        &self,
        request: &ChatCompletionRequest,
        session_id: &str,
        correlation_id: &str,
        _cancel: &CancellationSignal,
    ) -> Result<ChatResponse, ChatApiError> {
        lock(&self.calls).push(ChatCall {
            session_id: session_id.to_string(),
            correlation_id: correlation_id.to_string(),
            prompt: request.prompt.clone(),
        });

        let reply = lock(&self.replies)
            .pop_front()
            .unwrap_or(Reply::Chunks(vec!["data: [DONE]\n\n"]));
        match reply {
            Reply::Chunks(chunks) => Ok(ChatResponse::Stream(body(chunks, false))),
            Reply::ChunksThenHang(chunks) => Ok(ChatResponse::Stream(body(chunks, true))),
            Reply::Completion(value) => Ok(ChatResponse::Completion(value)),
            Reply::Unauthorized => Err(ChatApiError::Unauthorized {
                status: StatusCode::UNAUTHORIZED,
            }),
            Reply::Status(status, message) => {
                Err(ChatApiError::Status(status, message.to_string()))
            }
        }
    }
}

#[async_trait]
impl AccountBackend for FakeChat {
    async fn profile(&self) -> Result<Profile, ChatApiError> {
        lock(&self.profile).clone().ok_or(ChatApiError::Unauthorized {
            status: StatusCode::UNAUTHORIZED,
        })
    }

    async fn login(&self, username: &str, _password: &str) -> Result<String, ChatApiError> {
        *lock(&self.profile) = Some(Profile {
            username: username.to_string(),
            is_admin: false,
        });
        Ok(format!("token-{username}"))
    }

    async fn logout(&self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
    }

    async fn probe_admin_access(&self) -> Result<AdminAccess, ChatApiError> {
        Ok(AdminAccess::Denied)
    }
}

pub fn active_file(dir: &TempDir) -> ActiveSessionFile {
    ActiveSessionFile::new(active_session_path(dir.path()))
}
