use chat_api::{MessageRecord, SessionRecord};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps a wire role; anything but user/assistant is not displayed.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Lifecycle of a message in the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Loaded from the server.
    Persisted,
    /// Optimistic user message not yet acknowledged.
    Pending,
    /// Assistant placeholder receiving deltas.
    Streaming,
    /// Local message whose turn completed.
    Complete,
    /// Placeholder replaced by an error text.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: Option<OffsetDateTime>,
    pub last_message_at: Option<OffsetDateTime>,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: None,
            last_message_at: None,
        }
    }

    /// Name shown in lists; unnamed sessions fall back to their id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            created_at: parse_timestamp(record.created_at.as_deref()),
            last_message_at: parse_timestamp(record.last_message_at.as_deref()),
            name: record.name.unwrap_or_default(),
            id: record.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: Option<OffsetDateTime>,
    pub state: MessageState,
}

impl Message {
    pub(crate) fn local(id: String, role: Role, content: String, state: MessageState) -> Self {
        Self {
            id,
            role,
            content,
            created_at: Some(OffsetDateTime::now_utc()),
            state,
        }
    }

    /// Converts a server record, or `None` for roles that are not shown.
    ///
    /// Records without an id get `{session_id}-{index}`.
    #[must_use]
    pub fn from_record(session_id: &str, index: usize, record: MessageRecord) -> Option<Self> {
        let role = Role::from_wire(&record.role)?;
        let id = record
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{session_id}-{index}"));

        Some(Self {
            id,
            role,
            content: record.content,
            created_at: parse_timestamp(record.created_at.as_deref()),
            state: MessageState::Persisted,
        })
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(|raw| OffsetDateTime::parse(raw.trim(), &Rfc3339).ok())
}
