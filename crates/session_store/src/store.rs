use std::collections::HashSet;

use chat_api::{ChatApiError, MessageRecord, SessionRecord};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::active::ActiveSessionFile;
use crate::backend::SessionBackend;
use crate::error::SessionStoreError;
use crate::schema::{Message, MessageState, Role, Session};

/// Proof that a message load was started for a given selection.
///
/// Only the ticket from the most recent selection may replace the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    session_id: String,
    generation: u64,
}

impl SelectionTicket {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingTurn {
    user_id: Option<String>,
    placeholder_id: Option<String>,
}

/// Session list, active session and its message log.
pub struct SessionStore<B> {
    backend: B,
    active_file: ActiveSessionFile,
    sessions: Vec<Session>,
    active_session_id: Option<String>,
    messages: Vec<Message>,
    pending_turn: Option<PendingTurn>,
    generation: u64,
}

impl<B: SessionBackend> SessionStore<B> {
    pub fn open(backend: B, active_file: ActiveSessionFile) -> Self {
        Self {
            backend,
            active_file,
            sessions: Vec::new(),
            active_session_id: None,
            messages: Vec::new(),
            pending_turn: None,
            generation: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    #[must_use]
    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    #[must_use]
    pub fn active_session(&self) -> Option<&Session> {
        let id = self.active_session_id.as_deref()?;
        self.sessions.iter().find(|session| session.id == id)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|session| session.id == session_id)
    }

    #[must_use]
    pub fn is_turn_in_flight(&self) -> bool {
        self.pending_turn.is_some()
    }

    #[must_use]
    pub fn pending_placeholder_id(&self) -> Option<&str> {
        self.pending_turn
            .as_ref()
            .and_then(|turn| turn.placeholder_id.as_deref())
    }

    /// Loads the session list and restores the persisted active session.
    ///
    /// A persisted id that is no longer listed falls back to the first session.
    pub async fn init(&mut self) -> Result<(), SessionStoreError> {
        let persisted = self.active_file.load();
        self.list_sessions().await?;

        let restored = persisted.filter(|id| {
            let listed = self.has_session(id);
            if !listed {
                info!(session_id = %id, "persisted session no longer exists");
            }
            listed
        });
        let target = restored.or_else(|| self.sessions.first().map(|session| session.id.clone()));

        match target {
            Some(session_id) => self.select_session(&session_id).await,
            None => {
                self.clear_active();
                self.persist_active(None);
                Ok(())
            }
        }
    }

    /// Fetches and stores the session list, collapsing duplicate ids.
    pub async fn list_sessions(&mut self) -> Result<&[Session], SessionStoreError> {
        let records = self.backend.list_sessions().await?;
        self.apply_session_list(records);
        Ok(&self.sessions)
    }

    /// Replaces the session list with a fetched one.
    ///
    /// Returns true when the active session disappeared from the list and was cleared.
    /// An active session with a turn in flight is kept until the turn ends.
    pub fn apply_session_list(&mut self, records: Vec<SessionRecord>) -> bool {
        self.sessions = dedup_sessions(records);

        let Some(active) = self.active_session_id.as_deref() else {
            return false;
        };
        if self.has_session(active) || self.pending_turn.is_some() {
            return false;
        }

        info!(session_id = active, "active session vanished from the session list");
        self.clear_active();
        true
    }

    /// Makes `session_id` active and loads its messages.
    pub async fn select_session(&mut self, session_id: &str) -> Result<(), SessionStoreError> {
        let ticket = self.begin_selection(session_id)?;
        let result = self.backend.session_messages(ticket.session_id()).await;
        self.apply_loaded_messages(ticket, result).map(|_| ())
    }

    /// First half of a selection: switch the active id and empty the log.
    pub fn begin_selection(
        &mut self,
        session_id: &str,
    ) -> Result<SelectionTicket, SessionStoreError> {
        if self.pending_turn.is_some() {
            return Err(SessionStoreError::TurnInFlight);
        }
        if !self.has_session(session_id) {
            return Err(SessionStoreError::UnknownSession(session_id.to_string()));
        }

        self.active_session_id = Some(session_id.to_string());
        self.persist_active(Some(session_id));
        self.messages.clear();
        Ok(self.next_ticket(session_id))
    }

    /// Second half of a selection.
    ///
    /// Returns `Ok(false)` when a newer selection superseded `ticket`. A failed load
    /// leaves the log empty.
    pub fn apply_loaded_messages(
        &mut self,
        ticket: SelectionTicket,
        result: Result<Vec<MessageRecord>, ChatApiError>,
    ) -> Result<bool, SessionStoreError> {
        if !self.is_current(&ticket) {
            debug!(session_id = ticket.session_id(), "dropping superseded message load");
            return Ok(false);
        }

        match result {
            Ok(records) => {
                self.messages = convert_messages(&ticket.session_id, records);
                debug!(
                    session_id = ticket.session_id(),
                    count = self.messages.len(),
                    "loaded session messages"
                );
                Ok(true)
            }
            Err(error) => {
                warn!(session_id = ticket.session_id(), %error, "failed to load session messages");
                self.messages.clear();
                Err(error.into())
            }
        }
    }

    /// Creates a session, refreshes the list and selects the new session.
    pub async fn create_session(&mut self, name: &str) -> Result<String, SessionStoreError> {
        if self.pending_turn.is_some() {
            return Err(SessionStoreError::TurnInFlight);
        }

        let session_id = self.backend.create_session(name).await?;
        info!(session_id = %session_id, "created session");

        if let Err(error) = self.list_sessions().await {
            warn!(%error, "failed to refresh sessions after create");
        }
        if !self.has_session(&session_id) {
            self.sessions.insert(0, Session::new(session_id.clone(), name));
        }

        self.select_session(&session_id).await?;
        Ok(session_id)
    }

    /// Replaces the active log with a fresh server fetch.
    ///
    /// On failure the current log is kept as is.
    pub async fn rehydrate(&mut self) -> Result<(), SessionStoreError> {
        let session_id = self
            .active_session_id
            .clone()
            .ok_or(SessionStoreError::NoActiveSession)?;
        self.pending_turn = None;
        let ticket = self.next_ticket(&session_id);

        match self.backend.session_messages(&session_id).await {
            Ok(records) => {
                if self.is_current(&ticket) {
                    self.messages = convert_messages(&session_id, records);
                }
                Ok(())
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "rehydrate failed");
                Err(error.into())
            }
        }
    }

    /// Forgets everything, including the persisted active id.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.clear_active();
        self.persist_active(None);
    }

    /// Appends the user's message for a new turn and returns its id.
    pub fn append_optimistic_user_message(
        &mut self,
        text: &str,
    ) -> Result<String, SessionStoreError> {
        if self.active_session_id.is_none() {
            return Err(SessionStoreError::NoActiveSession);
        }
        if self.pending_turn.is_some() {
            return Err(SessionStoreError::TurnInFlight);
        }

        let id = format!("u-{}", Uuid::new_v4());
        self.messages.push(Message::local(
            id.clone(),
            Role::User,
            text.to_string(),
            MessageState::Pending,
        ));
        self.pending_turn = Some(PendingTurn {
            user_id: Some(id.clone()),
            placeholder_id: None,
        });
        Ok(id)
    }

    /// Appends the empty assistant message that deltas stream into.
    pub fn create_assistant_placeholder(&mut self) -> Result<String, SessionStoreError> {
        if self.active_session_id.is_none() {
            return Err(SessionStoreError::NoActiveSession);
        }
        let turn = self.pending_turn.get_or_insert(PendingTurn {
            user_id: None,
            placeholder_id: None,
        });
        if turn.placeholder_id.is_some() {
            return Err(SessionStoreError::TurnInFlight);
        }

        let id = format!("a-{}", Uuid::new_v4());
        turn.placeholder_id = Some(id.clone());
        self.messages.push(Message::local(
            id.clone(),
            Role::Assistant,
            String::new(),
            MessageState::Streaming,
        ));
        Ok(id)
    }

    pub fn append_delta_to_placeholder(
        &mut self,
        placeholder_id: &str,
        text: &str,
    ) -> Result<(), SessionStoreError> {
        let message = self.placeholder_mut(placeholder_id)?;
        message.content.push_str(text);
        Ok(())
    }

    /// Ends the turn successfully.
    pub fn finalize_placeholder(&mut self, placeholder_id: &str) -> Result<(), SessionStoreError> {
        self.placeholder_mut(placeholder_id)?.state = MessageState::Complete;
        self.end_turn();
        Ok(())
    }

    /// Ends the turn with `text` shown in place of the assistant reply.
    pub fn fail_placeholder(
        &mut self,
        placeholder_id: &str,
        text: &str,
    ) -> Result<(), SessionStoreError> {
        let message = self.placeholder_mut(placeholder_id)?;
        message.content = text.to_string();
        message.state = MessageState::Failed;
        self.end_turn();
        Ok(())
    }

    /// Removes the optimistic pair of the in-flight turn, if any.
    pub fn discard_pending_turn(&mut self) -> bool {
        let Some(turn) = self.pending_turn.take() else {
            return false;
        };

        self.messages.retain(|message| {
            Some(&message.id) != turn.user_id.as_ref()
                && Some(&message.id) != turn.placeholder_id.as_ref()
        });
        true
    }

    fn placeholder_mut(
        &mut self,
        placeholder_id: &str,
    ) -> Result<&mut Message, SessionStoreError> {
        let is_pending = self.pending_placeholder_id() == Some(placeholder_id);
        let message = self
            .messages
            .iter_mut()
            .find(|message| message.id == placeholder_id)
            .ok_or_else(|| SessionStoreError::UnknownPlaceholder(placeholder_id.to_string()))?;

        if message.state != MessageState::Streaming {
            return Err(SessionStoreError::PlaceholderFinalized(
                placeholder_id.to_string(),
            ));
        }
        if !is_pending {
            return Err(SessionStoreError::UnknownPlaceholder(
                placeholder_id.to_string(),
            ));
        }
        Ok(message)
    }

    fn end_turn(&mut self) {
        let Some(turn) = self.pending_turn.take() else {
            return;
        };
        if let Some(user_id) = turn.user_id {
            if let Some(user) = self
                .messages
                .iter_mut()
                .find(|message| message.id == user_id)
            {
                user.state = MessageState::Complete;
            }
        }
    }

    fn next_ticket(&mut self, session_id: &str) -> SelectionTicket {
        self.generation += 1;
        SelectionTicket {
            session_id: session_id.to_string(),
            generation: self.generation,
        }
    }

    fn is_current(&self, ticket: &SelectionTicket) -> bool {
        ticket.generation == self.generation
            && self.active_session_id.as_deref() == Some(ticket.session_id.as_str())
    }

    fn clear_active(&mut self) {
        self.active_session_id = None;
        self.messages.clear();
        self.pending_turn = None;
        self.generation += 1;
    }

    fn persist_active(&self, session_id: Option<&str>) {
        let result = match session_id {
            Some(id) => self.active_file.save(id),
            None => self.active_file.clear(),
        };
        if let Err(error) = result {
            warn!(%error, "failed to persist active session");
        }
    }
}

fn dedup_sessions(records: Vec<SessionRecord>) -> Vec<Session> {
    let mut seen = HashSet::new();
    let mut sessions = Vec::with_capacity(records.len());

    for record in records {
        if record.id.trim().is_empty() {
            continue;
        }
        if !seen.insert(record.id.clone()) {
            debug!(session_id = %record.id, "dropping duplicate session id");
            continue;
        }
        sessions.push(Session::from(record));
    }

    sessions
}

fn convert_messages(session_id: &str, records: Vec<MessageRecord>) -> Vec<Message> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| Message::from_record(session_id, index, record))
        .collect()
}
