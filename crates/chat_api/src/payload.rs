use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /v1/chat/completions`.
///
/// The backend accepts either the bare `prompt` or OpenAI-style `messages`; both are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub prompt: String,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    #[must_use]
    pub fn streaming(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            messages: vec![ChatTurn {
                role: "user".to_string(),
                content: prompt.clone(),
            }],
            prompt,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// One entry of `GET /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<String>,
}

/// One entry of `GET /share/{session_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `GET /account/profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SessionsEnvelope {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreatedSession {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagesEnvelope {
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// Online flag from `GET /status`; either key may be used by the backend.
pub(crate) fn status_is_online(value: &Value) -> bool {
    value.get("online").and_then(Value::as_bool) == Some(true)
        || value.get("ok").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::{status_is_online, ChatCompletionRequest, CreatedSession};
    use serde_json::json;

    #[test]
    fn streaming_request_sends_prompt_and_messages() {
        let body = serde_json::to_value(ChatCompletionRequest::streaming("hej")).expect("serialize");
        assert_eq!(
            body,
            json!({
                "prompt": "hej",
                "messages": [{"role": "user", "content": "hej"}],
                "stream": true,
            })
        );
    }

    #[test]
    fn created_session_accepts_both_id_spellings() {
        let snake: CreatedSession =
            serde_json::from_value(json!({"session_id": "s1"})).expect("snake case");
        let camel: CreatedSession =
            serde_json::from_value(json!({"sessionId": "s2"})).expect("camel case");
        assert_eq!(snake.session_id.as_deref(), Some("s1"));
        assert_eq!(camel.session_id.as_deref(), Some("s2"));
    }

    #[test]
    fn status_accepts_online_or_ok() {
        assert!(status_is_online(&json!({"online": true})));
        assert!(status_is_online(&json!({"ok": true})));
        assert!(!status_is_online(&json!({"online": "yes"})));
    }
}
