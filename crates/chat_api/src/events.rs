use serde::{Deserialize, Serialize};

/// One decoded unit of streamed assistant output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Advisory progress indicator ("thinking", "writing", ...). Never message content.
    Status { text: String },
    /// Text to append to the assistant placeholder.
    Delta { text: String },
    /// Completion signal. Terminal.
    Done,
    /// Server-reported failure. Terminal.
    Error { message: String },
}

impl ProtocolEvent {
    /// Returns true when no further events are expected after this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// How a streamed response body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// A terminal event (`Done` or `Error`) stopped the read loop.
    Terminal(ProtocolEvent),
    /// The server closed the body without a terminal event.
    Eof,
}
