use serde_json::{Map, Value};
use tracing::debug;

use crate::events::ProtocolEvent;

/// Sentinel payload that ends a response stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DEFAULT_EVENT_NAME: &str = "message";

/// Incremental decoder for streamed chat responses.
///
/// Accepts SSE records (`event:` / `data:` / blank line) and bare newline-delimited
/// JSON on the same stream. Payloads that are not JSON degrade to plain-text deltas.
/// Once a terminal event is produced the decoder ignores all further input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    utf8_tail: Vec<u8>,
    buffer: String,
    event_name: Option<String>,
    data: Option<String>,
    correlation_id: Option<String>,
    sse_mode: bool,
    terminated: bool,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that drops JSON payloads tagged with a different `request_id`/`stream_id`.
    #[must_use]
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }

    /// Feed arbitrary bytes and drain the events completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }

        let text = self.decode_utf8(bytes);
        self.buffer.push_str(&text);

        let mut consumed = 0usize;
        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset;
            let raw = self.buffer[consumed..end].to_string();
            consumed = end + 1;

            let line = raw.strip_suffix('\r').unwrap_or(&raw);
            self.process_line(line, true, &mut events);
            if self.terminated {
                break;
            }
        }

        if self.terminated {
            self.discard_pending();
        } else {
            self.buffer.drain(..consumed);
        }

        events
    }

    /// Flush the trailing partial line and any undispatched SSE record.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }

        if !self.utf8_tail.is_empty() {
            let tail = std::mem::take(&mut self.utf8_tail);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let remainder = std::mem::take(&mut self.buffer);
        let line = remainder.strip_suffix('\r').unwrap_or(&remainder);
        if !line.is_empty() {
            self.process_line(line, false, &mut events);
        }

        if !self.terminated {
            if let Some(data) = self.data.take() {
                let event_name = self.current_event_name().to_string();
                self.dispatch(&event_name, &data, &mut events);
            }
        }

        self.discard_pending();
        events
    }

    /// Returns true once `Done` or `Error` has been emitted.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && self.utf8_tail.is_empty() && self.data.is_none()
    }

    /// Decode a complete payload in one shot, including the final flush.
    pub fn decode_all(input: &[u8]) -> Vec<ProtocolEvent> {
        let mut decoder = Self::default();
        let mut events = decoder.feed(input);
        events.extend(decoder.finish());
        events
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        let mut pending = std::mem::take(&mut self.utf8_tail);
        pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(pending.len());
        let mut rest: &[u8] = &pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(error) => {
                    let valid_len = error.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid_len]).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid_len) => {
                            debug!(invalid_len, "replacing invalid UTF-8 in stream body");
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid_len + invalid_len..];
                        }
                        None => {
                            // Incomplete sequence at the chunk boundary.
                            self.utf8_tail = rest[valid_len..].to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    fn process_line(
        &mut self,
        line: &str,
        terminated_by_newline: bool,
        events: &mut Vec<ProtocolEvent>,
    ) {
        if line.is_empty() {
            if let Some(data) = self.data.take() {
                let event_name = self.current_event_name().to_string();
                self.dispatch(&event_name, &data, events);
            }
            self.event_name = None;
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = self.sse_field(line, "event") {
            let name = value.trim();
            self.event_name = (!name.is_empty()).then(|| name.to_string());
            return;
        }

        if let Some(value) = self.sse_field(line, "data") {
            match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
            return;
        }

        if self.sse_field(line, "id").is_some() || self.sse_field(line, "retry").is_some() {
            return;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if trimmed == DONE_SENTINEL || is_json_object(trimmed) {
            self.dispatch(DEFAULT_EVENT_NAME, trimmed, events);
            return;
        }

        let text = if terminated_by_newline {
            format!("{line}\n")
        } else {
            line.to_string()
        };
        events.push(ProtocolEvent::Delta { text });
    }

    /// A bare field name only counts once the stream has shown an SSE field.
    fn sse_field<'a>(&mut self, line: &'a str, field: &str) -> Option<&'a str> {
        let value = field_value(line, field)?;
        if line.len() == field.len() {
            return self.sse_mode.then_some(value);
        }
        self.sse_mode = true;
        Some(value)
    }

    fn dispatch(&mut self, event_name: &str, payload: &str, events: &mut Vec<ProtocolEvent>) {
        let Some(event) = self.classify(event_name, payload) else {
            return;
        };

        if event.is_terminal() {
            self.terminated = true;
        }
        events.push(event);
    }

    /// Classification order: done sentinel, explicit error, explicit status,
    /// delta-shaped JSON, plain-text fallback.
    fn classify(&self, event_name: &str, payload: &str) -> Option<ProtocolEvent> {
        let trimmed = payload.trim();
        if trimmed == DONE_SENTINEL {
            return Some(ProtocolEvent::Done);
        }

        let parsed = serde_json::from_str::<Value>(trimmed).ok();
        if let Some(Value::Object(object)) = parsed.as_ref() {
            if !self.correlation_matches(object) {
                debug!(
                    expected = ?self.correlation_id,
                    "dropping frame tagged for a different request"
                );
                return None;
            }
        }

        match event_name {
            "done" => return Some(ProtocolEvent::Done),
            "error" => {
                let message = parsed
                    .as_ref()
                    .and_then(|value| value.as_object())
                    .and_then(|object| error_message(object).or_else(|| status_text(object)))
                    .or_else(|| non_empty(trimmed))
                    .unwrap_or_else(|| "unknown error".to_string());
                return Some(ProtocolEvent::Error { message });
            }
            "status" => {
                let text = match parsed.as_ref() {
                    Some(Value::Object(object)) => status_text(object),
                    Some(Value::String(text)) => non_empty(text),
                    _ => non_empty(trimmed),
                };
                return text.map(|text| ProtocolEvent::Status { text });
            }
            DEFAULT_EVENT_NAME | "delta" | "token" => {}
            other => {
                debug!(event = other, "ignoring noise event");
                return None;
            }
        }

        if payload.is_empty() {
            return None;
        }

        match parsed {
            Some(Value::Object(object)) => {
                let event = classify_object(&object);
                if event.is_none() {
                    debug!("ignoring JSON frame without text, status or error");
                }
                event
            }
            Some(Value::String(text)) => delta_event(text),
            _ => Some(ProtocolEvent::Delta {
                text: payload.to_string(),
            }),
        }
    }

    fn correlation_matches(&self, object: &Map<String, Value>) -> bool {
        let Some(expected) = self.correlation_id.as_deref() else {
            return true;
        };

        match object
            .get("request_id")
            .or_else(|| object.get("stream_id"))
            .and_then(Value::as_str)
        {
            Some(tagged) => tagged == expected,
            None => true,
        }
    }

    fn current_event_name(&self) -> &str {
        self.event_name.as_deref().unwrap_or(DEFAULT_EVENT_NAME)
    }

    fn discard_pending(&mut self) {
        self.buffer.clear();
        self.utf8_tail.clear();
        self.data = None;
        self.event_name = None;
    }
}

/// Classify a single non-stream JSON completion document.
#[must_use]
pub fn extract_completion(value: &Value) -> Option<ProtocolEvent> {
    match value {
        Value::Object(object) => classify_object(object),
        Value::String(text) => delta_event(text.clone()),
        _ => None,
    }
}

fn classify_object(object: &Map<String, Value>) -> Option<ProtocolEvent> {
    let kind = object.get("type").and_then(Value::as_str);

    if let Some(message) = error_message(object) {
        return Some(ProtocolEvent::Error { message });
    }
    if kind == Some("error") {
        let message = status_text(object).unwrap_or_else(|| "unknown error".to_string());
        return Some(ProtocolEvent::Error { message });
    }

    if matches!(kind, Some("done" | "final")) {
        return Some(ProtocolEvent::Done);
    }

    if matches!(kind, Some("status" | "thinking")) {
        return status_text(object).map(|text| ProtocolEvent::Status { text });
    }

    if let Some(text) = delta_text(object) {
        return delta_event(text.to_string());
    }

    if let Some(state) = object.get("state").and_then(Value::as_str) {
        return non_empty(state).map(|text| ProtocolEvent::Status { text });
    }

    None
}

fn delta_text(object: &Map<String, Value>) -> Option<&str> {
    let first_choice = object
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());

    if let Some(choice) = first_choice {
        let content = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            .or_else(|| {
                choice
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .and_then(Value::as_str)
            })
            .or_else(|| choice.get("text").and_then(Value::as_str));
        if content.is_some() {
            return content;
        }
    }

    if let Some(text) = object.get("text").and_then(Value::as_str) {
        return Some(text);
    }

    if object.get("type").and_then(Value::as_str) == Some("token") {
        return object.get("content").and_then(Value::as_str);
    }

    None
}

fn error_message(object: &Map<String, Value>) -> Option<String> {
    match object.get("error")? {
        Value::String(message) => non_empty(message),
        Value::Object(details) => details
            .get("message")
            .and_then(Value::as_str)
            .and_then(non_empty)
            .or_else(|| Some(Value::Object(details.clone()).to_string())),
        Value::Null | Value::Bool(false) => None,
        other => Some(other.to_string()),
    }
}

fn status_text(object: &Map<String, Value>) -> Option<String> {
    ["state", "status", "content", "message", "detail"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find_map(non_empty)
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    if rest.is_empty() {
        return Some("");
    }
    let value = rest.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Whitespace is content for deltas; only the empty string is dropped.
fn delta_event(text: String) -> Option<ProtocolEvent> {
    (!text.is_empty()).then_some(ProtocolEvent::Delta { text })
}

fn is_json_object(line: &str) -> bool {
    line.starts_with('{') && matches!(serde_json::from_str::<Value>(line), Ok(Value::Object(_)))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
