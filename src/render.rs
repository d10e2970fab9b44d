use session_store::{Message, MessageState, Role, Session};
use unicode_width::UnicodeWidthChar;

use crate::i18n::Language;

const TAB_WIDTH: usize = 3;
const ELLIPSIS: &str = "…";
const SHORT_ID_LEN: usize = 8;

pub fn visible_width(input: &str) -> usize {
    input
        .chars()
        .map(|ch| {
            if ch == '\t' {
                TAB_WIDTH
            } else {
                UnicodeWidthChar::width(ch).unwrap_or(0)
            }
        })
        .sum()
}

/// Cuts `text` to at most `max_width` columns, ending in an ellipsis when shortened.
pub fn truncate_to_width(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if visible_width(text) <= max_width {
        return text.to_string();
    }

    let target = max_width.saturating_sub(visible_width(ELLIPSIS));
    let mut truncated = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = visible_width(ch.encode_utf8(&mut [0; 4]));
        if width + ch_width > target {
            break;
        }
        truncated.push(ch);
        width += ch_width;
    }
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Numbered session list; the active entry is marked with `*`.
pub fn session_list(
    sessions: &[Session],
    active_id: Option<&str>,
    language: Language,
    width: usize,
) -> Vec<String> {
    if sessions.is_empty() {
        return vec![language.t("sessions.empty").to_string()];
    }

    sessions
        .iter()
        .enumerate()
        .map(|(index, session)| {
            let marker = if Some(session.id.as_str()) == active_id {
                '*'
            } else {
                ' '
            };
            let line = format!(
                "{marker} {:>2}. {}  [{}]",
                index + 1,
                session.display_name(),
                short_id(&session.id)
            );
            truncate_to_width(&line, width)
        })
        .collect()
}

pub fn role_label(role: Role, language: Language) -> &'static str {
    match role {
        Role::User => language.t("role.user"),
        Role::Assistant => language.t("role.assistant"),
    }
}

/// Prefix printed before streamed assistant text.
pub fn assistant_prefix(language: Language) -> String {
    format!("{}: ", role_label(Role::Assistant, language))
}

pub fn message_lines(message: &Message, language: Language) -> Vec<String> {
    let label = role_label(message.role, language);
    let body = match message.state {
        MessageState::Streaming if message.content.is_empty() => ELLIPSIS,
        _ => message.content.as_str(),
    };
    let marker = if message.state == MessageState::Failed {
        "! "
    } else {
        ""
    };

    let indent = " ".repeat(visible_width(label) + 2);
    body.split('\n')
        .enumerate()
        .map(|(index, line)| {
            if index == 0 {
                format!("{marker}{label}: {line}")
            } else {
                format!("{indent}{line}")
            }
        })
        .collect()
}

/// The whole message log, or the empty-state text.
pub fn message_feed(messages: &[Message], language: Language) -> Vec<String> {
    if messages.is_empty() {
        return vec![language.t("messages.empty").to_string()];
    }
    messages
        .iter()
        .flat_map(|message| message_lines(message, language))
        .collect()
}

pub struct StatusLine<'a> {
    pub username: Option<&'a str>,
    pub is_admin: bool,
    pub session: Option<&'a Session>,
    pub online: Option<bool>,
}

pub fn status_line(status: &StatusLine<'_>, language: Language, width: usize) -> String {
    let mut parts = Vec::new();
    match status.username {
        Some(username) if status.is_admin => {
            parts.push(format!("{username} ({})", language.t("auth.admin")));
        }
        Some(username) => parts.push(username.to_string()),
        None => parts.push(language.t("auth.required").to_string()),
    }
    if let Some(session) = status.session {
        parts.push(session.display_name().to_string());
    }
    match status.online {
        Some(true) => parts.push(language.t("status.online").to_string()),
        Some(false) => parts.push(language.t("status.offline").to_string()),
        None => {}
    }
    parts.push(language.t("status.ready").to_string());

    truncate_to_width(&format!("[{}]", parts.join(" | ")), width)
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(role: Role, content: &str, state: MessageState) -> Message {
        Message {
            id: "m".to_string(),
            role,
            content: content.to_string(),
            created_at: None,
            state,
        }
    }

    #[test]
    fn truncate_respects_wide_characters() {
        assert_eq!(truncate_to_width("hello", 6), "hello");
        assert_eq!(truncate_to_width("hello", 4), "hel…");
        assert_eq!(truncate_to_width("日本語テキスト", 5), "日本…");
        assert_eq!(visible_width(&truncate_to_width("日本語テキスト", 5)), 5);
        assert_eq!(truncate_to_width("anything", 0), "");
    }

    #[test]
    fn session_list_marks_active_entry() {
        let sessions = vec![
            Session::new("0123456789abcdef", "Planning"),
            Session::new("s2", "Groceries"),
        ];
        let lines = session_list(&sessions, Some("s2"), Language::En, 80);
        assert_eq!(
            lines,
            vec![
                "   1. Planning  [01234567]".to_string(),
                "*  2. Groceries  [s2]".to_string(),
            ]
        );
    }

    #[test]
    fn empty_states_are_localized() {
        assert_eq!(
            session_list(&[], None, Language::Da, 80),
            vec![Language::Da.t("sessions.empty").to_string()]
        );
        assert_eq!(
            message_feed(&[], Language::En),
            vec!["No messages yet.".to_string()]
        );
    }

    #[test]
    fn multiline_messages_are_indented() {
        let lines = message_lines(
            &message(Role::User, "first\nsecond", MessageState::Complete),
            Language::En,
        );
        assert_eq!(lines, vec!["you: first".to_string(), "     second".to_string()]);
    }

    #[test]
    fn placeholders_and_failures_are_marked() {
        let streaming = message(Role::Assistant, "", MessageState::Streaming);
        assert_eq!(message_lines(&streaming, Language::En), vec!["jarvis: …"]);

        let failed = message(Role::Assistant, "Error: boom", MessageState::Failed);
        assert_eq!(
            message_lines(&failed, Language::En),
            vec!["! jarvis: Error: boom"]
        );
    }

    #[test]
    fn status_line_joins_parts() {
        let session = Session::new("s1", "Planning");
        let status = StatusLine {
            username: Some("alice"),
            is_admin: true,
            session: Some(&session),
            online: Some(false),
        };
        assert_eq!(
            status_line(&status, Language::En, 80),
            "[alice (admin) | Planning | offline | Ready]"
        );
    }
}
