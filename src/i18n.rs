#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    En,
    Da,
}

const EN: &[(&str, &str)] = &[
    ("status.thinking", "Thinking…"),
    ("status.searching", "Searching…"),
    ("status.writing", "Writing…"),
    ("status.ready", "Ready"),
    ("status.online", "online"),
    ("status.offline", "offline"),
    ("error.prefix", "Error"),
    ("error.fetch_failed", "Error fetching response."),
    ("chat.new_name", "New chat"),
    ("chat.busy", "A reply is still streaming. Use /stop first."),
    ("chat.empty_prompt", "Type a message first."),
    ("chat.no_session", "No active session. Use /new to start one."),
    ("chat.stopped", "Stopped."),
    ("chat.nothing_to_stop", "Nothing to stop."),
    ("sessions.empty", "No sessions yet. Use /new to start one."),
    ("sessions.switched", "Switched to"),
    ("messages.empty", "No messages yet."),
    ("auth.required", "Not signed in. Use /login <username> <password>."),
    ("auth.signed_in", "Signed in as"),
    ("auth.signed_out", "Signed out."),
    ("auth.admin", "admin"),
    ("command.unknown", "Unknown command"),
    ("command.usage", "Usage"),
    (
        "help",
        "Commands: /help, /new [name], /sessions, /switch <n|id>, /stop, /refresh, /login <user> <password>, /logout, /quit",
    ),
    ("role.user", "you"),
    ("role.assistant", "jarvis"),
];

const DA: &[(&str, &str)] = &[
    ("status.thinking", "Tænker…"),
    ("status.searching", "Søger…"),
    ("status.writing", "Skriver…"),
    ("status.ready", "Klar"),
    ("status.online", "online"),
    ("status.offline", "offline"),
    ("error.prefix", "Fejl"),
    ("error.fetch_failed", "Fejl ved hentning af svar."),
    ("chat.new_name", "Ny chat"),
    ("chat.busy", "Et svar streames stadig. Brug /stop først."),
    ("chat.empty_prompt", "Skriv en besked først."),
    ("chat.no_session", "Ingen aktiv samtale. Brug /new for at starte en."),
    ("chat.stopped", "Stoppet."),
    ("chat.nothing_to_stop", "Intet at stoppe."),
    ("sessions.empty", "Ingen samtaler endnu. Brug /new for at starte en."),
    ("sessions.switched", "Skiftede til"),
    ("messages.empty", "Ingen beskeder endnu."),
    ("auth.required", "Ikke logget ind. Brug /login <brugernavn> <adgangskode>."),
    ("auth.signed_in", "Logget ind som"),
    ("auth.signed_out", "Logget ud."),
    ("command.unknown", "Ukendt kommando"),
    ("command.usage", "Brug"),
    ("role.user", "dig"),
];

impl Language {
    /// Accepts `en`, `da` and locale forms such as `da_DK.UTF-8`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        let code = lowered.split(['_', '-', '.']).next().unwrap_or_default();
        match code {
            "en" => Some(Self::En),
            "da" | "dk" => Some(Self::Da),
            _ => None,
        }
    }

    /// Looks up `key`, falling back to English and then to the key itself.
    #[must_use]
    pub fn t(self, key: &'static str) -> &'static str {
        let table = match self {
            Self::En => EN,
            Self::Da => DA,
        };
        lookup(table, key)
            .or_else(|| lookup(EN, key))
            .unwrap_or(key)
    }

    /// Indicator text for a backend status such as `thinking` or `using_tool`.
    #[must_use]
    pub fn status_label(self, raw: &str) -> String {
        let key = match raw.trim().to_ascii_lowercase().as_str() {
            "thinking" => "status.thinking",
            "writing" => "status.writing",
            "using_tool" | "searching" => "status.searching",
            "idle" => "status.ready",
            _ => return raw.to_string(),
        };
        self.t(key).to_string()
    }
}

fn lookup(table: &[(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, text)| *text)
}
