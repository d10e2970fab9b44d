#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New(Option<String>),
    Sessions,
    /// 1-based index into the listed sessions, or a session id.
    Switch(String),
    Stop,
    Refresh,
    Login { username: String, password: String },
    Logout,
    Quit,
    /// A known command missing its arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" | "/?" => SlashCommand::Help,
        "/new" => SlashCommand::New((!rest.is_empty()).then(|| rest.to_string())),
        "/sessions" | "/ls" => SlashCommand::Sessions,
        "/switch" | "/open" => match rest.split_whitespace().next() {
            Some(target) => SlashCommand::Switch(target.to_string()),
            None => SlashCommand::Usage("/switch <n|id>"),
        },
        "/stop" | "/cancel" => SlashCommand::Stop,
        "/refresh" => SlashCommand::Refresh,
        "/login" => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            match (parts.next(), parts.next().map(str::trim)) {
                (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                    SlashCommand::Login {
                        username: username.to_string(),
                        password: password.to_string(),
                    }
                }
                _ => SlashCommand::Usage("/login <username> <password>"),
            }
        }
        "/logout" => SlashCommand::Logout,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}
