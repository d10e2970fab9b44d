use std::io::{self, Write};

use chat_api::ChatApiError;
use session_store::{ActiveSessionFile, SessionBackend, SessionStore, SessionStoreError};
use tracing::{debug, info, warn};

use crate::auth::{AccountBackend, AuthContext};
use crate::commands::{parse_slash_command, SlashCommand};
use crate::controller::{
    BeginError, ChatStreamSource, ControllerOptions, StreamController, StreamOutcome,
    StreamRequest, StreamUpdate,
};
use crate::i18n::Language;
use crate::poller::PollUpdate;
use crate::render::{self, StatusLine};

pub const DEFAULT_WIDTH: usize = 100;

/// What the caller should do after a line was dispatched.
#[derive(Debug)]
pub enum Dispatch {
    Done,
    /// A turn was started; drive it with [`ChatApp::run_turn`].
    Stream(StreamRequest),
    Exit,
}

pub struct ChatApp<C> {
    accounts: C,
    store: SessionStore<C>,
    controller: StreamController<C>,
    auth: AuthContext,
    language: Language,
    online: Option<bool>,
    width: usize,
}

impl<C> ChatApp<C>
where
    C: SessionBackend + ChatStreamSource + AccountBackend + Clone,
{
    pub fn new(
        client: C,
        active_file: ActiveSessionFile,
        auth: AuthContext,
        options: ControllerOptions,
    ) -> Self {
        Self {
            accounts: client.clone(),
            store: SessionStore::open(client.clone(), active_file),
            controller: StreamController::new(client, options),
            auth,
            language: options.language,
            online: None,
            width: DEFAULT_WIDTH,
        }
    }

    #[must_use]
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(20);
        self
    }

    pub fn store(&self) -> &SessionStore<C> {
        &self.store
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn online(&self) -> Option<bool> {
        self.online
    }

    pub fn is_streaming(&self) -> bool {
        self.controller.is_busy()
    }

    pub fn status_line(&self) -> String {
        let profile = self.auth.profile();
        let status = StatusLine {
            username: profile.map(|profile| profile.username.as_str()),
            is_admin: self.auth.is_admin(),
            session: self.store.active_session(),
            online: self.online,
        };
        render::status_line(&status, self.language, self.width)
    }

    /// Resolves the signed-in user and, when signed in, the session list.
    pub async fn startup<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if let Err(error) = self.auth.init(&self.accounts).await {
            warn!(%error, "profile load failed");
            self.print_error(out, &error)?;
        }

        if self.auth.is_signed_in() {
            self.load_sessions(out).await?;
        } else {
            writeln!(out, "{}", self.text("auth.required"))?;
        }
        writeln!(out, "{}", self.status_line())
    }

    /// Handles one input line: a slash command or a prompt.
    pub async fn dispatch<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<Dispatch> {
        let Some(command) = parse_slash_command(line) else {
            return self.send_prompt(line, out);
        };
        debug!(?command, "dispatching command");

        match command {
            SlashCommand::Help => writeln!(out, "{}", self.text("help"))?,
            SlashCommand::Quit => return Ok(Dispatch::Exit),
            SlashCommand::Usage(usage) => {
                writeln!(out, "{}: {usage}", self.text("command.usage"))?;
            }
            SlashCommand::Unknown(command) => {
                writeln!(out, "{}: {command}", self.text("command.unknown"))?;
            }
            SlashCommand::Stop => writeln!(out, "{}", self.text("chat.nothing_to_stop"))?,
            SlashCommand::Login { username, password } => {
                self.login(&username, &password, out).await?;
            }
            SlashCommand::Logout => {
                self.auth.logout(&self.accounts).await;
                self.store.reset();
                info!("signed out");
                writeln!(out, "{}", self.text("auth.signed_out"))?;
            }
            _ if !self.auth.is_signed_in() => writeln!(out, "{}", self.text("auth.required"))?,
            SlashCommand::New(name) => {
                let name = name.unwrap_or_else(|| self.text("chat.new_name").to_string());
                match self.store.create_session(&name).await {
                    Ok(_) => self.print_switched(out)?,
                    Err(error) => self.print_store_error(out, &error)?,
                }
            }
            SlashCommand::Sessions => {
                let listed = self.store.list_sessions().await.map(|_| ());
                match listed {
                    Ok(()) => self.print_sessions(out)?,
                    Err(error) => self.print_store_error(out, &error)?,
                }
            }
            SlashCommand::Switch(target) => self.switch(&target, out).await?,
            SlashCommand::Refresh => {
                let listed = self.store.list_sessions().await.map(|_| ());
                if let Err(error) = listed {
                    self.print_store_error(out, &error)?;
                } else if self.store.active_session_id().is_some() {
                    match self.store.rehydrate().await {
                        Ok(()) => self.print_feed(out)?,
                        Err(error) => self.print_store_error(out, &error)?,
                    }
                }
            }
        }

        self.settle_auth(out)?;
        Ok(Dispatch::Done)
    }

    /// Drives a started turn, printing deltas as they arrive.
    pub async fn run_turn<W: Write>(
        &mut self,
        request: StreamRequest,
        out: &mut W,
    ) -> io::Result<StreamOutcome> {
        let language = self.language;
        let mut write_error: Option<io::Error> = None;
        let mut started = false;

        let outcome = {
            let mut write = |text: &str| {
                if write_error.is_none() {
                    if let Err(error) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                        write_error = Some(error);
                    }
                }
            };
            self.controller
                .run(&mut self.store, request, |update| match update {
                    StreamUpdate::Status(raw) => {
                        let label = language.status_label(raw);
                        if !started {
                            write(format!("· {label}\n").as_str());
                        }
                    }
                    StreamUpdate::Delta(text) => {
                        if !started {
                            started = true;
                            write(render::assistant_prefix(language).as_str());
                        }
                        write(text.as_str());
                    }
                    StreamUpdate::Phase(_) => {}
                })
                .await
        };
        if let Some(error) = write_error {
            return Err(error);
        }

        if started {
            writeln!(out)?;
        }
        match &outcome {
            StreamOutcome::Done => {}
            StreamOutcome::Errored { message } => {
                writeln!(out, "{}{message}", render::assistant_prefix(language))?;
            }
            StreamOutcome::Cancelled => writeln!(out, "{}", self.text("chat.stopped"))?,
            StreamOutcome::AuthLost => {
                self.auth.take_auth_lost();
                self.sign_out_rejected(out)?;
                return Ok(outcome);
            }
        }
        self.settle_auth(out)?;
        Ok(outcome)
    }

    /// Applies one background refresh.
    pub async fn apply_poll<W: Write>(
        &mut self,
        update: PollUpdate,
        out: &mut W,
    ) -> io::Result<()> {
        match update {
            PollUpdate::Online(online) => {
                if self.online != Some(online) {
                    self.online = Some(online);
                    writeln!(out, "{}", self.status_line())?;
                }
            }
            PollUpdate::Sessions(records) => {
                if !self.auth.is_signed_in() {
                    return Ok(());
                }
                if self.store.apply_session_list(records) {
                    self.print_sessions(out)?;
                    if let Some(first) = self.store.sessions().first().map(|s| s.id.clone()) {
                        match self.store.select_session(&first).await {
                            Ok(()) => self.print_switched(out)?,
                            Err(error) => self.print_store_error(out, &error)?,
                        }
                    }
                }
            }
        }
        self.settle_auth(out)
    }

    /// Settles an in-flight turn before exit.
    pub fn teardown(&mut self) {
        self.controller.teardown(&mut self.store);
    }

    fn send_prompt<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<Dispatch> {
        if !self.auth.is_signed_in() {
            writeln!(out, "{}", self.text("auth.required"))?;
            return Ok(Dispatch::Done);
        }
        match self.controller.begin(&mut self.store, line) {
            Ok(request) => Ok(Dispatch::Stream(request)),
            Err(error) => {
                let key = match error {
                    BeginError::EmptyPrompt => "chat.empty_prompt",
                    BeginError::NoActiveSession => "chat.no_session",
                    BeginError::Busy => "chat.busy",
                };
                writeln!(out, "{}", self.text(key))?;
                Ok(Dispatch::Done)
            }
        }
    }

    async fn login<W: Write>(
        &mut self,
        username: &str,
        password: &str,
        out: &mut W,
    ) -> io::Result<()> {
        let signed_in = self
            .auth
            .login(&self.accounts, username, password)
            .await
            .map(|profile| profile.username.clone());
        let username = match signed_in {
            Ok(username) => username,
            Err(error) => {
                self.settle_auth(out)?;
                return writeln!(out, "{}: {error}", self.text("error.prefix"));
            }
        };

        writeln!(out, "{} {username}", self.text("auth.signed_in"))?;
        self.load_sessions(out).await?;
        writeln!(out, "{}", self.status_line())
    }

    async fn load_sessions<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        match self.store.init().await {
            Ok(()) => {
                self.print_sessions(out)?;
                if self.store.active_session_id().is_some() {
                    self.print_feed(out)?;
                }
                Ok(())
            }
            Err(error) => self.print_store_error(out, &error),
        }
    }

    async fn switch<W: Write>(&mut self, target: &str, out: &mut W) -> io::Result<()> {
        let session_id = match target.parse::<usize>() {
            Ok(index) if index >= 1 => self
                .store
                .sessions()
                .get(index - 1)
                .map(|session| session.id.clone()),
            _ => Some(target.to_string()),
        };
        let Some(session_id) = session_id else {
            let error = SessionStoreError::UnknownSession(target.to_string());
            return self.print_store_error(out, &error);
        };

        match self.store.select_session(&session_id).await {
            Ok(()) => self.print_switched(out),
            Err(error) => self.print_store_error(out, &error),
        }
    }

    /// Signs out locally when the transport reported lost credentials.
    fn settle_auth<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if !self.auth.take_auth_lost() {
            return Ok(());
        }
        self.sign_out_rejected(out)
    }

    fn sign_out_rejected<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        warn!("credentials rejected, signing out");
        self.controller.teardown(&mut self.store);
        self.store.reset();
        self.auth.reset();
        writeln!(out, "{}", self.text("auth.required"))
    }

    fn print_switched<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if let Some(session) = self.store.active_session() {
            writeln!(out, "{} {}", self.text("sessions.switched"), session.display_name())?;
        }
        self.print_feed(out)
    }

    fn print_sessions<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for line in render::session_list(
            self.store.sessions(),
            self.store.active_session_id(),
            self.language,
            self.width,
        ) {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    fn print_feed<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for line in render::message_feed(self.store.messages(), self.language) {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    fn print_store_error<W: Write>(
        &self,
        out: &mut W,
        error: &SessionStoreError,
    ) -> io::Result<()> {
        match error {
            SessionStoreError::Backend(error) => self.print_error(out, error),
            SessionStoreError::TurnInFlight => writeln!(out, "{}", self.text("chat.busy")),
            SessionStoreError::NoActiveSession => writeln!(out, "{}", self.text("chat.no_session")),
            other => writeln!(out, "{}: {other}", self.text("error.prefix")),
        }
    }

    fn print_error<W: Write>(&self, out: &mut W, error: &ChatApiError) -> io::Result<()> {
        if error.is_auth_failure() {
            return Ok(());
        }
        writeln!(out, "{}: {error}", self.text("error.prefix"))
    }

    fn text(&self, key: &'static str) -> &'static str {
        self.language.t(key)
    }
}
