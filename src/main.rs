use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chat_api::{ChatApiClient, CredentialProvider};
use jarvis_chat::app::{ChatApp, Dispatch};
use jarvis_chat::auth::{AccountBackend, AuthContext, FileCredentials};
use jarvis_chat::config::EnvConfig;
use jarvis_chat::controller::{ChatStreamSource, ControllerOptions, StreamRequest};
use jarvis_chat::logging::init_logging;
use jarvis_chat::poller::spawn_poller;
use session_store::{active_session_path, ActiveSessionFile, SessionBackend};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EnvConfig::from_env();
    init_logging(config.log_filter.as_deref());

    let state_root = config.resolved_state_dir();
    let credentials = Arc::new(FileCredentials::open(&state_root, config.user_token.clone()));
    let auth = AuthContext::new(Arc::clone(&credentials));

    let client = ChatApiClient::new(
        config.api_config(),
        credentials as Arc<dyn CredentialProvider>,
    )
    .context("failed to build the HTTP client")?
    .with_auth_observer(auth.observer());
    let client = Arc::new(client);
    info!(base_url = %client.config().base_url, "starting");

    let options = ControllerOptions {
        idle_timeout: Some(config.stream_idle_timeout),
        language: config.language,
        ..ControllerOptions::default()
    };
    let mut app = ChatApp::new(
        Arc::clone(&client),
        ActiveSessionFile::new(active_session_path(&state_root)),
        auth,
        options,
    );

    let mut stdout = io::stdout();
    app.startup(&mut stdout).await?;

    let (poller, mut updates) = spawn_poller(Arc::clone(&client), config.poll_interval);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            Some(update) = updates.recv() => {
                app.apply_poll(update, &mut stdout).await?;
                continue;
            }
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match app.dispatch(&line, &mut stdout).await? {
            Dispatch::Done => {}
            Dispatch::Exit => break,
            Dispatch::Stream(request) => {
                if !stream_turn(&mut app, request, &mut lines, &mut stdout).await? {
                    break;
                }
            }
        }
        stdout.flush()?;
    }

    app.teardown();
    poller.abort();
    info!("bye");
    Ok(())
}

/// Runs one turn while watching stdin and Ctrl-C. Returns false once stdin is closed.
async fn stream_turn<C>(
    app: &mut ChatApp<C>,
    request: StreamRequest,
    lines: &mut Lines<BufReader<Stdin>>,
    stdout: &mut io::Stdout,
) -> Result<bool>
where
    C: SessionBackend + ChatStreamSource + AccountBackend + Clone,
{
    let language = app.language();
    let cancel = request.cancel_handle();
    let mut stdin_open = true;

    let turn = app.run_turn(request, stdout);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            outcome = &mut turn => {
                outcome?;
                return Ok(stdin_open);
            }
            _ = tokio::signal::ctrl_c() => cancel.cancel(),
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim() == "/stop" || line.trim() == "/cancel" => cancel.cancel(),
                Some(line) if line.trim().is_empty() => {}
                Some(_) => eprintln!("{}", language.t("chat.busy")),
                None => stdin_open = false,
            },
        }
    }
}
