//! `VibeTalk`: terminal client for the VibeTalk chat backend.
//!
//! Logs in with a display name and avatar, joins the global room, and
//! offers private conversations, unread counters and audio messages from a
//! line-oriented prompt. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/vibetalk/config.toml`).
//!
//! ```bash
//! cargo run --bin vibetalk -- --server-url ws://127.0.0.1:3001/socket --name Ana
//!
//! # Or via environment variables
//! VIBETALK_SERVER_URL=ws://127.0.0.1:3001/socket VIBETALK_NAME=Ana cargo run
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, oneshot};
use tracing_appender::non_blocking::WorkerGuard;

use vibetalk::app::{App, HELP, Input, Output};
use vibetalk::config::{CliArgs, ClientConfig};
use vibetalk::identity::{Avatar, Identity, Profile, ProfileError};
use vibetalk::net::{self, NetCommand};
use vibetalk::state::SessionEvent;

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    // Logs go to a file; stdout belongs to the chat.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("vibetalk starting");

    let net_config = match config.to_net_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let Some(identity) = login(&config, &mut lines).await else {
        return ExitCode::FAILURE;
    };

    let (cmd_tx, evt_rx) = match net::spawn_net(net_config, identity.clone()).await {
        Ok(handles) => handles,
        Err(e) => {
            eprintln!("could not connect to {}: {e}", config.server_url.as_deref().unwrap_or_default());
            return ExitCode::FAILURE;
        }
    };

    println!("logged in as {}. type /help for commands.", identity.display_name());
    let app = App::new(identity.peer_id().clone(), config.timestamp_format.clone());
    run_app(app, &mut lines, &cmd_tx, evt_rx).await;

    tracing::info!("vibetalk exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("vibetalk.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Build the identity from config, prompting for a name when none is set.
///
/// Returns `None` if stdin closes or the configured avatar is invalid.
async fn login(config: &ClientConfig, lines: &mut StdinLines) -> Option<Identity> {
    let avatar = match resolve_avatar(config).await {
        Ok(avatar) => avatar,
        Err(e) => {
            eprintln!("error: {e}");
            return None;
        }
    };

    let mut name = config.display_name.clone();
    loop {
        let candidate = match name.take() {
            Some(n) => n,
            None => prompt(lines, "display name: ").await?,
        };
        match Profile::new(&candidate, avatar.clone()) {
            Ok(profile) => return Some(Identity::new(profile)),
            Err(e) => eprintln!("{e}"),
        }
    }
}

async fn resolve_avatar(config: &ClientConfig) -> Result<Avatar, ProfileError> {
    if let Some(photo) = &config.photo {
        return Avatar::from_photo_file(photo).await;
    }
    config
        .avatar
        .as_deref()
        .map_or_else(|| Avatar::preset(1), Avatar::parse)
}

async fn prompt(lines: &mut StdinLines, text: &str) -> Option<String> {
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(text.as_bytes()).await;
    let _ = stdout.flush().await;
    lines.next_line().await.ok().flatten()
}

/// Main loop: forward typed lines, print session events.
async fn run_app(
    mut app: App,
    lines: &mut StdinLines,
    cmd_tx: &mpsc::Sender<NetCommand>,
    mut evt_rx: mpsc::Receiver<SessionEvent>,
) {
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let input = match line {
                    Ok(Some(line)) => Input::parse(&line),
                    Ok(None) | Err(_) => Input::Quit,
                };
                handle_input(&mut app, input, cmd_tx).await;
                if app.should_quit {
                    break;
                }
            }
            event = evt_rx.recv() => {
                let Some(event) = event else {
                    println!("session ended");
                    break;
                };
                let output = app.apply(&event);
                print_output(&app, output, cmd_tx).await;
            }
        }
    }
}

async fn handle_input(app: &mut App, input: Input, cmd_tx: &mpsc::Sender<NetCommand>) {
    match &input {
        Input::Who => print_lines(&app.who_lines()),
        Input::Unread => print_lines(&app.unread_lines()),
        Input::Help => println!("{HELP}"),
        Input::Invalid(reason) => println!("! {reason}"),
        Input::Quit => app.should_quit = true,
        _ => {}
    }
    if let Some(cmd) = input.into_command()
        && cmd_tx.send(cmd).await.is_err()
    {
        println!("! session is no longer running");
        app.should_quit = true;
    }
}

async fn print_output(app: &App, output: Output, cmd_tx: &mpsc::Sender<NetCommand>) {
    print_lines(&output.lines);
    let Some(conversation) = output.refresh else {
        return;
    };
    let (reply, rx) = oneshot::channel();
    if cmd_tx
        .send(NetCommand::Transcript {
            conversation,
            reply,
        })
        .await
        .is_err()
    {
        return;
    }
    if let Ok(messages) = rx.await {
        print_lines(&app.format_transcript(&messages));
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
