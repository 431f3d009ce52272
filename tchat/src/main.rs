//! `tchat` binary: line-oriented front end for the chat client.

use std::io::{BufRead, IsTerminal as _};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_appender::non_blocking::WorkerGuard;

use tchat::app::{App, AppError, Verification};
use tchat::chat::ChatLine;
use tchat::config::{ClientConfig, CliArgs, Command};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    // Logs go to a file so they never interleave with the transcript.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("tchat starting");
    let result = run(config, cli.command.unwrap_or(Command::Chats { watch: false })).await;
    tracing::info!("tchat exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(err = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Resolve the configuration, reporting any error on stderr.
fn load_config(cli: &CliArgs) -> Option<ClientConfig> {
    match ClientConfig::load(cli) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("error: {e}");
            None
        }
    }
}

/// Initialize file-based logging.
///
/// Uses `RUST_LOG` when set, otherwise `level`. Returns the guard that keeps
/// the background writer alive.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tchat.log");
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

async fn run(config: ClientConfig, command: Command) -> Result<(), AppError> {
    let mut app = App::bootstrap(config)?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    match command {
        Command::Register { username, email } => {
            let password = read_password("password: ").await?;
            app.register(&username, &email, &password).await?;
            println!("registered {username}; log in with `tchat login --username {username}`");
        }
        Command::Login { username } => {
            let password = read_password("password: ").await?;
            let user = app.login(&username, &password).await?;
            println!("logged in as {} ({})", user.username, user.id);
            app.settle().await;
        }
        Command::Logout => {
            app.logout()?;
            println!("logged out");
        }
        Command::Whoami => {
            match app.user() {
                Some(user) => println!("{} <{}> id {}", user.username, user.email, user.id),
                None => println!("not logged in"),
            }
            println!("key fingerprint {}", app.keys().fingerprint());
        }
        Command::Chats { watch } => {
            require_verified(&mut app).await?;
            print_chats(&app).await?;
            if watch {
                watch_chats(&app).await?;
            }
        }
        Command::Search { username } => {
            require_verified(&mut app).await?;
            let found = app.search(&username).await?;
            if found.is_empty() {
                println!("no users match {username:?}");
            }
            for user in found {
                println!("{:<24} {}", user.username, user.id);
            }
        }
        Command::Chat { contact_id } => {
            require_verified(&mut app).await?;
            chat(&app, &contact_id, &mut input).await?;
        }
    }
    Ok(())
}

/// Verify the stored session and open the realtime connection.
async fn require_verified(app: &mut App) -> Result<(), AppError> {
    match app.verify_session().await? {
        Verification::Valid => Ok(()),
        Verification::Unreachable => {
            eprintln!("server unreachable; showing nothing live");
            Ok(())
        }
        Verification::Absent | Verification::Rejected => Err(AppError::NotLoggedIn),
    }
}

async fn print_chats(app: &App) -> Result<(), AppError> {
    let chats = app.refresh_chats().await?;
    if chats.is_empty() {
        println!("no conversations yet");
    }
    let unread = app.unread();
    for chat in chats {
        let count = unread.get(&chat.id).copied().unwrap_or(0);
        let badge = if count > 0 { format!("({count})") } else { String::new() };
        let when = chat
            .last_message_timestamp
            .as_deref()
            .map(format_time)
            .unwrap_or_default();
        println!("{:<24} {badge:>5} {when:>8}  {}", chat.username, chat.id);
    }
    Ok(())
}

async fn watch_chats(app: &App) -> Result<(), AppError> {
    let mut events = app.realtime().watch_unread();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(contact) => {
                    let count = app.unread().get(&contact).copied().unwrap_or(0);
                    println!("new message from {contact} ({count} unread)");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    print_chats(app).await?;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn chat(app: &App, contact_id: &str, input: &mut Input) -> Result<(), AppError> {
    let mut conversation = app.open_conversation(contact_id).await?;
    app.realtime().unread().lock().clear(contact_id);
    for line in conversation.history() {
        print_line(line);
    }
    println!("-- type a message and press enter; /quit leaves --");

    loop {
        tokio::select! {
            typed = input.next_line() => {
                let Ok(Some(text)) = typed else { break };
                if text.trim() == "/quit" {
                    break;
                }
                if let Some(outcome) = conversation.send(&text)? {
                    print_line(&outcome.line);
                    if !outcome.handed_off {
                        println!("   (not sent: offline)");
                    }
                }
            }
            incoming = conversation.next_line() => match incoming {
                Some(line) => print_line(&line),
                None => break,
            },
        }
    }
    Ok(())
}

fn print_line(line: &ChatLine) {
    let who = if line.is_mine { "me" } else { line.sender_id.as_str() };
    println!("[{}] {who}: {}", format_time(&line.timestamp), line.text);
}

/// Render an ISO-8601 timestamp as local `HH:MM`, or echo it unparsed.
fn format_time(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_string(),
        |t| t.with_timezone(&chrono::Local).format("%H:%M").to_string(),
    )
}

/// Read a password without echo, or one line from piped stdin.
async fn read_password(label: &'static str) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || {
        if std::io::stdin().is_terminal() {
            rpassword::prompt_password(label)
        } else {
            password_from(&mut std::io::stdin().lock())
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

fn password_from(reader: &mut impl BufRead) -> std::io::Result<String> {
    rpassword::read_password_from_bufread(reader)
}
