//! `SkillChat` — headless console client for the dashboard inbox.
//!
//! Connects to the LMS backend over REST and the live channel, renders the
//! inbox as plain lines on stdout, and reads commands from stdin.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/skillchat/config.toml`).
//!
//! ```bash
//! SKILLCHAT_TOKEN=... cargo run --bin skillchat -- \
//!     --api-url https://lms.example.edu/api --live-url wss://lms.example.edu/live \
//!     --user-id u-42 --context class-7
//! ```
//!
//! Commands: `/open <user>`, `/contacts`, `/context <key>`, `/hide`,
//! `/show`, `/dismiss`, `/quit`; any other line is sent to the open
//! conversation.

use std::collections::HashSet;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;

use skillchat::api::http::HttpChatApi;
use skillchat::cache::{CachePort, FileCache, InMemoryCache, SnapshotCache};
use skillchat::chat::send::SendOutcome;
use skillchat::chat::{InboxEngine, InboxView};
use skillchat::config::{CliArgs, ClientConfig, ServerEndpoints};
use skillchat::transport::ConnectionState;
use skillchat::transport::connection::ConnectionManager;
use skillchat::transport::ws::WsDialer;
use skillchat_proto::message::{MessageId, UserId};
use skillchat_proto::roster::RosterContext;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let endpoints = match config.endpoints() {
        Ok(ep) => ep,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(user = %endpoints.user_id, api = %endpoints.api_base_url, "skillchat starting");

    let cache_dir = config
        .cache_dir
        .clone()
        .map_or_else(FileCache::default_dir, Ok);
    let result = match cache_dir.and_then(|dir| FileCache::open(dir, config.cache_quota)) {
        Ok(port) => run(port, endpoints, &config).await,
        Err(e) => {
            tracing::warn!(err = %e, "file cache unavailable, falling back to memory");
            run(InMemoryCache::new(), endpoints, &config).await
        }
    };

    tracing::info!("skillchat exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never interleave with the console output.
/// Returns a [`WorkerGuard`] that must be held until shutdown to flush
/// buffered entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("skillchat.log");
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

/// Wire the engine to the backend and serve stdin until `/quit` or EOF.
async fn run<C: CachePort + 'static>(
    port: C,
    endpoints: ServerEndpoints,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = HttpChatApi::new(&endpoints.api_base_url, endpoints.token.clone())?;
    let dialer = WsDialer::new(endpoints.live_url.clone(), endpoints.token.clone());
    let manager = ConnectionManager::new(
        dialer,
        config.reconnect.clone(),
        config.engine.event_buffer,
    );

    let me = endpoints.user_id;
    let cache = Arc::new(SnapshotCache::new(port, &me));
    let engine = Arc::new(InboxEngine::new(
        me,
        Arc::new(api),
        cache,
        manager.signals(),
        config.context.clone(),
        config.engine.clone(),
    ));

    // Subscribe before connecting so the first Connected state is seen.
    let subscription = manager.subscribe();
    manager.connect();
    let driver = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(subscription).await }
    });
    let printer = tokio::spawn(print_views(engine.view()));

    engine.refresh_roster().await;
    print_contacts(&engine.current_view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Open(id) => engine.select_contact(&UserId::new(id)).await,
            Command::Contacts => print_contacts(&engine.current_view()),
            Command::Context(key) => engine.set_context(RosterContext::new(key)).await,
            Command::Hide => engine.on_visibility_change(false).await,
            Command::Show => engine.on_visibility_change(true).await,
            Command::Dismiss => engine.dismiss_notice().await,
            Command::Quit => break,
            Command::Unknown(cmd) => println!("unknown command: {cmd}"),
            Command::Send(text) => {
                engine.on_input_change(text).await;
                report(&engine.send_message(text).await);
            }
        }
    }

    manager.shutdown().await;
    if let Err(e) = driver.await {
        tracing::warn!(err = %e, "engine driver ended abnormally");
    }
    printer.abort();
    Ok(())
}

/// One line of console input.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Open(&'a str),
    Contacts,
    Context(&'a str),
    Hide,
    Show,
    Dismiss,
    Quit,
    Unknown(&'a str),
    Send(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line);
        };
        let (cmd, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(c, a)| (c, a.trim()));
        match (cmd, arg) {
            ("open", id) if !id.is_empty() => Self::Open(id),
            ("contacts", _) => Self::Contacts,
            ("context", key) if !key.is_empty() => Self::Context(key),
            ("hide", _) => Self::Hide,
            ("show", _) => Self::Show,
            ("dismiss", _) => Self::Dismiss,
            ("quit" | "q", _) => Self::Quit,
            _ => Self::Unknown(line),
        }
    }
}

fn report(outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Sent(_) => {}
        SendOutcome::Ignored(reason) => println!("-- not sent: {reason}"),
        SendOutcome::Failed { reason, draft } => {
            println!("-- send failed ({reason}); draft kept: {draft}");
        }
    }
}

fn print_contacts(view: &InboxView) {
    println!("-- contacts ({} unread)", view.total_unread);
    for contact in &view.contacts {
        let presence = if contact.online { "*" } else { " " };
        let unread = if contact.unread_count > 0 {
            format!(" [{}]", contact.unread_count)
        } else {
            String::new()
        };
        let preview = contact
            .last_message
            .as_ref()
            .map(|m| m.text.as_str())
            .unwrap_or_default();
        println!(
            "{presence} {} ({}){unread}  {preview}",
            contact.profile.display_name,
            contact.id()
        );
    }
}

/// Print what changed between successive views.
async fn print_views(mut rx: watch::Receiver<InboxView>) {
    let mut shown: HashSet<MessageId> = HashSet::new();
    let mut last_active: Option<UserId> = None;
    let mut last_connection: Option<ConnectionState> = None;
    let mut last_typing = false;
    let mut last_notice = None;

    while rx.changed().await.is_ok() {
        let view = rx.borrow_and_update().clone();

        if last_connection != Some(view.connection) {
            println!("-- live channel: {}", view.connection);
            last_connection = Some(view.connection);
        }
        if view.active != last_active {
            shown.clear();
            if let Some(partner) = &view.active {
                println!("-- conversation with {partner}");
            }
            last_active.clone_from(&view.active);
        }
        for message in view.messages.iter().filter(|m| !m.id.is_temporary()) {
            if shown.insert(message.id.clone()) {
                let status = view
                    .receipts
                    .get(&message.id)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("{}: {}  {status}", message.sender_id, message.body);
            }
        }
        if view.partner_typing != last_typing {
            if view.partner_typing {
                println!("-- typing...");
            }
            last_typing = view.partner_typing;
        }
        if view.notice != last_notice {
            if let Some(notice) = &view.notice {
                println!("-- {notice}");
            }
            last_notice.clone_from(&view.notice);
        }
    }
}
