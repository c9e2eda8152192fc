#![allow(clippy::print_stdout, clippy::print_stderr)] // CLI binary: stdout/stderr is the UI

mod cli;
mod config;
mod config_check;
mod render;
mod tracing_setup;

use anyhow::{Context, Result, bail};
use clap::Parser;
use huddle_core::{ComposeRequest, MailboxApi};
use huddle_ipc::{Transport, WsTransport};
use huddle_sync::{HttpMailboxApi, Mailroom, MailroomEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cli::{Cli, Commands};
use crate::config::Config;

const SYNC_TIMEOUT: Duration = Duration::from_secs(15);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = tracing_setup::init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "huddle starting"
    );

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Check { format } => cmd_check(config_path, &format),
        Commands::Watch => cmd_watch(config_path).await,
        Commands::Threads { archived } => cmd_threads(config_path, archived).await,
        Commands::Status { message_id, status } => {
            let mut mailroom = synced_mailroom(config_path).await?;
            let request_id = mailroom.set_status(&message_id, status)?;
            await_settlement(&mut mailroom, request_id).await
        }
        Commands::Route {
            message_id,
            field,
            agent,
        } => {
            let mut mailroom = synced_mailroom(config_path).await?;
            let request_id = mailroom.set_routing(&message_id, field, &agent)?;
            await_settlement(&mut mailroom, request_id).await
        }
        Commands::ResolveThread { thread_ids } => {
            let mut mailroom = synced_mailroom(config_path).await?;
            match mailroom.resolve_threads(&thread_ids) {
                Some(request_id) => await_settlement(&mut mailroom, request_id).await,
                None => {
                    println!("nothing to resolve");
                    Ok(())
                }
            }
        }
        Commands::ArchiveThread {
            thread_ids,
            unarchive,
        } => {
            let mut mailroom = synced_mailroom(config_path).await?;
            match mailroom.archive_threads(&thread_ids, !unarchive) {
                Some(request_id) => await_settlement(&mut mailroom, request_id).await,
                None => {
                    println!("nothing to change");
                    Ok(())
                }
            }
        }
        Commands::Merge { dragged, target } => {
            let mut mailroom = synced_mailroom(config_path).await?;
            match mailroom.merge_threads(&dragged, &target) {
                Some(request_id) => await_settlement(&mut mailroom, request_id).await,
                None => {
                    println!("nothing to merge");
                    Ok(())
                }
            }
        }
        Commands::Send {
            from,
            to,
            cc,
            subject,
            message_type,
            content,
            reply_to,
            thread,
            send_at,
            remind_after,
        } => {
            let request = ComposeRequest {
                from_agent: from,
                to_agent: to,
                cc,
                subject,
                message_type,
                content,
                in_reply_to: reply_to,
                thread_id: thread,
                send_at,
                remind_after_minutes: remind_after,
            };
            let mut mailroom = build_mailroom(&load_config(config_path)?)?;
            let request_id = mailroom.send_message(request)?;
            await_settlement(&mut mailroom, request_id).await
        }
        Commands::Thread { thread_id } => cmd_thread(config_path, &thread_id).await,
        Commands::Version => {
            println!("huddle {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// cmd_check: validate config without connecting
// ---------------------------------------------------------------------------

#[allow(clippy::unnecessary_wraps)] // must return Result to match main's match arms
fn cmd_check(config_path: Option<&str>, format: &str) -> Result<()> {
    let config_file = Config::find_config_path(config_path);
    let report = config_check::validate_config(&config_file);

    match format {
        "json" => report.print_json(),
        _ => report.print_human(),
    }

    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config_file = Config::find_config_path(config_path);
    debug!(path = %config_file.display(), "loading config");
    Config::load_or_default(&config_file)
}

fn build_mailroom(config: &Config) -> Result<Mailroom> {
    let push_url = config.push_url();
    info!(api_url = %config.server.api_url, %push_url, "connecting");
    let transport = Arc::new(WsTransport::new(push_url)) as Arc<dyn Transport>;
    let api = Arc::new(HttpMailboxApi::new(
        &config.server.api_url,
        config.request_timeout(),
    )?) as Arc<dyn MailboxApi>;
    Ok(Mailroom::new(transport, api, config.mailroom_options()))
}

/// Connect and wait for the first full snapshot.
async fn synced_mailroom(config_path: Option<&str>) -> Result<Mailroom> {
    let mut mailroom = build_mailroom(&load_config(config_path)?)?;
    mailroom.connect();

    let wait = async {
        loop {
            match mailroom.next_event().await {
                Some(MailroomEvent::Synced { messages }) => {
                    debug!(messages, "initial sync complete");
                    return Ok(());
                }
                Some(MailroomEvent::Offline { reason, retry_in }) => {
                    eprintln!(
                        "push channel unavailable ({reason}), retrying in {:.1}s",
                        retry_in.as_secs_f32()
                    );
                }
                Some(_) => {}
                None => bail!("push channel closed before the first sync"),
            }
        }
    };
    tokio::time::timeout(SYNC_TIMEOUT, wait)
        .await
        .context("timed out waiting for the first sync")??;
    Ok(mailroom)
}

/// Run the mailroom until `request_id` settles, then print its outcome and
/// any notifications it raised.
async fn await_settlement(mailroom: &mut Mailroom, request_id: Uuid) -> Result<()> {
    let wait = async {
        loop {
            match mailroom.next_event().await {
                Some(MailroomEvent::Settled {
                    request_id: settled,
                    label,
                    error,
                }) if settled == request_id => return Ok((label, error)),
                Some(event) => debug!(?event, "event while waiting for settlement"),
                None => bail!("mailroom stopped before the request settled"),
            }
        }
    };
    let (label, error) = tokio::time::timeout(SETTLE_TIMEOUT, wait)
        .await
        .context("timed out waiting for the server")??;

    for toast in mailroom.toasts().visible(Instant::now()) {
        if toast.is_error() {
            eprintln!("{}", toast.text);
        } else {
            println!("{}", toast.text);
        }
    }
    mailroom.disconnect();

    match error {
        Some(error) => bail!("{label} failed: {error}"),
        None => {
            println!("{label} ok");
            Ok(())
        }
    }
}

async fn cmd_watch(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let mut mailroom = build_mailroom(&config)?;
    mailroom.connect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = mailroom.next_event() => match event {
                Some(event) => {
                    if let Some(line) = render::event_line(&event) {
                        println!("{line}");
                    }
                }
                None => {
                    warn!("push channel task ended");
                    break;
                }
            }
        }
    }

    mailroom.disconnect();
    Ok(())
}

async fn cmd_threads(config_path: Option<&str>, include_archived: bool) -> Result<()> {
    let mut mailroom = synced_mailroom(config_path).await?;
    let mut shown = 0usize;
    for thread in mailroom.threads() {
        if !include_archived && render::fully_archived(thread) {
            continue;
        }
        println!("{}", render::thread_line(thread));
        shown += 1;
    }
    if shown == 0 {
        println!("no threads");
    }
    mailroom.disconnect();
    Ok(())
}

async fn cmd_thread(config_path: Option<&str>, thread_id: &str) -> Result<()> {
    let mut mailroom = build_mailroom(&load_config(config_path)?)?;
    mailroom.load_thread(thread_id);

    let wait = async {
        loop {
            match mailroom.next_event().await {
                Some(MailroomEvent::ThreadLoaded { .. }) => return Ok(()),
                Some(MailroomEvent::ThreadFetchFailed { thread_id, error }) => {
                    bail!("could not load thread {thread_id}: {error}")
                }
                Some(_) => {}
                None => bail!("mailroom stopped before the thread loaded"),
            }
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, wait)
        .await
        .context("timed out loading the thread")??;

    if let Some(detail) = mailroom.open_thread() {
        print!("{}", render::thread_detail(detail));
    }
    Ok(())
}
