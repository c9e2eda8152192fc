use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use huddle_core::{MessageStatus, RoutingField};

#[derive(Parser)]
#[command(name = "huddle", version, about = "Huddle: multi-agent mailbox sync client")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Mirror the mailbox and print every change until interrupted.
    Watch,
    /// Print the current threads, newest activity first.
    Threads {
        /// Include threads whose messages are all archived.
        #[arg(long)]
        archived: bool,
    },
    /// Set one message's workflow status.
    Status {
        message_id: String,
        /// open, in_progress, resolved or closed
        status: MessageStatus,
    },
    /// Change a message's sender or recipient.
    Route {
        message_id: String,
        /// from or to
        field: RoutingField,
        agent: String,
    },
    /// Resolve every open message in the given threads.
    ResolveThread {
        #[arg(required = true)]
        thread_ids: Vec<String>,
    },
    /// Archive (or restore) every message in the given threads.
    ArchiveThread {
        #[arg(required = true)]
        thread_ids: Vec<String>,
        #[arg(long)]
        unarchive: bool,
    },
    /// Make one thread a reply within another.
    Merge {
        /// Thread to move.
        dragged: String,
        /// Thread to merge into.
        target: String,
    },
    /// Send, or schedule, a new message.
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        cc: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long = "type", default_value = "message")]
        message_type: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long)]
        thread: Option<String>,
        /// RFC 3339 timestamp to deliver at.
        #[arg(long, value_parser = parse_send_at)]
        send_at: Option<DateTime<Utc>>,
        /// Remind the sender if there is no reply after this many minutes.
        #[arg(long)]
        remind_after: Option<u32>,
    },
    /// Fetch and print one thread with its reply tree.
    Thread { thread_id: String },
    /// Validate the config file without connecting.
    Check {
        /// Output format: human (default) or json
        #[arg(long, default_value = "human")]
        format: String,
    },
    Version,
}

fn parse_send_at(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| format!("invalid RFC 3339 timestamp '{value}': {error}"))
}
