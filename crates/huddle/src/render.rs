//! Plain-text rendering of mailroom state for the terminal.

use std::collections::HashMap;
use std::fmt::Write as _;

use huddle_core::{Message, ReplyNode, Thread, ThreadDetail};
use huddle_sync::{MailroomEvent, ToastKind};

pub(crate) fn thread_line(thread: &Thread) -> String {
    let state = if thread.has_open() {
        "open"
    } else if thread.has_in_progress() {
        "active"
    } else {
        "done"
    };
    let severity = thread.worst_severity().map_or("-", |s| s.as_str());
    let subject = if thread.subject().is_empty() {
        "(no subject)"
    } else {
        thread.subject()
    };
    format!(
        "{:<14} {state:<6} {severity:<8} {:>3}  {subject}  [{}]",
        thread.id(),
        thread.len(),
        thread.participants().join(", ")
    )
}

/// Whether every member of the thread is archived.
pub(crate) fn fully_archived(thread: &Thread) -> bool {
    thread.messages().iter().all(|m| m.archived)
}

pub(crate) fn thread_detail(detail: &ThreadDetail) -> String {
    let by_id: HashMap<&str, &Message> = detail
        .messages
        .iter()
        .chain(std::iter::once(&detail.root_message))
        .map(|m| (m.id.as_str(), m))
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "thread {}: {}", detail.thread_id, detail.root_message.subject);
    let _ = writeln!(out, "participants: {}", detail.participants.join(", "));
    for node in &detail.reply_tree {
        write_node(&mut out, node, &by_id);
    }
    out
}

fn write_node(out: &mut String, node: &ReplyNode, by_id: &HashMap<&str, &Message>) {
    let indent = "  ".repeat(node.depth);
    match by_id.get(node.id.as_str()) {
        Some(m) => {
            let _ = writeln!(
                out,
                "{indent}- {} {} -> {} [{}] {}",
                m.id, m.from_agent, m.to_agent, m.status, m.date
            );
        }
        None => {
            let _ = writeln!(out, "{indent}- {}", node.id);
        }
    }
}

/// One line per event worth showing; store echoes that changed nothing are
/// skipped.
pub(crate) fn event_line(event: &MailroomEvent) -> Option<String> {
    let line = match event {
        MailroomEvent::Connected => "connected".to_owned(),
        MailroomEvent::Offline { reason, retry_in } => {
            format!("offline ({reason}), retrying in {}s", retry_in.as_secs_f32())
        }
        MailroomEvent::Synced { messages } => format!("synced {messages} messages"),
        MailroomEvent::MessageChanged { id, change } => {
            if !change.is_change() {
                return None;
            }
            format!("message {id} {change:?}").to_lowercase()
        }
        MailroomEvent::AgentChanged { name, change } => {
            if !change.is_change() {
                return None;
            }
            format!("agent {name} updated")
        }
        MailroomEvent::Note { note, updated } => {
            let verb = if *updated { "updated" } else { "added" };
            format!("note {} {verb}", note.id)
        }
        MailroomEvent::Toast(toast) => match toast.kind {
            ToastKind::Success => format!("✓ {}", toast.text),
            ToastKind::Error => format!("✗ {}", toast.text),
        },
        MailroomEvent::ToastsExpired { .. } => return None,
        MailroomEvent::Settled {
            label, error: None, ..
        } => format!("{label} confirmed"),
        MailroomEvent::Settled {
            label,
            error: Some(error),
            ..
        } => format!("{label} failed: {error}"),
        MailroomEvent::ThreadLoaded { thread_id } => format!("thread {thread_id} loaded"),
        MailroomEvent::ThreadFetchFailed { thread_id, error } => {
            format!("thread {thread_id} unavailable: {error}")
        }
    };
    Some(line)
}
