//! Message-id selection for thread-level bulk actions.

use huddle_core::{Message, Thread};
use huddle_core::threads::find_thread;

/// Members of the listed threads that are not yet resolved or closed.
///
/// Unknown thread ids are skipped. Order follows `thread_ids`, then date.
pub fn resolve_targets(threads: &[Thread], thread_ids: &[String]) -> Vec<String> {
    collect(threads, thread_ids, |m| !m.status.is_settled())
}

/// Members of the listed threads whose archived flag differs from `archived`.
pub fn archive_targets(threads: &[Thread], thread_ids: &[String], archived: bool) -> Vec<String> {
    collect(threads, thread_ids, |m| m.archived != archived)
}

fn collect(
    threads: &[Thread],
    thread_ids: &[String],
    wanted: impl Fn(&Message) -> bool,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for thread_id in thread_ids {
        let Some(thread) = find_thread(threads, thread_id) else {
            continue;
        };
        for message in thread.messages() {
            if wanted(message) && !ids.contains(&message.id) {
                ids.push(message.id.clone());
            }
        }
    }
    ids
}
