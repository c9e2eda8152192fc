use huddle_core::threads::find_thread;
use huddle_core::{ReparentRequest, Thread};

/// A resolved thread merge: the dragged thread's root becomes a reply to the
/// target thread's latest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub request: ReparentRequest,
    pub dragged_subject: String,
    pub target_subject: String,
}

impl MergePlan {
    /// `None` when either id is not a current thread, or when a thread would
    /// be merged into itself.
    pub fn new(threads: &[Thread], dragged_id: &str, target_id: &str) -> Option<Self> {
        if dragged_id == target_id {
            return None;
        }
        let dragged = find_thread(threads, dragged_id)?;
        let target = find_thread(threads, target_id)?;

        Some(Self {
            request: ReparentRequest {
                message_id: dragged.root().id.clone(),
                in_reply_to: target.latest().id.clone(),
                thread_id: target.id().to_owned(),
            },
            dragged_subject: dragged.subject().to_owned(),
            target_subject: target.subject().to_owned(),
        })
    }
}

pub(crate) fn merge_success_text(dragged_subject: &str, target_subject: &str) -> String {
    format!("Merged \"{dragged_subject}\" into \"{target_subject}\"")
}

pub(crate) fn merge_failure_text(dragged_subject: &str, error: &str) -> String {
    format!("Could not merge \"{dragged_subject}\": {error}")
}
