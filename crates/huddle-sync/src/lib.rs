pub mod api;
pub mod bulk;
pub mod mailroom;
pub mod merge;
pub mod reconcile;
pub mod toast;

pub use api::{DEFAULT_REQUEST_TIMEOUT, HttpMailboxApi, check_ack};
pub use mailroom::{Mailroom, MailroomEvent, MailroomOptions};
pub use merge::MergePlan;
pub use reconcile::{Completion, FollowUp, Mutation, ReconciliationEngine, Settlement};
pub use toast::{DEFAULT_TOAST_TTL, Toast, ToastKind, ToastQueue};
