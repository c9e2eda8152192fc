//! The state-owning event loop.
//!
//! `Mailroom` owns the store and is the only thing that mutates it. Push
//! envelopes and request completions are applied one at a time from
//! `next_event()`; user operations are plain `&mut self` methods called
//! between events. Nothing here takes a lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use huddle_core::{
    BulkArchiveUpdate, BulkStatusUpdate, ComposeRequest, MailboxApi, MessageStatus, Note,
    RoutingField, RoutingUpdate, StateStore, StatusUpdate, StoreChange, Thread, ThreadDetail,
    ThreadView,
};
use huddle_ipc::{
    ConnectionEvent, ConnectionManager, ConnectionState, ReconnectPolicy, ServerMessage,
    Transport,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bulk;
use crate::merge::{MergePlan, merge_failure_text, merge_success_text};
use crate::reconcile::{Completion, FollowUp, Mutation, ReconciliationEngine, Settlement};
use crate::toast::{DEFAULT_TOAST_TTL, Toast, ToastKind, ToastQueue};

#[derive(Debug, Clone)]
pub struct MailroomOptions {
    pub reconnect: ReconnectPolicy,
    pub toast_ttl: Duration,
}

impl Default for MailroomOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            toast_ttl: DEFAULT_TOAST_TTL,
        }
    }
}

/// Something the owner of a `Mailroom` may want to render or log.
#[derive(Debug, Clone, PartialEq)]
pub enum MailroomEvent {
    Connected,
    Offline {
        reason: String,
        retry_in: Duration,
    },
    /// A `state_sync` replaced the store.
    Synced {
        messages: usize,
    },
    MessageChanged {
        id: String,
        change: StoreChange,
    },
    AgentChanged {
        name: String,
        change: StoreChange,
    },
    Note {
        note: Note,
        updated: bool,
    },
    Toast(Toast),
    /// Toasts timed out and were removed from the queue.
    ToastsExpired {
        dismissed: usize,
    },
    Settled {
        request_id: Uuid,
        label: &'static str,
        error: Option<String>,
    },
    ThreadLoaded {
        thread_id: String,
    },
    ThreadFetchFailed {
        thread_id: String,
        error: String,
    },
}

pub struct Mailroom {
    store: StateStore,
    threads: ThreadView,
    connection: ConnectionManager,
    engine: ReconciliationEngine,
    toasts: ToastQueue,
    open_thread: Option<ThreadDetail>,
    pending_thread: Option<String>,
    pending: VecDeque<MailroomEvent>,
}

impl std::fmt::Debug for Mailroom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailroom")
            .field("connection", &self.connection)
            .field("store_version", &self.store.version())
            .field("in_flight", &self.engine.in_flight())
            .finish_non_exhaustive()
    }
}

impl Mailroom {
    pub fn new(
        transport: Arc<dyn Transport>,
        api: Arc<dyn MailboxApi>,
        options: MailroomOptions,
    ) -> Self {
        Self {
            store: StateStore::new(),
            threads: ThreadView::new(),
            connection: ConnectionManager::new(transport, options.reconnect),
            engine: ReconciliationEngine::new(api),
            toasts: ToastQueue::new(options.toast_ttl),
            open_thread: None,
            pending_thread: None,
            pending: VecDeque::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Current threads, recomputed only when the store changed.
    pub fn threads(&mut self) -> &[Thread] {
        self.threads.threads(&self.store)
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    pub fn open_thread(&self) -> Option<&ThreadDetail> {
        self.open_thread.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn in_flight(&self) -> usize {
        self.engine.in_flight()
    }

    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Tear down: close the link, cancel any reconnect, and abandon
    /// in-flight requests. Late results from this run are dropped.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.engine.cancel_all();
        self.pending_thread = None;
        self.pending.clear();
    }

    /// Ask the server for a fresh `state_sync`.
    pub fn request_sync(&self) -> bool {
        self.connection.request_sync()
    }

    pub fn set_status(&mut self, message_id: &str, status: MessageStatus) -> Result<Uuid> {
        self.require_message(message_id)?;
        Ok(self.submit(
            Mutation::SetStatus(StatusUpdate {
                message_id: message_id.to_owned(),
                status,
            }),
            FollowUp::Edit,
        ))
    }

    pub fn set_routing(
        &mut self,
        message_id: &str,
        field: RoutingField,
        value: &str,
    ) -> Result<Uuid> {
        self.require_message(message_id)?;
        if value.trim().is_empty() {
            bail!("routing value must not be empty");
        }
        Ok(self.submit(
            Mutation::SetRouting(RoutingUpdate {
                message_id: message_id.to_owned(),
                field,
                value: value.trim().to_owned(),
            }),
            FollowUp::Edit,
        ))
    }

    /// Resolve every unsettled message of the listed threads in one request.
    /// Returns `None` when there is nothing to resolve.
    pub fn resolve_threads(&mut self, thread_ids: &[String]) -> Option<Uuid> {
        let message_ids = bulk::resolve_targets(self.threads.threads(&self.store), thread_ids);
        if message_ids.is_empty() {
            debug!(?thread_ids, "nothing to resolve");
            return None;
        }
        Some(self.submit(
            Mutation::BulkStatus(BulkStatusUpdate {
                message_ids,
                status: MessageStatus::Resolved,
            }),
            FollowUp::Edit,
        ))
    }

    pub fn archive_threads(&mut self, thread_ids: &[String], archived: bool) -> Option<Uuid> {
        let message_ids =
            bulk::archive_targets(self.threads.threads(&self.store), thread_ids, archived);
        if message_ids.is_empty() {
            debug!(?thread_ids, archived, "nothing to archive");
            return None;
        }
        Some(self.submit(
            Mutation::BulkArchive(BulkArchiveUpdate {
                message_ids,
                archived,
            }),
            FollowUp::Edit,
        ))
    }

    /// Merge `dragged_id` into `target_id`. No local change is made; the
    /// store only moves once the server confirms and a resync arrives.
    pub fn merge_threads(&mut self, dragged_id: &str, target_id: &str) -> Option<Uuid> {
        let Some(plan) = MergePlan::new(self.threads.threads(&self.store), dragged_id, target_id)
        else {
            debug!(dragged_id, target_id, "merge ignored, thread not found");
            return None;
        };
        let MergePlan {
            request,
            dragged_subject,
            target_subject,
        } = plan;
        info!(
            message_id = %request.message_id,
            in_reply_to = %request.in_reply_to,
            thread_id = %request.thread_id,
            "merging threads"
        );
        Some(self.submit(
            Mutation::Reparent(request),
            FollowUp::Merge {
                dragged_subject,
                target_subject,
            },
        ))
    }

    pub fn send_message(&mut self, request: ComposeRequest) -> Result<Uuid> {
        if request.from_agent.trim().is_empty() || request.to_agent.trim().is_empty() {
            bail!("a message needs both a sender and a recipient");
        }
        let subject = request.subject.clone();
        Ok(self.submit(Mutation::Send(request), FollowUp::Compose { subject }))
    }

    /// Fetch a thread for detail display. Only the most recent request is
    /// kept; earlier answers are ignored when they arrive.
    pub fn load_thread(&mut self, thread_id: &str) {
        self.pending_thread = Some(thread_id.to_owned());
        self.engine
            .fetch_thread(self.connection.generation(), thread_id);
    }

    pub fn close_thread(&mut self) {
        self.pending_thread = None;
        self.open_thread = None;
    }

    /// Apply the next inbound envelope or completion and report it.
    ///
    /// Returns `None` only if the connection task went away underneath us.
    pub async fn next_event(&mut self) -> Option<MailroomEvent> {
        loop {
            let dismissed = self.toasts.prune(Instant::now());
            if dismissed > 0 {
                self.pending.push_back(MailroomEvent::ToastsExpired { dismissed });
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let expiry = self.toasts.next_expiry();
            tokio::select! {
                () = wait_until(expiry) => {}
                event = self.connection.next_event() => match event {
                    Some(event) => self.on_connection_event(event),
                    None => return None,
                },
                Some(completion) = self.engine.next_completion() => {
                    self.on_completion(completion);
                }
            }
        }
    }

    fn require_message(&self, message_id: &str) -> Result<()> {
        if self.store.message(message_id).is_none() {
            bail!("unknown message: {message_id}");
        }
        Ok(())
    }

    fn submit(&mut self, mutation: Mutation, follow_up: FollowUp) -> Uuid {
        let generation = self.connection.generation();
        self.engine
            .submit(&mut self.store, generation, mutation, follow_up)
    }

    fn toast(&mut self, kind: ToastKind, text: String) {
        let toast = self.toasts.push(kind, text);
        self.pending.push_back(MailroomEvent::Toast(toast));
    }

    fn resync(&self, why: &str) {
        if self.connection.request_sync() {
            info!(why, "full resync requested");
        } else {
            warn!(why, "resync deferred until the push channel reconnects");
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.pending.push_back(MailroomEvent::Connected),
            ConnectionEvent::Offline { reason, retry_in } => self
                .pending
                .push_back(MailroomEvent::Offline { reason, retry_in }),
            ConnectionEvent::Message(message) => self.apply(message),
        }
    }

    fn apply(&mut self, message: ServerMessage) {
        let event = match message {
            ServerMessage::StateSync(data) => {
                let messages = data.messages.len();
                self.store.replace(data);
                MailroomEvent::Synced { messages }
            }
            ServerMessage::MessageAdded(message) | ServerMessage::MessageUpdated(message) => {
                let id = message.id.clone();
                let change = self.store.upsert_message(message);
                MailroomEvent::MessageChanged { id, change }
            }
            ServerMessage::StatusChanged { agent, status } => {
                let change = self.store.patch_agent(&agent, &status);
                MailroomEvent::AgentChanged {
                    name: agent,
                    change,
                }
            }
            ServerMessage::AgentOnline { agent, is_online } => {
                let change = self.store.set_agent_online(&agent, is_online);
                MailroomEvent::AgentChanged {
                    name: agent,
                    change,
                }
            }
            ServerMessage::NoteAdded(note) => MailroomEvent::Note {
                note,
                updated: false,
            },
            ServerMessage::NoteUpdated(note) => MailroomEvent::Note {
                note,
                updated: true,
            },
            ServerMessage::Error { message, code } => {
                warn!(error = %message, code = code.as_deref().unwrap_or(""), "server error");
                let text = match code {
                    Some(code) => format!("Server error ({code}): {message}"),
                    None => format!("Server error: {message}"),
                };
                self.toast(ToastKind::Error, text);
                return;
            }
        };
        self.pending.push_back(event);
    }

    fn on_completion(&mut self, completion: Completion) {
        let generation = self.connection.generation();
        if completion.generation() != generation {
            debug!(
                stale = completion.generation(),
                current = generation,
                "dropping completion from a previous run"
            );
            return;
        }

        match completion {
            Completion::Settled(settlement) => self.on_settled(settlement),
            Completion::ThreadFetched {
                thread_id, result, ..
            } => {
                if self.pending_thread.as_deref() != Some(thread_id.as_str()) {
                    debug!(thread_id = %thread_id, "dropping superseded thread fetch");
                    return;
                }
                self.pending_thread = None;
                match result {
                    Ok(detail) => {
                        self.open_thread = Some(detail);
                        self.pending
                            .push_back(MailroomEvent::ThreadLoaded { thread_id });
                    }
                    Err(error) => {
                        warn!(thread_id = %thread_id, error = %error, "thread fetch failed");
                        self.pending
                            .push_back(MailroomEvent::ThreadFetchFailed { thread_id, error });
                    }
                }
            }
        }
    }

    fn on_settled(&mut self, settlement: Settlement) {
        let Settlement {
            request_id,
            mutation,
            follow_up,
            outcome,
            ..
        } = settlement;
        let label = mutation.label();
        self.pending.push_back(MailroomEvent::Settled {
            request_id,
            label,
            error: outcome.as_ref().err().cloned(),
        });

        match (&follow_up, &outcome) {
            (FollowUp::Edit, Ok(())) => debug!(%request_id, label, "mutation confirmed"),
            (FollowUp::Edit, Err(error)) => {
                warn!(%request_id, label, error = %error, "mutation failed");
                self.resync(label);
            }
            (
                FollowUp::Merge {
                    dragged_subject,
                    target_subject,
                },
                Ok(()),
            ) => {
                self.resync(label);
                self.toast(
                    ToastKind::Success,
                    merge_success_text(dragged_subject, target_subject),
                );
            }
            (
                FollowUp::Merge {
                    dragged_subject, ..
                },
                Err(error),
            ) => {
                warn!(%request_id, error = %error, "thread merge failed");
                self.toast(ToastKind::Error, merge_failure_text(dragged_subject, error));
            }
            (FollowUp::Compose { .. }, Ok(())) => debug!(%request_id, "message accepted"),
            (FollowUp::Compose { subject }, Err(error)) => {
                warn!(%request_id, error = %error, "send failed");
                self.toast(
                    ToastKind::Error,
                    format!("Could not send \"{subject}\": {error}"),
                );
                self.resync(label);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Drop for Mailroom {
    fn drop(&mut self) {
        self.disconnect();
    }
}
