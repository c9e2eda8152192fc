//! Optimistic apply, network confirm, resync on doubt.
//!
//! The engine patches the store synchronously, then runs the matching API
//! call on a spawned task. The outcome comes back as a `Completion` on the
//! owner's loop; the engine itself never touches the store after submit and
//! keeps no shadow values to roll back to.

use std::sync::Arc;

use anyhow::Result;
use huddle_core::{
    BulkArchiveUpdate, BulkStatusUpdate, ComposeRequest, MailboxApi, ReparentRequest,
    RoutingUpdate, StateStore, StatusUpdate, StoreChange, ThreadDetail,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

/// One user-initiated server mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetStatus(StatusUpdate),
    SetRouting(RoutingUpdate),
    BulkStatus(BulkStatusUpdate),
    BulkArchive(BulkArchiveUpdate),
    Reparent(ReparentRequest),
    Send(ComposeRequest),
}

impl Mutation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetStatus(_) => "set_status",
            Self::SetRouting(_) => "set_routing",
            Self::BulkStatus(_) => "bulk_status",
            Self::BulkArchive(_) => "bulk_archive",
            Self::Reparent(_) => "reparent",
            Self::Send(_) => "send",
        }
    }

    /// Field-level edits are applied locally before the server confirms.
    /// Reparenting and sending wait for the server.
    pub fn is_optimistic(&self) -> bool {
        !matches!(self, Self::Reparent(_) | Self::Send(_))
    }

    pub fn apply_optimistic(&self, store: &mut StateStore) -> StoreChange {
        match self {
            Self::SetStatus(update) => {
                store.update_message(&update.message_id, |m| m.status = update.status)
            }
            Self::SetRouting(update) => {
                store.update_message(&update.message_id, |m| update.apply_to(m))
            }
            Self::BulkStatus(update) => {
                store.update_messages(&update.message_ids, |m| m.status = update.status)
            }
            Self::BulkArchive(update) => {
                store.update_messages(&update.message_ids, |m| m.archived = update.archived)
            }
            Self::Reparent(_) | Self::Send(_) => StoreChange::Unchanged,
        }
    }

    async fn submit(&self, api: &dyn MailboxApi) -> Result<()> {
        match self {
            Self::SetStatus(update) => api.set_status(update).await,
            Self::SetRouting(update) => api.set_routing(update).await,
            Self::BulkStatus(update) => api.bulk_status(update).await,
            Self::BulkArchive(update) => api.bulk_archive(update).await,
            Self::Reparent(request) => api.reparent(request).await,
            Self::Send(request) => api.send_message(request).await,
        }
    }
}

/// What the owner should do once a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Field edit: nothing on success, full resync on failure.
    Edit,
    /// Thread merge: resync and announce on success, error toast only on
    /// failure.
    Merge {
        dragged_subject: String,
        target_subject: String,
    },
    /// New message: the server pushes it on success; failure is announced
    /// and resynced.
    Compose { subject: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub generation: u64,
    pub request_id: Uuid,
    pub mutation: Mutation,
    pub follow_up: FollowUp,
    /// `Err` holds the rendered failure chain.
    pub outcome: Result<(), String>,
}

impl Settlement {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Settled(Settlement),
    ThreadFetched {
        generation: u64,
        thread_id: String,
        result: Result<ThreadDetail, String>,
    },
}

impl Completion {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Settled(settlement) => settlement.generation,
            Self::ThreadFetched { generation, .. } => *generation,
        }
    }
}

pub struct ReconciliationEngine {
    api: Arc<dyn MailboxApi>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    cancel: CancellationToken,
    in_flight: usize,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    pub fn new(api: Arc<dyn MailboxApi>) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            api,
            completions_tx,
            completions,
            cancel: CancellationToken::new(),
            in_flight: 0,
        }
    }

    /// Apply `mutation` locally (if optimistic) and send it to the server.
    pub fn submit(
        &mut self,
        store: &mut StateStore,
        generation: u64,
        mutation: Mutation,
        follow_up: FollowUp,
    ) -> Uuid {
        let request_id = Uuid::new_v4();
        let label = mutation.label();
        if mutation.is_optimistic() {
            let change = mutation.apply_optimistic(store);
            debug!(%request_id, label, ?change, "optimistic apply");
        }

        let api = Arc::clone(&self.api);
        let tx = self.completions_tx.clone();
        let cancel = self.cancel.clone();
        let span = info_span!("mutation", %request_id, label, generation);
        self.in_flight += 1;

        tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    outcome = mutation.submit(api.as_ref()) => outcome,
                    () = cancel.cancelled() => {
                        debug!("mutation abandoned");
                        return;
                    }
                };
                let _ = tx.send(Completion::Settled(Settlement {
                    generation,
                    request_id,
                    mutation,
                    follow_up,
                    outcome: outcome.map_err(|error| format!("{error:#}")),
                }));
            }
            .instrument(span),
        );
        request_id
    }

    /// Read-only thread fetch. Never touches the store.
    pub fn fetch_thread(&mut self, generation: u64, thread_id: &str) {
        let api = Arc::clone(&self.api);
        let tx = self.completions_tx.clone();
        let cancel = self.cancel.clone();
        let thread_id = thread_id.to_owned();
        let span = info_span!("thread_fetch", thread_id = %thread_id, generation);
        self.in_flight += 1;

        tokio::spawn(
            async move {
                let result = tokio::select! {
                    result = api.fetch_thread(&thread_id) => result,
                    () = cancel.cancelled() => return,
                };
                let _ = tx.send(Completion::ThreadFetched {
                    generation,
                    thread_id,
                    result: result.map_err(|error| format!("{error:#}")),
                });
            }
            .instrument(span),
        );
    }

    /// Next finished request. Pends while nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        let completion = self.completions.recv().await;
        self.in_flight = self.in_flight.saturating_sub(1);
        completion
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Abandon every in-flight request. Completions already queued are
    /// discarded with the old channel, so `in_flight` only counts requests
    /// submitted afterwards.
    pub fn cancel_all(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        self.completions_tx = completions_tx;
        self.completions = completions;
        self.in_flight = 0;
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::fakes::{ApiCall, FakeMailboxApi};
    use huddle_core::{DashboardData, Message, MessageStatus, RoutingField};

    fn store_with(messages: Vec<Message>) -> StateStore {
        let mut store = StateStore::new();
        store.replace(DashboardData {
            messages,
            ..DashboardData::default()
        });
        store
    }

    fn status(id: &str, status: MessageStatus) -> Mutation {
        Mutation::SetStatus(StatusUpdate {
            message_id: id.into(),
            status,
        })
    }

    #[tokio::test]
    async fn applies_before_the_server_answers() {
        let api = Arc::new(FakeMailboxApi::new());
        let mut engine = ReconciliationEngine::new(Arc::clone(&api) as Arc<dyn MailboxApi>);
        let mut store = store_with(vec![Message::new("m1", "qa", "coordinator", "1")]);

        engine.submit(
            &mut store,
            0,
            status("m1", MessageStatus::Resolved),
            FollowUp::Edit,
        );
        assert_eq!(store.message("m1").unwrap().status, MessageStatus::Resolved);
        assert_eq!(engine.in_flight(), 1);

        let Some(Completion::Settled(settlement)) = engine.next_completion().await else {
            panic!("expected settlement");
        };
        assert!(settlement.is_success());
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(
            api.calls(),
            vec![ApiCall::SetStatus(StatusUpdate {
                message_id: "m1".into(),
                status: MessageStatus::Resolved,
            })]
        );
    }

    #[tokio::test]
    async fn failure_keeps_optimistic_state() {
        let api = Arc::new(FakeMailboxApi::failing());
        let mut engine = ReconciliationEngine::new(api);
        let mut store = store_with(vec![Message::new("m1", "qa", "coordinator", "1")]);

        let id = engine.submit(
            &mut store,
            3,
            Mutation::SetRouting(RoutingUpdate {
                message_id: "m1".into(),
                field: RoutingField::To,
                value: "physics".into(),
            }),
            FollowUp::Edit,
        );

        let Some(Completion::Settled(settlement)) = engine.next_completion().await else {
            panic!("expected settlement");
        };
        assert_eq!(settlement.request_id, id);
        assert_eq!(settlement.generation, 3);
        assert!(settlement.outcome.unwrap_err().contains("rejected"));
        assert_eq!(store.message("m1").unwrap().to_agent, "physics");
    }

    #[tokio::test]
    async fn reparent_and_send_are_not_applied_locally() {
        let api = Arc::new(FakeMailboxApi::new());
        let mut engine = ReconciliationEngine::new(api);
        let mut store = store_with(vec![Message::new("m1", "qa", "coordinator", "1")]);
        let version = store.version();

        engine.submit(
            &mut store,
            0,
            Mutation::Reparent(ReparentRequest {
                message_id: "m1".into(),
                in_reply_to: "m9".into(),
                thread_id: "m9".into(),
            }),
            FollowUp::Edit,
        );
        assert_eq!(store.version(), version);
        assert!(store.message("m1").unwrap().thread_id.is_none());
        engine.next_completion().await.unwrap();
    }

    #[tokio::test]
    async fn bulk_archive_is_one_step() {
        let api = Arc::new(FakeMailboxApi::new());
        let mut engine = ReconciliationEngine::new(api);
        let mut store = store_with(vec![
            Message::new("m1", "qa", "coordinator", "1"),
            Message::new("m2", "qa", "coordinator", "2"),
            Message::new("m3", "qa", "coordinator", "3"),
        ]);
        let version = store.version();

        engine.submit(
            &mut store,
            0,
            Mutation::BulkArchive(BulkArchiveUpdate {
                message_ids: vec!["m1".into(), "m3".into()],
                archived: true,
            }),
            FollowUp::Edit,
        );
        assert_eq!(store.version(), version + 1);
        let archived: Vec<_> = store
            .messages()
            .iter()
            .filter(|m| m.archived)
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(archived, ["m1", "m3"]);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_without_store_access() {
        let api = Arc::new(FakeMailboxApi::new());
        let mut engine = ReconciliationEngine::new(api);

        engine.fetch_thread(1, "missing");
        let Some(Completion::ThreadFetched {
            thread_id, result, ..
        }) = engine.next_completion().await
        else {
            panic!("expected thread fetch");
        };
        assert_eq!(thread_id, "missing");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_all_discards_queued_completions() {
        let api = Arc::new(FakeMailboxApi::new());
        let mut engine = ReconciliationEngine::new(Arc::clone(&api) as Arc<dyn MailboxApi>);
        let mut store = store_with(vec![Message::new("m1", "qa", "coordinator", "1")]);

        engine.submit(
            &mut store,
            0,
            status("m1", MessageStatus::Resolved),
            FollowUp::Edit,
        );
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        engine.cancel_all();
        assert_eq!(engine.in_flight(), 0);

        engine.submit(
            &mut store,
            1,
            status("m1", MessageStatus::Closed),
            FollowUp::Edit,
        );
        assert_eq!(engine.in_flight(), 1);

        let completion = engine.next_completion().await.unwrap();
        assert_eq!(completion.generation(), 1);
        assert_eq!(engine.in_flight(), 0);
    }
}
