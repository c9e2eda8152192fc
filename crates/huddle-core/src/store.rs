//! Canonical client mirror of the server's mailbox state.
//!
//! The store is owned by a single task. Every primitive runs to completion
//! synchronously, so readers never observe a half-applied mutation. Each
//! effective change bumps a version counter that is published on a `watch`
//! channel for observers and used to key derived caches.

use tokio::sync::watch;
use tracing::debug;

use crate::types::{AgentInfo, AgentPatch, DashboardData, Message};

/// Outcome of a single store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// The whole dataset was swapped out.
    Replaced,
    /// A message id that was not present before was added.
    Inserted,
    /// An existing record was modified.
    Updated,
    /// The mutation matched a record but changed nothing.
    Unchanged,
    /// The target record does not exist; nothing was done.
    NotFound,
}

impl StoreChange {
    pub fn is_change(self) -> bool {
        matches!(
            self,
            StoreChange::Replaced | StoreChange::Inserted | StoreChange::Updated
        )
    }
}

#[derive(Debug)]
pub struct StateStore {
    data: DashboardData,
    version: u64,
    changes: watch::Sender<u64>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            data: DashboardData::default(),
            version: 0,
            changes,
        }
    }

    pub fn data(&self) -> &DashboardData {
        &self.data
    }

    pub fn messages(&self) -> &[Message] {
        &self.data.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.data.messages.iter().find(|m| m.id == id)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentInfo> {
        self.data.agents.iter().find(|a| a.name == name)
    }

    /// Monotonic counter bumped on every effective change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Receiver that observes the latest store version.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Wholesale replacement, used for `state_sync`.
    pub fn replace(&mut self, data: DashboardData) -> StoreChange {
        debug!(
            messages = data.messages.len(),
            agents = data.agents.len(),
            "store replaced"
        );
        self.data = data;
        self.bump();
        StoreChange::Replaced
    }

    /// Replace-by-id, or insert at the head and count it.
    ///
    /// Applying the same message twice leaves the store as if it were
    /// applied once.
    pub fn upsert_message(&mut self, message: Message) -> StoreChange {
        if let Some(existing) = self.data.messages.iter_mut().find(|m| m.id == message.id) {
            if *existing == message {
                return StoreChange::Unchanged;
            }
            *existing = message;
            self.bump();
            return StoreChange::Updated;
        }

        self.data.messages.insert(0, message);
        self.data.stats.total_messages += 1;
        self.bump();
        StoreChange::Inserted
    }

    /// Edit an existing message in place. Unknown ids are left alone.
    pub fn update_message(&mut self, id: &str, edit: impl FnOnce(&mut Message)) -> StoreChange {
        let Some(existing) = self.data.messages.iter_mut().find(|m| m.id == id) else {
            return StoreChange::NotFound;
        };

        let mut edited = existing.clone();
        edit(&mut edited);
        if edited == *existing {
            return StoreChange::Unchanged;
        }
        *existing = edited;
        self.bump();
        StoreChange::Updated
    }

    /// Apply the same edit to each listed message in one version step.
    pub fn update_messages(
        &mut self,
        ids: &[String],
        mut edit: impl FnMut(&mut Message),
    ) -> StoreChange {
        let mut changed = false;
        for message in self
            .data
            .messages
            .iter_mut()
            .filter(|m| ids.contains(&m.id))
        {
            let before = message.clone();
            edit(message);
            changed |= *message != before;
        }

        if changed {
            self.bump();
            StoreChange::Updated
        } else {
            StoreChange::Unchanged
        }
    }

    /// Shallow-merge onto a known agent. Never creates an agent record.
    pub fn patch_agent(&mut self, name: &str, patch: &AgentPatch) -> StoreChange {
        let Some(agent) = self.data.agents.iter_mut().find(|a| a.name == name) else {
            debug!(agent = name, "ignoring patch for unknown agent");
            return StoreChange::NotFound;
        };

        let before = agent.clone();
        patch.apply_to(agent);
        if *agent == before {
            return StoreChange::Unchanged;
        }
        self.bump();
        StoreChange::Updated
    }

    pub fn set_agent_online(&mut self, name: &str, is_online: bool) -> StoreChange {
        self.patch_agent(name, &AgentPatch::online(is_online))
    }

    fn bump(&mut self) {
        self.version += 1;
        self.changes.send_replace(self.version);
    }
}
