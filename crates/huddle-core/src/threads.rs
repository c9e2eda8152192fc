//! Thread aggregation: a pure derivation from the flat message log.
//!
//! Threads are never stored. They are recomputed from the current messages
//! on every read; `ThreadView` only memoizes the result per store version.

use std::collections::{HashMap, HashSet};
use std::iter;

use crate::store::StateStore;
use crate::types::{Message, MessageStatus, ReplyNode, Severity};

/// A group of messages sharing a thread key, with derived summary fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    id: String,
    messages: Vec<Message>,
    participants: Vec<String>,
    worst_severity: Option<Severity>,
    has_open: bool,
    has_in_progress: bool,
}

impl Thread {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Members in ascending date order. Never empty.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Earliest message of the thread.
    pub fn root(&self) -> &Message {
        &self.messages[0]
    }

    /// Most recent message of the thread.
    pub fn latest(&self) -> &Message {
        &self.messages[self.messages.len() - 1]
    }

    pub fn subject(&self) -> &str {
        &self.root().subject
    }

    /// Distinct senders, recipients and cc'd agents, in first-seen order.
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.worst_severity
    }

    pub fn has_open(&self) -> bool {
        self.has_open
    }

    pub fn has_in_progress(&self) -> bool {
        self.has_in_progress
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }
}

/// Group `messages` into threads, newest activity first.
///
/// Total and deterministic: the same input always yields the same output.
/// Within a thread, equal dates keep their input order; threads whose latest
/// dates tie keep the order in which their keys first appeared.
pub fn aggregate(messages: &[Message]) -> Vec<Thread> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Message>> = HashMap::new();

    for message in messages {
        let key = message.thread_key();
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(message);
    }

    let mut threads: Vec<Thread> = order
        .into_iter()
        .filter_map(|key| groups.remove(key).map(|members| build_thread(key, members)))
        .collect();

    threads.sort_by(|a, b| b.latest().date.cmp(&a.latest().date));
    threads
}

fn build_thread(key: &str, mut members: Vec<&Message>) -> Thread {
    members.sort_by(|a, b| a.date.cmp(&b.date));

    let mut seen = HashSet::new();
    let mut participants = Vec::new();
    for message in &members {
        let names = iter::once(&message.from_agent)
            .chain(iter::once(&message.to_agent))
            .chain(message.cc.iter());
        for name in names {
            if seen.insert(name.as_str()) {
                participants.push(name.clone());
            }
        }
    }

    let worst_severity = members
        .iter()
        .filter_map(|m| m.severity)
        .max_by_key(|severity| severity.priority());
    let has_open = members.iter().any(|m| m.status == MessageStatus::Open);
    let has_in_progress = members
        .iter()
        .any(|m| m.status == MessageStatus::InProgress);

    Thread {
        id: key.to_owned(),
        messages: members.into_iter().cloned().collect(),
        participants,
        worst_severity,
        has_open,
        has_in_progress,
    }
}

pub fn find_thread<'t>(threads: &'t [Thread], id: &str) -> Option<&'t Thread> {
    threads.iter().find(|t| t.id == id)
}

/// Build the `in_reply_to` forest of a thread.
pub fn reply_tree(thread: &Thread) -> Vec<ReplyNode> {
    reply_forest(&thread.messages)
}

/// Flat depth-first `in_reply_to` forest over `messages`, in their order.
///
/// Messages replying to something outside the set, or to nothing, are
/// roots. Members caught in a reply cycle are promoted to roots so every
/// message appears exactly once. The walk keeps its own stack, so reply
/// depth is bounded only by memory.
pub fn reply_forest(messages: &[Message]) -> Vec<ReplyNode> {
    let ids: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots = Vec::new();

    for message in messages {
        match message.in_reply_to.as_deref() {
            Some(parent) if parent != message.id && ids.contains(parent) => {
                children.entry(parent).or_default().push(message.id.as_str());
            }
            _ => roots.push(message.id.as_str()),
        }
    }

    let mut visited = HashSet::new();
    let mut forest = Vec::with_capacity(messages.len());
    let mut stack: Vec<(&str, Option<&str>, usize)> = Vec::new();
    let leftovers = messages.iter().map(|m| m.id.as_str());

    for start in roots.into_iter().chain(leftovers) {
        stack.push((start, None, 0));
        while let Some((id, parent, depth)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            forest.push(ReplyNode {
                id: id.to_owned(),
                parent: parent.map(str::to_owned),
                depth,
            });
            if let Some(kids) = children.get(id) {
                stack.extend(kids.iter().rev().map(|&kid| (kid, Some(id), depth + 1)));
            }
        }
    }
    forest
}

/// Memoized aggregation bound to one store, keyed by its version.
#[derive(Debug, Default)]
pub struct ThreadView {
    version: Option<u64>,
    threads: Vec<Thread>,
}

impl ThreadView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(&mut self, store: &StateStore) -> &[Thread] {
        if self.version != Some(store.version()) {
            self.threads = aggregate(store.messages());
            self.version = Some(store.version());
        }
        &self.threads
    }

    pub fn find(&mut self, store: &StateStore, id: &str) -> Option<&Thread> {
        find_thread(self.threads(store), id)
    }
}
