use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::threads::reply_forest;

/// Severity labels, ranked so that the worst one wins inside a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Blocking,
    Major,
    Minor,
}

impl Severity {
    /// Numeric priority where higher = more urgent. Absence ranks 0.
    pub fn priority(self) -> u8 {
        match self {
            Severity::Blocking => 3,
            Severity::Major => 2,
            Severity::Minor => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Blocking => "BLOCKING",
            Severity::Major => "MAJOR",
            Severity::Minor => "MINOR",
        }
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BLOCKING" => Ok(Severity::Blocking),
            "MAJOR" => Ok(Severity::Major),
            "MINOR" => Ok(Severity::Minor),
            other => bail!("unknown severity: {other}"),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow status of a message. Missing or unrecognized values read as `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Open => "open",
            MessageStatus::InProgress => "in_progress",
            MessageStatus::Resolved => "resolved",
            MessageStatus::Closed => "closed",
        }
    }

    /// Resolved and closed messages need no further action.
    pub fn is_settled(self) -> bool {
        matches!(self, MessageStatus::Resolved | MessageStatus::Closed)
    }
}

impl FromStr for MessageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Ok(MessageStatus::Open),
            "in_progress" => Ok(MessageStatus::InProgress),
            "resolved" => Ok(MessageStatus::Resolved),
            "closed" => Ok(MessageStatus::Closed),
            other => bail!("unknown status: {other}"),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            None => MessageStatus::Open,
            Some(value) => value.parse().unwrap_or_else(|_| {
                tracing::debug!(status = value, "unrecognized message status, treating as open");
                MessageStatus::Open
            }),
        })
    }
}

fn lenient_severity<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Severity>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| value.parse().ok()))
}

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single mailbox message as mirrored from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub from_agent: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub to_agent: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cc: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub mentions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub message_type: String,
    #[serde(
        default,
        deserialize_with = "lenient_severity",
        skip_serializing_if = "Option::is_none"
    )]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub acknowledged_by: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            cc: Vec::new(),
            mentions: Vec::new(),
            subject: String::new(),
            message_type: "message".to_owned(),
            severity: None,
            status: MessageStatus::Open,
            date: date.into(),
            thread_id: None,
            in_reply_to: None,
            acknowledged_by: BTreeMap::new(),
            archived: false,
            content: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    #[must_use]
    pub fn with_cc(mut self, cc: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cc = cc.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(message_id.into());
        self
    }

    /// Key that groups this message into a thread: its `thread_id`, or its
    /// own id when it does not belong to an explicit thread.
    pub fn thread_key(&self) -> &str {
        self.thread_id
            .as_deref()
            .filter(|thread_id| !thread_id.is_empty())
            .unwrap_or(&self.id)
    }
}

/// Presence and inbox summary for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default)]
    pub last_active: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_online: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inbox_count: u32,
}

impl AgentInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            role: String::new(),
            last_active: None,
            is_online: false,
            inbox_count: 0,
        }
    }
}

/// Partial `AgentInfo`; only the fields present are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_count: Option<u32>,
}

impl AgentPatch {
    pub fn online(is_online: bool) -> Self {
        Self {
            is_online: Some(is_online),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, agent: &mut AgentInfo) {
        if let Some(display_name) = &self.display_name {
            agent.display_name.clone_from(display_name);
        }
        if let Some(role) = &self.role {
            agent.role.clone_from(role);
        }
        if let Some(last_active) = &self.last_active {
            agent.last_active = Some(last_active.clone());
        }
        if let Some(is_online) = self.is_online {
            agent.is_online = is_online;
        }
        if let Some(inbox_count) = self.inbox_count {
            agent.inbox_count = inbox_count;
        }
    }
}

/// Server-derived work summary for an agent. Replaced wholesale on sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub complete: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub in_progress: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_up: Vec<String>,
}

/// Aggregate counters. Only `total_messages` is maintained locally; the rest
/// are carried through untouched until the next sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_messages: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The complete mirrored mailbox state, as delivered by `state_sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub stats: Stats,
    #[serde(default, deserialize_with = "null_as_default")]
    pub agents: Vec<AgentInfo>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub agent_statuses: Vec<AgentStatus>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

/// A coordination note. Notes are surfaced to observers but not mirrored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: MessageStatus,
}

/// Which routing field a reroute changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingField {
    From,
    To,
}

impl FromStr for RoutingField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "from" | "from_agent" => Ok(RoutingField::From),
            "to" | "to_agent" => Ok(RoutingField::To),
            other => bail!("unknown routing field: {other} (expected from or to)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingUpdate {
    pub message_id: String,
    pub field: RoutingField,
    pub value: String,
}

impl RoutingUpdate {
    pub fn apply_to(&self, message: &mut Message) {
        match self.field {
            RoutingField::From => message.from_agent.clone_from(&self.value),
            RoutingField::To => message.to_agent.clone_from(&self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatusUpdate {
    pub message_ids: Vec<String>,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkArchiveUpdate {
    pub message_ids: Vec<String>,
    pub archived: bool,
}

/// Moves a message under another thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReparentRequest {
    pub message_id: String,
    pub in_reply_to: String,
    pub thread_id: String,
}

/// A new message, optionally scheduled (`send_at`) or with a follow-up
/// reminder (`remind_after_minutes`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub from_agent: String,
    pub to_agent: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub subject: String,
    pub message_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remind_after_minutes: Option<u32>,
}

/// One message's place in a thread's `in_reply_to` forest.
///
/// Forests are kept flat in depth-first order: a node's replies follow it
/// directly, one level deeper, before its next sibling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub depth: usize,
}

/// Server view of a single thread.
///
/// The server's nested `reply_tree` is not decoded. The forest is rebuilt
/// from `messages`, so arbitrarily long reply chains decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ThreadDetailWire")]
pub struct ThreadDetail {
    pub thread_id: String,
    pub root_message: Message,
    pub messages: Vec<Message>,
    pub participants: Vec<String>,
    #[serde(skip_serializing)]
    pub reply_tree: Vec<ReplyNode>,
}

impl ThreadDetail {
    pub fn new(
        thread_id: impl Into<String>,
        root_message: Message,
        messages: Vec<Message>,
        participants: Vec<String>,
    ) -> Self {
        let reply_tree = if messages.iter().any(|m| m.id == root_message.id) {
            reply_forest(&messages)
        } else {
            let mut members = Vec::with_capacity(messages.len() + 1);
            members.push(root_message.clone());
            members.extend(messages.iter().cloned());
            reply_forest(&members)
        };
        Self {
            thread_id: thread_id.into(),
            root_message,
            messages,
            participants,
            reply_tree,
        }
    }
}

#[derive(Deserialize)]
struct ThreadDetailWire {
    thread_id: String,
    root_message: Message,
    #[serde(default, deserialize_with = "null_as_default")]
    messages: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    participants: Vec<String>,
}

impl From<ThreadDetailWire> for ThreadDetail {
    fn from(wire: ThreadDetailWire) -> Self {
        Self::new(
            wire.thread_id,
            wire.root_message,
            wire.messages,
            wire.participants,
        )
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_defaults_fill_missing_fields() {
        let message: Message = serde_json::from_str(
            r#"{"id":"m1","from_agent":"qa","to_agent":"coordinator","date":"2025-01-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(message.status, MessageStatus::Open);
        assert!(!message.archived);
        assert!(message.cc.is_empty());
        assert!(message.severity.is_none());
        assert_eq!(message.thread_key(), "m1");
    }

    #[test]
    fn unknown_status_and_severity_are_tolerated() {
        let message: Message = serde_json::from_str(
            r#"{"id":"m1","from_agent":"qa","to_agent":"x","date":"d",
                "status":"wontfix","severity":"CATASTROPHIC","cc":null}"#,
        )
        .unwrap();
        assert_eq!(message.status, MessageStatus::Open);
        assert!(message.severity.is_none());
        assert!(message.cc.is_empty());
    }

    #[test]
    fn status_and_type_use_wire_names() {
        let message = Message::new("m1", "qa", "coordinator", "2025-01-01")
            .with_status(MessageStatus::InProgress)
            .with_severity(Severity::Blocking);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["severity"], "BLOCKING");
        assert_eq!(json["type"], "message");
    }

    #[test]
    fn empty_thread_id_groups_by_message_id() {
        let message = Message::new("m7", "a", "b", "d").with_thread("");
        assert_eq!(message.thread_key(), "m7");
    }

    #[test]
    fn agent_patch_only_touches_present_fields() {
        let mut agent = AgentInfo::new("qa");
        agent.role = "tester".into();
        let patch: AgentPatch = serde_json::from_str(r#"{"inbox_count":4}"#).unwrap();
        patch.apply_to(&mut agent);
        assert_eq!(agent.inbox_count, 4);
        assert_eq!(agent.role, "tester");
        assert!(!agent.is_online);
    }

    #[test]
    fn stats_keep_unknown_counters() {
        let stats: Stats =
            serde_json::from_str(r#"{"total_messages":3,"blocking":1}"#).unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.extra["blocking"], 1);
    }

    #[test]
    fn routing_update_rewrites_one_side() {
        let mut message = Message::new("m1", "qa", "coordinator", "d");
        RoutingUpdate {
            message_id: "m1".into(),
            field: RoutingField::To,
            value: "physics".into(),
        }
        .apply_to(&mut message);
        assert_eq!(message.from_agent, "qa");
        assert_eq!(message.to_agent, "physics");
    }

    #[test]
    fn parses_cli_spellings() {
        assert_eq!(
            "in-progress".parse::<MessageStatus>().unwrap(),
            MessageStatus::InProgress
        );
        assert_eq!("major".parse::<Severity>().unwrap(), Severity::Major);
        assert!("sideways".parse::<RoutingField>().is_err());
    }

    #[test]
    fn deep_reply_chains_decode() {
        const DEPTH: usize = 300;
        let messages: Vec<Message> = (0..DEPTH)
            .map(|i| {
                let date = format!("{i:06}");
                let message =
                    Message::new(format!("m{i}"), "qa", "coordinator", date).with_thread("m0");
                if i == 0 {
                    message
                } else {
                    message.replying_to(format!("m{}", i - 1))
                }
            })
            .collect();

        let mut tree = String::new();
        for i in 0..DEPTH {
            tree.push_str(&format!(r#"{{"id":"m{i}","children":["#));
        }
        for _ in 0..DEPTH {
            tree.push_str("]}");
        }
        let json = format!(
            r#"{{"thread_id":"m0","root_message":{},"messages":{},"participants":["qa"],"reply_tree":[{tree}]}}"#,
            serde_json::to_string(&messages[0]).unwrap(),
            serde_json::to_string(&messages).unwrap(),
        );

        let detail: ThreadDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(detail.messages.len(), DEPTH);
        assert_eq!(detail.reply_tree.len(), DEPTH);
        let deepest = detail.reply_tree.last().unwrap();
        assert_eq!(deepest.id, format!("m{}", DEPTH - 1));
        assert_eq!(deepest.depth, DEPTH - 1);
        let parent = format!("m{}", DEPTH - 2);
        assert_eq!(deepest.parent.as_deref(), Some(parent.as_str()));
    }

    #[test]
    fn detail_without_root_in_messages_still_roots_the_tree() {
        let root = Message::new("r", "qa", "coordinator", "1");
        let reply = Message::new("a", "coordinator", "qa", "2")
            .with_thread("r")
            .replying_to("r");
        let detail = ThreadDetail::new("r", root, vec![reply], Vec::new());
        let shape: Vec<(&str, usize)> = detail
            .reply_tree
            .iter()
            .map(|n| (n.id.as_str(), n.depth))
            .collect();
        assert_eq!(shape, [("r", 0), ("a", 1)]);
    }
}
