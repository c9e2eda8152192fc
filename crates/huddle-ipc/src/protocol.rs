use anyhow::{Context, Result, bail};
use huddle_core::{AgentPatch, DashboardData, Message, Note};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit exchanged on the push channel, before interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Envelope {
    fn with_payload(kind: &str, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            kind: kind.to_owned(),
            payload: Some(
                serde_json::to_value(payload)
                    .with_context(|| format!("failed to encode {kind} payload"))?,
            ),
            error_message: None,
            error_code: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask the server to resend a full `state_sync`.
    RequestSync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    StateSync(DashboardData),
    MessageAdded(Message),
    MessageUpdated(Message),
    StatusChanged {
        agent: String,
        status: AgentPatch,
    },
    AgentOnline {
        agent: String,
        is_online: bool,
    },
    NoteAdded(Note),
    NoteUpdated(Note),
    Error {
        message: String,
        code: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
struct StatusChangedPayload {
    agent: String,
    #[serde(default)]
    status: AgentPatch,
}

#[derive(Serialize, Deserialize)]
struct AgentOnlinePayload {
    agent: String,
    is_online: bool,
}

impl ServerMessage {
    /// Parse a text frame into a typed message.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).context("failed to decode push envelope")?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let Envelope {
            kind,
            payload,
            error_message,
            error_code,
        } = envelope;

        let message = match kind.as_str() {
            "state_sync" => Self::StateSync(decode_payload(&kind, payload)?),
            "message_added" => Self::MessageAdded(decode_payload(&kind, payload)?),
            "message_updated" => Self::MessageUpdated(decode_payload(&kind, payload)?),
            "status_changed" => {
                let StatusChangedPayload { agent, status } = decode_payload(&kind, payload)?;
                Self::StatusChanged { agent, status }
            }
            "agent_online" => {
                let AgentOnlinePayload { agent, is_online } = decode_payload(&kind, payload)?;
                Self::AgentOnline { agent, is_online }
            }
            "note_added" => Self::NoteAdded(decode_payload(&kind, payload)?),
            "note_updated" => Self::NoteUpdated(decode_payload(&kind, payload)?),
            "error" => Self::Error {
                message: error_message.unwrap_or_else(|| "unknown server error".to_owned()),
                code: error_code,
            },
            "request_sync" => bail!("request_sync is a client-to-server envelope"),
            other => bail!("unknown envelope type: {other}"),
        };
        Ok(message)
    }

    /// Wire name of this message's envelope type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateSync(_) => "state_sync",
            Self::MessageAdded(_) => "message_added",
            Self::MessageUpdated(_) => "message_updated",
            Self::StatusChanged { .. } => "status_changed",
            Self::AgentOnline { .. } => "agent_online",
            Self::NoteAdded(_) => "note_added",
            Self::NoteUpdated(_) => "note_updated",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        let kind = self.kind();
        match self {
            Self::StateSync(data) => Envelope::with_payload(kind, data),
            Self::MessageAdded(message) | Self::MessageUpdated(message) => {
                Envelope::with_payload(kind, message)
            }
            Self::StatusChanged { agent, status } => Envelope::with_payload(
                kind,
                &StatusChangedPayload {
                    agent: agent.clone(),
                    status: status.clone(),
                },
            ),
            Self::AgentOnline { agent, is_online } => Envelope::with_payload(
                kind,
                &AgentOnlinePayload {
                    agent: agent.clone(),
                    is_online: *is_online,
                },
            ),
            Self::NoteAdded(note) | Self::NoteUpdated(note) => Envelope::with_payload(kind, note),
            Self::Error { message, code } => Ok(Envelope {
                kind: kind.to_owned(),
                payload: None,
                error_message: Some(message.clone()),
                error_code: code.clone(),
            }),
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(&self.to_envelope()?).context("failed to encode push envelope")
    }
}

fn decode_payload<T: DeserializeOwned>(kind: &str, payload: Option<Value>) -> Result<T> {
    let payload = payload
        .filter(|value| !value.is_null())
        .ok_or_else(|| anyhow::anyhow!("{kind} envelope has no payload"))?;
    serde_json::from_value(payload).with_context(|| format!("invalid {kind} payload"))
}
