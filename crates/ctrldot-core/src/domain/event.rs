//! Append-only runtime events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An append-only runtime event.
///
/// The loop detector depends on `action_hash` being present on
/// `decision.issued` events; everything else is observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, `evt:`-prefixed uuid.
    pub event_id: String,

    /// Wall-clock time of the event.
    pub ts: DateTime<Utc>,

    /// Event type, e.g. `decision.issued`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Agent the event belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,

    /// Session the event belongs to, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,

    /// Severity level.
    pub severity: EventSeverity,

    /// Opaque payload.
    #[serde(default)]
    pub payload_json: Map<String, Value>,

    /// Action hash for loop detection, when applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_hash: String,

    /// Cost in GBP attributed to the event, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_gbp: Option<f64>,

    /// Token cost attributed to the event, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_tokens: Option<i64>,
}

impl Event {
    /// Creates an info-severity event with a fresh `evt:` id stamped now.
    #[must_use]
    pub fn now(event_type: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            event_id: format!("evt:{}", uuid::Uuid::new_v4()),
            ts: Utc::now(),
            event_type: event_type.into(),
            agent_id: agent_id.into(),
            session_id: String::new(),
            severity: EventSeverity::Info,
            payload_json: Map::new(),
            action_hash: String::new(),
            cost_gbp: None,
            cost_tokens: None,
        }
    }
}

/// Event severity levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// Informational.
    #[default]
    Info,
    /// Something degraded but the request proceeded.
    Warn,
    /// Something failed.
    Error,
}

impl EventSeverity {
    /// The wire representation, e.g. `"info"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Well-known event types.
pub mod event_types {
    /// Agent registered.
    pub const AGENT_REGISTERED: &str = "agent.registered";
    /// Session started.
    pub const SESSION_STARTED: &str = "session.started";
    /// Decision issued for a proposal.
    pub const DECISION_ISSUED: &str = "decision.issued";
    /// Agent halted.
    pub const AGENT_HALTED: &str = "agent.halted";
    /// Agent resumed.
    pub const AGENT_RESUMED: &str = "agent.resumed";
    /// Panic mode toggled.
    pub const PANIC_TOGGLED: &str = "panic.toggled";
}
