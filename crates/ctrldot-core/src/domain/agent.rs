//! Registered agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered agent.
///
/// Agents are created by registration, never deleted, and may be halted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Stable primary key.
    pub agent_id: String,

    /// Display name for humans.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    /// Registration time.
    pub created_at: DateTime<Utc>,

    /// Default operating mode.
    pub default_mode: AgentMode,
}

/// Agent operating modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Full capability.
    #[default]
    Normal,
    /// Cheap models and reduced parallelism.
    Cheap,
    /// Throttled throughput.
    Throttled,
}
