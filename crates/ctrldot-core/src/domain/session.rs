//! Agent sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An agent session. Evidence bundles are keyed by session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier, `sess:`-prefixed uuid.
    pub session_id: String,

    /// Agent the session belongs to.
    pub agent_id: String,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// When the session ended, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Free-form metadata supplied at start.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}
