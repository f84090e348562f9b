//! Persisted panic mode state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted runtime state for panic mode.
///
/// A single logical row. When `enabled` and `expires_at` has passed, readers
/// must auto-disable and persist the transition before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanicState {
    /// Whether panic mode is currently on.
    pub enabled: bool,

    /// When panic mode was enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_at: Option<DateTime<Utc>>,

    /// When panic mode auto-expires, if a TTL was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// TTL in seconds as requested at enable time (0 = no expiry).
    #[serde(default)]
    pub ttl_seconds: i64,

    /// Why panic mode was enabled.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl PanicState {
    /// A disabled copy of this state, clearing enable-time fields.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }
}
