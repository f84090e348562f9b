//! Budget window accounting state and its read-only views.

use serde::{Deserialize, Serialize};

/// Accumulated budget state for one agent in one time window.
///
/// Natural key: `(agent_id, window_start_ms, window_type)`. The window start
/// is midnight local time as unix milliseconds; the only window type in use
/// is `daily`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsState {
    /// Agent the window belongs to.
    pub agent_id: String,

    /// Window start, unix milliseconds at local midnight.
    pub window_start_ms: i64,

    /// Window granularity, currently always `daily`.
    pub window_type: String,

    /// Spend accumulated in this window, GBP.
    pub budget_spent_gbp: f64,

    /// Tokens accumulated in this window.
    pub budget_spent_tokens: i64,

    /// Number of allow-like decisions issued in this window.
    pub action_count: i64,
}

impl LimitsState {
    /// An empty daily window for an agent.
    #[must_use]
    pub fn empty_daily(agent_id: impl Into<String>, window_start_ms: i64) -> Self {
        Self {
            agent_id: agent_id.into(),
            window_start_ms,
            window_type: "daily".to_string(),
            budget_spent_gbp: 0.0,
            budget_spent_tokens: 0,
            action_count: 0,
        }
    }
}

/// Read-only view of an agent's current daily window against its limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimitsResponse {
    /// Agent the view describes.
    pub agent_id: String,
    /// Window start, unix milliseconds at local midnight.
    pub window_start_ms: i64,
    /// Window granularity.
    pub window_type: String,
    /// Spend so far, GBP.
    pub spent_gbp: f64,
    /// Daily limit, GBP.
    pub limit_gbp: f64,
    /// `spent_gbp / limit_gbp`.
    pub percentage: f64,
    /// Configured warn thresholds as fractions.
    pub warn_pct: Vec<f64>,
    /// Configured throttle threshold as a fraction.
    pub throttle_pct: f64,
    /// Configured hard-stop threshold as a fraction.
    pub hard_stop_pct: f64,
    /// Allow-like decisions issued in the window.
    pub action_count: i64,
}

/// Read-only view of the configured default limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfigResponse {
    /// Default daily budget, GBP.
    pub daily_budget_gbp: f64,
    /// Warn thresholds as fractions.
    pub warn_pct: Vec<f64>,
    /// Throttle threshold as a fraction.
    pub throttle_pct: f64,
    /// Hard-stop threshold as a fraction.
    pub hard_stop_pct: f64,
}
