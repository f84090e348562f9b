//! Decisions and the decision response envelope.

use serde::{Deserialize, Serialize};

use super::Recommendation;

/// The outcome of evaluating an action proposal.
///
/// `Deny` and `Stop` are hard outcomes; `Allow`, `Warn`, and `Throttle` are
/// allow-like (execution may proceed, possibly degraded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Proceed.
    #[serde(rename = "ALLOW")]
    Allow,
    /// Proceed, with warnings attached.
    #[serde(rename = "WARN")]
    Warn,
    /// Proceed under a degraded profile.
    #[serde(rename = "THROTTLE")]
    Throttle,
    /// Do not execute this action.
    #[serde(rename = "DENY")]
    Deny,
    /// Stop the agent entirely.
    #[serde(rename = "STOP")]
    Stop,
}

impl Decision {
    /// Returns true for outcomes under which execution may proceed.
    #[must_use]
    pub const fn is_allow_like(self) -> bool {
        matches!(self, Self::Allow | Self::Warn | Self::Throttle)
    }

    /// The wire representation, e.g. `"DENY"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Warn => "WARN",
            Self::Throttle => "THROTTLE",
            Self::Deny => "DENY",
            Self::Stop => "STOP",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The response to an action proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    /// The combined outcome.
    pub decision: Decision,

    /// Token the agent presents to its own executor on allow-like outcomes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub execution_token: String,

    /// Budget warnings attached to WARN outcomes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,

    /// Degraded-mode profile attached to THROTTLE outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleInfo>,

    /// Human-readable reason for a non-ALLOW outcome.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Structured reasons with stable codes for agent logic.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Reason>,

    /// Suggested remediation for DENY / STOP / THROTTLE outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,

    /// Identifier of the `decision.issued` event appended for this proposal.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ledger_event_id: String,

    /// Path of the autobundle written for this decision, when one was.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub autobundle_path: String,

    /// Trigger tag of the autobundle written for this decision.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub autobundle_trigger: String,
}

impl DecisionResponse {
    /// A bare response carrying only an outcome and its reason.
    #[must_use]
    pub fn bare(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            execution_token: String::new(),
            warnings: Vec::new(),
            throttle: None,
            reason: reason.into(),
            reasons: Vec::new(),
            recommendation: None,
            ledger_event_id: String::new(),
            autobundle_path: String::new(),
            autobundle_trigger: String::new(),
        }
    }
}

/// A budget warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Stable code, e.g. `BUDGET_70`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Constraints applied under a THROTTLE outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleInfo {
    /// Maximum parallel tasks the agent should run.
    pub max_parallel_tasks: i64,
    /// Model selection policy, e.g. `cheap`.
    pub model_policy: String,
    /// Tools the agent should avoid while throttled.
    pub tool_restrictions: Vec<String>,
}

/// A structured reason with a stable code for agent logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// Stable short token, e.g. `RESOLUTION_REQUIRED`.
    pub code: String,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
