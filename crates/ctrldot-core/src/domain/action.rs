//! Action proposals submitted by agents for gating.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An action proposed by an agent, evaluated by the decision pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionProposal {
    /// Stable identifier of the proposing agent.
    pub agent_id: String,

    /// Session the action belongs to, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,

    /// The intent behind the action.
    #[serde(default)]
    pub intent: ActionIntent,

    /// The action itself.
    #[serde(default)]
    pub action: Action,

    /// Estimated cost of executing the action.
    #[serde(default)]
    pub cost: CostEstimate,

    /// Context supplied alongside the action.
    #[serde(default)]
    pub context: ActionContext,

    /// Resolution token presented for actions that require one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolution_token: String,
}

/// The intent or goal behind a proposed action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionIntent {
    /// Short human-readable title.
    #[serde(default)]
    pub title: String,

    /// Optional goal identifier linking the action to a larger plan.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub goal_id: String,
}

/// The concrete action to be performed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Action {
    /// Dotted action taxonomy, e.g. `git.push` or `filesystem.delete`.
    #[serde(rename = "type", default)]
    pub action_type: String,

    /// Target of the action (path, url, domain, ...).
    #[serde(default)]
    pub target: Map<String, Value>,

    /// Opaque inputs to the action.
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// Estimated cost of executing an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Display currency of the estimate; amounts are stored in GBP.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub currency: String,

    /// Estimated spend in GBP.
    #[serde(default)]
    pub estimated_gbp: f64,

    /// Estimated token consumption.
    #[serde(default)]
    pub estimated_tokens: i64,

    /// Model the agent intends to use.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
}

/// Context supplied with an action proposal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionContext {
    /// Tool that produced the proposal.
    #[serde(default)]
    pub tool: String,

    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Optional precomputed action hash for loop detection.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}
