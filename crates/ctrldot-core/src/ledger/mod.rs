//! Ledger sinks: immutable decision recording.
//!
//! The gate interacts with an abstract [`LedgerSink`]; concrete transports
//! (noop, signed bundle, remote HTTP) are composed once at startup so the
//! hot path never branches on sink kind. Implementations must be
//! non-blocking or bounded-latency; their errors are logged by the decision
//! service and never change the user-facing decision unless a sink is
//! explicitly marked required.

pub mod autobundle;
pub mod bundle;
mod http;
mod noop;
mod redact;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::KernelHttpSink;
pub use noop::NoopSink;
pub use redact::{REDACT_KEYS, redact_map, redact_value};

use crate::domain::{Decision, Event, ThrottleInfo, Warning};

/// A boxed future for async trait methods, keeping the trait object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by ledger sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The record could not be serialised.
    #[error("encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport-level failure reaching a remote sink.
    #[error("POST {url}: {details}")]
    Transport {
        /// Endpoint that failed.
        url: String,
        /// What went wrong.
        details: String,
    },

    /// The remote sink answered with a non-2xx status.
    #[error("POST {url}: status {status}")]
    Status {
        /// Endpoint that failed.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// A bundle could not be written.
    #[error(transparent)]
    Bundle(#[from] bundle::BundleError),
}

/// The immutable record emitted to a ledger sink when a decision is issued.
///
/// Self-contained: everything needed to audit the decision later, with
/// target and inputs redacted before the record leaves the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Identifier shared with the `decision.issued` event.
    pub id: String,

    /// Agent the decision was issued for.
    pub agent_id: String,

    /// Session the proposal belonged to, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,

    /// When the decision was issued.
    pub timestamp: DateTime<Utc>,

    /// Proposed action type.
    pub action_type: String,

    /// Redacted action target.
    pub action_target: Map<String, Value>,

    /// Redacted action inputs.
    pub action_inputs: Map<String, Value>,

    /// The combined outcome.
    pub decision: Decision,

    /// Reason text for non-ALLOW outcomes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Warnings attached to the outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,

    /// Throttle profile attached to the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleInfo>,

    /// Spend attributed to this decision, GBP.
    #[serde(rename = "budget_spent_gbp", default)]
    pub budget_spent: f64,

    /// Daily budget in force at decision time, GBP.
    #[serde(rename = "budget_limit_gbp", default)]
    pub budget_limit: f64,

    /// Action hash used for loop detection, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_hash: String,

    /// Whether an execution token was minted for this decision.
    #[serde(default)]
    pub execution_token_present: bool,
}

/// Emitter of immutable decision (and optional event) records.
pub trait LedgerSink: Send + Sync {
    /// Emits a decision record.
    fn emit_decision<'a>(
        &'a self,
        record: &'a DecisionRecord,
    ) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Emits a runtime event. Transports without event storage treat this
    /// as a no-op.
    fn emit_event<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Flushes and releases the sink. For the bundle sink this is where
    /// buffered sessions become bundle directories.
    fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Whether sink failures must propagate to callers instead of being
    /// logged and swallowed.
    fn required(&self) -> bool {
        false
    }
}
