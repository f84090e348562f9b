//! Budget window accounting against warn / throttle / stop thresholds.
//!
//! The engine projects the proposal's cost onto the agent's current daily
//! window and classifies the resulting fraction of budget. It never mutates
//! state: the decision service persists the incremented window, and only on
//! allow-like outcomes.

// Warn percentages are small fractions; the integer cast for the code
// suffix cannot truncate meaningfully.
#![allow(clippy::cast_possible_truncation)]

use chrono::{Local, TimeZone, Utc};
use tracing::debug;

use crate::config::Config;
use crate::domain::{ActionProposal, Decision, LimitsState, ThrottleInfo, Warning};
use crate::store::RuntimeStore;

/// The outcome of the limits engine for one proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsOutcome {
    /// ALLOW, WARN, THROTTLE, or STOP.
    pub decision: Decision,
    /// Warnings attached to WARN outcomes.
    pub warnings: Vec<Warning>,
    /// Degraded profile attached to THROTTLE outcomes.
    pub throttle: Option<ThrottleInfo>,
}

/// Unix milliseconds at the most recent local midnight.
///
/// Daily windows are keyed by local midnight so "today's budget" matches the
/// operator's calendar, not UTC's.
#[must_use]
pub fn daily_window_start_ms() -> i64 {
    let now = Local::now();
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_local());
    match Local.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.timestamp_millis()
        },
        // DST gap at midnight: fall back to the UTC rendering of the date.
        chrono::LocalResult::None => Utc
            .from_utc_datetime(&midnight)
            .timestamp_millis(),
    }
}

/// Evaluates the budget limits for a proposal under the given effective
/// config. A missing window reads as zero spend.
#[must_use]
pub fn evaluate(
    store: &dyn RuntimeStore,
    proposal: &ActionProposal,
    config: &Config,
) -> LimitsOutcome {
    let window_start = daily_window_start_ms();
    let state = match store.get_limits_state(&proposal.agent_id, window_start, "daily") {
        Ok(Some(state)) => state,
        Ok(None) => LimitsState::empty_daily(&proposal.agent_id, window_start),
        Err(err) => {
            debug!(agent_id = %proposal.agent_id, error = %err, "limits read failed; treating window as empty");
            LimitsState::empty_daily(&proposal.agent_id, window_start)
        },
    };

    let defaults = &config.agents.default;
    let budget_limit = config.daily_budget_gbp();

    let new_spent = state.budget_spent_gbp + proposal.cost.estimated_gbp;
    let budget_pct = new_spent / budget_limit;

    if budget_pct >= defaults.hard_stop_pct {
        return LimitsOutcome {
            decision: Decision::Stop,
            warnings: Vec::new(),
            throttle: None,
        };
    }

    if budget_pct >= defaults.throttle_pct {
        let cheap = &config.degrade_modes.cheap;
        return LimitsOutcome {
            decision: Decision::Throttle,
            warnings: Vec::new(),
            throttle: Some(ThrottleInfo {
                max_parallel_tasks: cheap.max_parallel_tasks,
                model_policy: cheap.model_policy.clone(),
                tool_restrictions: cheap.deny_tools.clone(),
            }),
        };
    }

    // Warn once per threshold: only within a one-percent band above it.
    let mut warnings = Vec::new();
    for &warn_pct in &defaults.warn_pct {
        if budget_pct >= warn_pct && budget_pct < warn_pct + 0.01 {
            warnings.push(Warning {
                code: format!("BUDGET_{}", (warn_pct * 100.0) as i64),
                message: format!(
                    "Agent at {:.0}% of daily budget (\u{a3}{:.2}/\u{a3}{:.2}).",
                    budget_pct * 100.0,
                    new_spent,
                    budget_limit
                ),
            });
        }
    }

    if warnings.is_empty() {
        LimitsOutcome {
            decision: Decision::Allow,
            warnings,
            throttle: None,
        }
    } else {
        LimitsOutcome {
            decision: Decision::Warn,
            warnings,
            throttle: None,
        }
    }
}
