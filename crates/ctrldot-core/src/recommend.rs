//! Stable reason codes and deterministic remediation recommendations.
//!
//! Agents branch on reason codes; humans read recommendations. Both are
//! pure functions of the decision outcome, so identical inputs always
//! produce identical guidance.

use crate::domain::{Decision, Recommendation};

/// Resolution denial while panic mode is enabled.
pub const CODE_PANIC_RESOLUTION_REQUIRED: &str = "PANIC_RESOLUTION_REQUIRED";
/// Resolution denial outside panic mode.
pub const CODE_RESOLUTION_REQUIRED: &str = "RESOLUTION_REQUIRED";
/// Network guard denial.
pub const CODE_NETWORK_DOMAIN_DENIED: &str = "NETWORK_DOMAIN_DENIED";
/// Filesystem guard denial.
pub const CODE_FILESYSTEM_DENIED: &str = "FILESYSTEM_DENIED";
/// Loop detector stop.
pub const CODE_LOOP_STOP_THRESHOLD: &str = "LOOP_STOP_THRESHOLD";
/// Budget hard-stop.
pub const CODE_BUDGET_STOP_THRESHOLD: &str = "BUDGET_STOP_THRESHOLD";
/// Agent carries a halt mark.
pub const CODE_AGENT_HALTED: &str = "AGENT_HALTED";
/// Fallback when nothing specific matches a hard outcome.
pub const CODE_DENY_OR_STOP: &str = "DENY_OR_STOP";

/// Derives stable reason codes from a decision and its reason text.
#[must_use]
pub fn reason_codes(decision: Decision, reason: &str, panic_enabled: bool) -> Vec<String> {
    let lower = reason.to_lowercase();
    let mut codes = Vec::new();

    if decision == Decision::Stop {
        if reason.contains("Loop") {
            codes.push(CODE_LOOP_STOP_THRESHOLD.to_string());
        } else if lower.contains("budget") {
            codes.push(CODE_BUDGET_STOP_THRESHOLD.to_string());
        } else if lower.contains("halted") {
            codes.push(CODE_AGENT_HALTED.to_string());
        }
    }

    if decision == Decision::Deny {
        if lower.contains("resolution") {
            if panic_enabled {
                codes.push(CODE_PANIC_RESOLUTION_REQUIRED.to_string());
            } else {
                codes.push(CODE_RESOLUTION_REQUIRED.to_string());
            }
        } else if lower.contains("filesystem") {
            codes.push(CODE_FILESYSTEM_DENIED.to_string());
        } else if lower.contains("network") {
            codes.push(CODE_NETWORK_DOMAIN_DENIED.to_string());
        }
    }

    if codes.is_empty() && matches!(decision, Decision::Deny | Decision::Stop) {
        codes.push(CODE_DENY_OR_STOP.to_string());
    }

    codes
}

/// Inputs for building a recommendation.
#[derive(Debug, Clone, Default)]
pub struct RecommendOptions {
    /// The combined outcome.
    pub decision: Option<Decision>,
    /// Human-readable reason for the outcome.
    pub reason_text: String,
    /// Stable reason codes already derived for the outcome.
    pub reason_codes: Vec<String>,
    /// The proposed action type.
    pub action_type: String,
    /// Whether panic mode was effective at decision time.
    pub panic_enabled: bool,
    /// Agent the proposal came from; substituted into commands.
    pub agent_id: String,
}

/// Builds the deterministic recommendation for DENY / STOP / THROTTLE
/// outcomes. Returns `None` for ALLOW and WARN.
///
/// Selection priority for hard outcomes: resolution > network > filesystem >
/// loop > budget > halted > generic.
#[must_use]
pub fn recommend(opts: &RecommendOptions) -> Option<Recommendation> {
    let decision = opts.decision?;
    let agent_id = if opts.agent_id.is_empty() {
        "<agent_id>"
    } else {
        opts.agent_id.as_str()
    };
    let has = |code: &str| opts.reason_codes.iter().any(|c| c == code);
    let text = opts.reason_text.as_str();
    let lower = text.to_lowercase();

    match decision {
        Decision::Deny | Decision::Stop => {
            if has(CODE_PANIC_RESOLUTION_REQUIRED)
                || has(CODE_RESOLUTION_REQUIRED)
                || lower.contains("resolution")
            {
                return Some(Recommendation {
                    kind: "use_resolution".to_string(),
                    title: "Resolution required".to_string(),
                    summary: text.to_string(),
                    next_steps: vec![
                        format!("ctrldot resolve allow-once --agent {agent_id} --ttl 120s"),
                        "# Or disable panic: ctrldot panic off".to_string(),
                    ],
                    docs_hint: "docs/SETUP_GUIDE.md#panic-mode".to_string(),
                    tags: vec!["resolution".to_string(), "panic".to_string()],
                });
            }
            if has(CODE_NETWORK_DOMAIN_DENIED) || lower.contains("network") {
                return Some(Recommendation {
                    kind: "tighten_scope".to_string(),
                    title: "Network access denied".to_string(),
                    summary: text.to_string(),
                    next_steps: vec![
                        "# Add domain to config rules.network.allow_domains, or: ctrldot panic off"
                            .to_string(),
                    ],
                    docs_hint: "docs/SETUP_GUIDE.md".to_string(),
                    tags: vec!["network".to_string(), "rules".to_string()],
                });
            }
            if has(CODE_FILESYSTEM_DENIED) || lower.contains("filesystem") {
                return Some(Recommendation {
                    kind: "tighten_scope".to_string(),
                    title: "Filesystem access denied".to_string(),
                    summary: text.to_string(),
                    next_steps: vec![
                        "# Add path to config rules.filesystem.allow_roots, or: ctrldot panic off"
                            .to_string(),
                    ],
                    docs_hint: String::new(),
                    tags: vec!["filesystem".to_string(), "rules".to_string()],
                });
            }
            if has(CODE_LOOP_STOP_THRESHOLD) || text.contains("Loop") {
                return Some(Recommendation {
                    kind: "reduce_loop".to_string(),
                    title: "Loop detected".to_string(),
                    summary: text.to_string(),
                    next_steps: vec![
                        "# Action repeated too many times; vary the action or: ctrldot panic off"
                            .to_string(),
                    ],
                    docs_hint: String::new(),
                    tags: vec!["loop".to_string()],
                });
            }
            if has(CODE_BUDGET_STOP_THRESHOLD) || lower.contains("budget") {
                return Some(Recommendation {
                    kind: "enable_panic".to_string(),
                    title: "Budget limit reached".to_string(),
                    summary: text.to_string(),
                    next_steps: vec![
                        "# Daily budget exceeded; wait for reset or: ctrldot panic off (reduces cap)"
                            .to_string(),
                    ],
                    docs_hint: String::new(),
                    tags: vec!["budget".to_string(), "limits".to_string()],
                });
            }
            if has(CODE_AGENT_HALTED) || lower.contains("halted") {
                return Some(Recommendation {
                    kind: "enable_ctrldot".to_string(),
                    title: "Agent is halted".to_string(),
                    summary: text.to_string(),
                    next_steps: vec![format!(
                        "ctrldot agents {agent_id} resume  # or via API POST /v1/agents/{agent_id}/resume"
                    )],
                    docs_hint: String::new(),
                    tags: vec!["halt".to_string()],
                });
            }
            Some(Recommendation {
                kind: "tighten_scope".to_string(),
                title: "Action denied or stopped".to_string(),
                summary: text.to_string(),
                next_steps: vec![
                    "ctrldot panic off  # if appropriate".to_string(),
                    "# Or provide resolution token for this action type".to_string(),
                ],
                docs_hint: String::new(),
                tags: vec!["deny".to_string(), "stop".to_string()],
            })
        },
        Decision::Throttle => Some(Recommendation {
            kind: "reduce_loop".to_string(),
            title: "Throttled".to_string(),
            summary: text.to_string(),
            next_steps: vec![
                "# Approaching limits; reduce rate or: ctrldot panic off".to_string(),
            ],
            docs_hint: String::new(),
            tags: vec!["throttle".to_string()],
        }),
        Decision::Allow | Decision::Warn => None,
    }
}
