//! The decision service: orchestrates the pipeline for every proposal.
//!
//! Control flow per proposal: load agent and panic state, compute the
//! effective config, run rules / loop / limits, combine outcomes, append the
//! decision event, persist limits and mint an execution token on allow-like
//! outcomes, emit the redacted record to the ledger sink, autobundle on hard
//! outcomes, and attach reason codes plus a recommendation.
//!
//! The pipeline never raises for policy outcomes: a DENY or STOP response is
//! the normal success path. Only storage faults on the critical reads (agent
//! and halt lookup) and required-sink failures surface as errors.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, effective, expand_path_str, panic_expired};
use crate::domain::{
    ActionProposal, Agent, AgentLimitsResponse, AgentMode, ApiInfo, CapabilitiesResponse,
    CtrlDotCapabilities, Decision, DecisionResponse, Event, FeaturesInfo, LedgerSinkInfo,
    LimitsConfigResponse, LimitsState, LoopInfo, PanicEffectiveInfo, PanicInfo, PanicState,
    Reason, RuntimeStoreInfo, Session, event_types,
};
use crate::hashing::action_hash;
use crate::ledger::autobundle::{
    AutobundleManager, TRIGGER_BUDGET_STOP, TRIGGER_DECISION_DENY, TRIGGER_DECISION_STOP,
    TRIGGER_LOOP_STOP,
};
use crate::ledger::{DecisionRecord, LedgerSink, redact_map};
use crate::limits::daily_window_start_ms;
use crate::recommend::{RecommendOptions, reason_codes, recommend};
use crate::store::{EventFilter, RuntimeStore, StoreError};
use crate::token::TokenKeeper;
use crate::{limits, loop_detect, rules};

/// TTL of execution tokens minted on allow-like outcomes.
const EXECUTION_TOKEN_TTL_SECS: i64 = 600;

/// Errors surfaced by the decision service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A runtime store operation failed on the critical path.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// A sink marked required failed to record the decision.
    #[error("ledger sink: {0}")]
    Sink(#[from] crate::ledger::SinkError),
}

/// The gate's application service.
pub struct DecisionService {
    store: Arc<dyn RuntimeStore>,
    config: Arc<Config>,
    ledger_sink: Arc<dyn LedgerSink>,
    autobundle: Option<Arc<AutobundleManager>>,
    tokens: TokenKeeper,
}

impl DecisionService {
    /// Wires the service. `autobundle` may be `None` to disable
    /// auto-bundles.
    #[must_use]
    pub fn new(
        store: Arc<dyn RuntimeStore>,
        config: Arc<Config>,
        ledger_sink: Arc<dyn LedgerSink>,
        autobundle: Option<Arc<AutobundleManager>>,
        tokens: TokenKeeper,
    ) -> Self {
        Self {
            store,
            config,
            ledger_sink,
            autobundle,
            tokens,
        }
    }

    /// The autobundle manager, when configured.
    #[must_use]
    pub fn autobundle(&self) -> Option<&Arc<AutobundleManager>> {
        self.autobundle.as_ref()
    }

    /// Registers an agent; idempotent on `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the writes.
    pub fn register_agent(
        &self,
        agent_id: &str,
        display_name: &str,
        default_mode: Option<AgentMode>,
    ) -> Result<Agent, ServiceError> {
        let agent = Agent {
            agent_id: agent_id.to_string(),
            display_name: display_name.to_string(),
            created_at: Utc::now(),
            default_mode: default_mode.unwrap_or_default(),
        };
        self.store.create_agent(&agent)?;

        let mut event = Event::now(event_types::AGENT_REGISTERED, agent_id);
        event.payload_json = json!({
            "agent_id": agent_id,
            "display_name": display_name,
            "default_mode": agent.default_mode,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        self.store.append_event(&event)?;

        Ok(agent)
    }

    /// Evaluates an action proposal and returns the decision.
    ///
    /// # Errors
    ///
    /// Returns an error only for critical store reads and required-sink
    /// failures; policy outcomes are normal responses.
    pub async fn propose_action(
        &self,
        proposal: &ActionProposal,
    ) -> Result<DecisionResponse, ServiceError> {
        let Some(_agent) = self.store.get_agent(&proposal.agent_id)? else {
            let mut response = DecisionResponse::bare(Decision::Deny, "Agent not registered");
            self.attach_reasons(&mut response, false);
            return Ok(response);
        };

        if self.store.is_agent_halted(&proposal.agent_id)? {
            let mut response = DecisionResponse::bare(Decision::Stop, "Agent is halted");
            self.attach_reasons(&mut response, false);
            response.recommendation = recommend(&RecommendOptions {
                decision: Some(Decision::Stop),
                reason_text: response.reason.clone(),
                reason_codes: response.reasons.iter().map(|r| r.code.clone()).collect(),
                action_type: proposal.action.action_type.clone(),
                panic_enabled: false,
                agent_id: proposal.agent_id.clone(),
            });
            return Ok(response);
        }

        // Panic state with TTL auto-disable, persisted before use.
        let mut panic_state = self.store.get_panic_state().unwrap_or_default();
        if panic_expired(&panic_state) {
            panic_state.enabled = false;
            if let Err(err) = self.store.set_panic_state(&panic_state) {
                warn!(error = %err, "failed to persist expired panic state");
            }
        }
        let eff = effective(&self.config, Some(&panic_state));
        let panic_enabled = panic_state.enabled;

        let rules_outcome = rules::evaluate(proposal, &eff);
        let loop_stop = loop_detect::detect(self.store.as_ref(), proposal, &eff);
        let limits_outcome = limits::evaluate(self.store.as_ref(), proposal, &eff);

        // Combine in strict order; first non-ALLOW wins with precedence.
        let mut final_decision = Decision::Allow;
        let mut reason = String::new();
        let mut warnings = Vec::new();
        let mut throttle = None;

        if rules_outcome.decision == Decision::Deny {
            final_decision = Decision::Deny;
            reason = rules_outcome.reason;
        } else if !proposal.resolution_token.is_empty()
            && rules::requires_resolution(&proposal.action.action_type, &eff.rules)
            && !self.tokens.validate(
                &proposal.resolution_token,
                &proposal.agent_id,
                &proposal.action.action_type,
            )
        {
            // The rules engine only checks presence; an invalid token is
            // finalised here into the same denial as an absent one.
            final_decision = Decision::Deny;
            reason = format!("Requires resolution for {}", proposal.action.action_type);
        } else if loop_stop {
            final_decision = Decision::Stop;
            reason = "Loop detected: repeated action".to_string();
        } else if matches!(limits_outcome.decision, Decision::Stop | Decision::Deny) {
            final_decision = limits_outcome.decision;
            if limits_outcome.decision == Decision::Stop {
                reason = "Budget limit reached".to_string();
            }
        } else if limits_outcome.decision == Decision::Throttle {
            final_decision = Decision::Throttle;
            throttle = limits_outcome.throttle;
        } else if limits_outcome.decision == Decision::Warn {
            final_decision = Decision::Warn;
            warnings = limits_outcome.warnings;
        }

        // Append the decision event. Failures degrade, never fail the
        // response.
        let probe_hash = action_hash(proposal);
        let mut decision_event = Event::now(event_types::DECISION_ISSUED, &proposal.agent_id);
        let event_id = decision_event.event_id.clone();
        decision_event.session_id.clone_from(&proposal.session_id);
        decision_event.action_hash.clone_from(&probe_hash);
        decision_event.cost_gbp = Some(proposal.cost.estimated_gbp);
        decision_event.cost_tokens = Some(proposal.cost.estimated_tokens);
        decision_event.payload_json = json!({
            "decision": final_decision.as_str(),
            "action_type": proposal.action.action_type,
            "action_hash": probe_hash,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        if let Err(err) = self.store.append_event(&decision_event) {
            warn!(error = %err, "failed to append decision event");
        }

        // Persist the incremented window on allow-like outcomes.
        if final_decision.is_allow_like() {
            let window_start = daily_window_start_ms();
            let mut state = self
                .store
                .get_limits_state(&proposal.agent_id, window_start, "daily")
                .ok()
                .flatten()
                .unwrap_or_else(|| LimitsState::empty_daily(&proposal.agent_id, window_start));
            state.budget_spent_gbp += proposal.cost.estimated_gbp;
            state.budget_spent_tokens += proposal.cost.estimated_tokens;
            state.action_count += 1;
            if let Err(err) = self.store.update_limits_state(&state) {
                warn!(error = %err, "failed to persist limits window");
            }
        }

        let mut response = DecisionResponse {
            decision: final_decision,
            execution_token: String::new(),
            warnings,
            throttle,
            reason,
            reasons: Vec::new(),
            recommendation: None,
            ledger_event_id: event_id,
            autobundle_path: String::new(),
            autobundle_trigger: String::new(),
        };
        self.attach_reasons(&mut response, panic_enabled);

        if matches!(
            final_decision,
            Decision::Deny | Decision::Stop | Decision::Throttle
        ) {
            response.recommendation = recommend(&RecommendOptions {
                decision: Some(final_decision),
                reason_text: response.reason.clone(),
                reason_codes: response.reasons.iter().map(|r| r.code.clone()).collect(),
                action_type: proposal.action.action_type.clone(),
                panic_enabled,
                agent_id: proposal.agent_id.clone(),
            });
        }

        if final_decision.is_allow_like() {
            match self.tokens.mint(
                &proposal.agent_id,
                &proposal.action.action_type,
                EXECUTION_TOKEN_TTL_SECS,
            ) {
                Ok(token) => response.execution_token = token,
                Err(err) => debug!(error = %err, "failed to mint execution token"),
            }
        }

        // Emit the redacted record, then the event, to the ledger sink.
        let record = self.build_record(proposal, &response, &decision_event, &eff, &probe_hash);
        if let Err(err) = self.ledger_sink.emit_decision(&record).await {
            if self.ledger_sink.required() {
                return Err(err.into());
            }
            warn!(error = %err, "ledger sink emit_decision failed");
        }
        if let Err(err) = self.ledger_sink.emit_event(&decision_event).await {
            if self.ledger_sink.required() {
                return Err(err.into());
            }
            warn!(error = %err, "ledger sink emit_event failed");
        }

        // Auto-bundle on hard outcomes, debounced per session+trigger.
        if matches!(final_decision, Decision::Deny | Decision::Stop) {
            if let Some(manager) = &self.autobundle {
                let trigger = match final_decision {
                    Decision::Stop if response.reason.contains("Loop") => TRIGGER_LOOP_STOP,
                    Decision::Stop if response.reason.to_lowercase().contains("budget") => {
                        TRIGGER_BUDGET_STOP
                    },
                    Decision::Stop => TRIGGER_DECISION_STOP,
                    _ => TRIGGER_DECISION_DENY,
                };
                let next_steps = response
                    .recommendation
                    .as_ref()
                    .map(|r| r.next_steps.clone())
                    .unwrap_or_default();
                let codes: Vec<String> =
                    response.reasons.iter().map(|r| r.code.clone()).collect();
                match manager.maybe_bundle_on_decision(
                    &record,
                    trigger,
                    panic_enabled,
                    &next_steps,
                    &codes,
                ) {
                    Ok(Some(path)) => {
                        response.autobundle_path = path;
                        response.autobundle_trigger = trigger.to_string();
                    },
                    Ok(None) => {},
                    Err(err) => warn!(error = %err, "autobundle on decision failed"),
                }
            }
        }

        Ok(response)
    }

    fn attach_reasons(&self, response: &mut DecisionResponse, panic_enabled: bool) {
        let codes = reason_codes(response.decision, &response.reason, panic_enabled);
        response.reasons = codes
            .into_iter()
            .map(|code| Reason {
                code,
                message: response.reason.clone(),
            })
            .collect();
    }

    fn build_record(
        &self,
        proposal: &ActionProposal,
        response: &DecisionResponse,
        event: &Event,
        eff: &Config,
        probe_hash: &str,
    ) -> DecisionRecord {
        DecisionRecord {
            id: event.event_id.clone(),
            agent_id: proposal.agent_id.clone(),
            session_id: proposal.session_id.clone(),
            timestamp: event.ts,
            action_type: proposal.action.action_type.clone(),
            action_target: redact_map(&proposal.action.target),
            action_inputs: redact_map(&proposal.action.inputs),
            decision: response.decision,
            reason: response.reason.clone(),
            warnings: response.warnings.clone(),
            throttle: response.throttle.clone(),
            budget_spent: proposal.cost.estimated_gbp,
            budget_limit: eff.daily_budget_gbp(),
            action_hash: probe_hash.to_string(),
            execution_token_present: !response.execution_token.is_empty(),
        }
    }

    /// Starts a session for an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn start_session(
        &self,
        agent_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Session, ServiceError> {
        let session = Session {
            session_id: format!("sess:{}", Uuid::new_v4()),
            agent_id: agent_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            metadata,
        };
        self.store.create_session(&session)?;
        Ok(session)
    }

    /// Ends a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the update.
    pub fn end_session(&self, session_id: &str) -> Result<(), ServiceError> {
        self.store.end_session(session_id)?;
        Ok(())
    }

    /// Lists events with an optional agent and since-timestamp filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_events(
        &self,
        agent_id: Option<String>,
        since_ts_ms: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Event>, ServiceError> {
        Ok(self.store.list_events(&EventFilter {
            agent_id,
            since_ts_ms,
            limit,
        })?)
    }

    /// Lists all registered agents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_agents(&self) -> Result<Vec<Agent>, ServiceError> {
        Ok(self.store.list_agents()?)
    }

    /// Fetches one agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, ServiceError> {
        Ok(self.store.get_agent(agent_id)?)
    }

    /// Halts an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn halt_agent(&self, agent_id: &str, reason: &str) -> Result<(), ServiceError> {
        self.store.halt_agent(agent_id, reason)?;
        Ok(())
    }

    /// Removes an agent's halt mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn resume_agent(&self, agent_id: &str) -> Result<(), ServiceError> {
        self.store.resume_agent(agent_id)?;
        Ok(())
    }

    /// Reads the panic state, auto-disabling and persisting when the TTL
    /// has expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn get_panic_state(&self) -> Result<PanicState, ServiceError> {
        let mut state = self.store.get_panic_state()?;
        if panic_expired(&state) {
            state.enabled = false;
            if let Err(err) = self.store.set_panic_state(&state) {
                warn!(error = %err, "failed to persist expired panic state");
            }
        }
        Ok(state)
    }

    /// Writes the panic state.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_panic_state(&self, state: &PanicState) -> Result<(), ServiceError> {
        self.store.set_panic_state(state)?;
        Ok(())
    }

    /// The configured daily window view for one agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn get_agent_limits(&self, agent_id: &str) -> Result<AgentLimitsResponse, ServiceError> {
        let window_start = daily_window_start_ms();
        let state = self.store.get_limits_state(agent_id, window_start, "daily")?;
        let (spent, action_count) = state
            .map(|s| (s.budget_spent_gbp, s.action_count))
            .unwrap_or((0.0, 0));

        let defaults = &self.config.agents.default;
        let limit = self.config.daily_budget_gbp();

        Ok(AgentLimitsResponse {
            agent_id: agent_id.to_string(),
            window_start_ms: window_start,
            window_type: "daily".to_string(),
            spent_gbp: spent,
            limit_gbp: limit,
            percentage: spent / limit,
            warn_pct: defaults.warn_pct.clone(),
            throttle_pct: defaults.throttle_pct,
            hard_stop_pct: defaults.hard_stop_pct,
            action_count,
        })
    }

    /// The configured default limits, read-only.
    #[must_use]
    pub fn get_limits_config(&self) -> LimitsConfigResponse {
        let defaults = &self.config.agents.default;
        LimitsConfigResponse {
            daily_budget_gbp: defaults.daily_budget_gbp,
            warn_pct: defaults.warn_pct.clone(),
            throttle_pct: defaults.throttle_pct,
            hard_stop_pct: defaults.hard_stop_pct,
        }
    }

    /// The capability discovery document.
    ///
    /// # Errors
    ///
    /// Returns an error if the panic state cannot be read.
    pub fn get_capabilities(&self, daemon_version: &str) -> Result<CapabilitiesResponse, ServiceError> {
        let config = &self.config;
        let host = if config.server.host.is_empty() {
            "127.0.0.1"
        } else {
            config.server.host.as_str()
        };
        let port = if config.server.port == 0 {
            7777
        } else {
            config.server.port
        };
        let store_kind = if config.runtime_store.kind.is_empty() {
            "sqlite".to_string()
        } else {
            config.runtime_store.kind.clone()
        };
        let sink_kind = if config.ledger_sink.kind.is_empty() {
            "none".to_string()
        } else {
            config.ledger_sink.kind.clone()
        };

        let panic_state = self.get_panic_state()?;
        let panic = if panic_state.enabled {
            let window_seconds = if config.panic.r#loop.window_seconds > 0 {
                config.panic.r#loop.window_seconds
            } else {
                60
            };
            let stop_repeats = if config.panic.r#loop.stop_repeats > 0 {
                config.panic.r#loop.stop_repeats
            } else {
                5
            };
            Some(PanicInfo {
                enabled: true,
                expires_at: panic_state.expires_at,
                effective: Some(PanicEffectiveInfo {
                    max_daily_budget_usd: config.panic.max_daily_budget_usd,
                    network_default_deny: config.panic.network.default_deny,
                    filesystem_mode: config.panic.filesystem.mode.clone(),
                    r#loop: LoopInfo {
                        window_seconds,
                        stop_repeats,
                    },
                }),
            })
        } else {
            None
        };

        Ok(CapabilitiesResponse {
            ctrldot: CtrlDotCapabilities {
                version: daemon_version.to_string(),
                api: ApiInfo {
                    base_url: format!("http://{host}:{port}"),
                    version: "v1".to_string(),
                },
                runtime_store: RuntimeStoreInfo {
                    kind: store_kind,
                    sqlite_path: if config.runtime_store.sqlite_path.is_empty() {
                        String::new()
                    } else {
                        expand_path_str(&config.runtime_store.sqlite_path)
                    },
                },
                ledger_sink: LedgerSinkInfo {
                    kind: sink_kind,
                    bundle_dir: if config.ledger_sink.bundle.output_dir.is_empty() {
                        String::new()
                    } else {
                        expand_path_str(&config.ledger_sink.bundle.output_dir)
                    },
                },
                panic,
                features: FeaturesInfo {
                    resolution_tokens: true,
                    loop_detector: true,
                    budget_limits: true,
                    rules_engine: true,
                    auto_bundles: config.autobundle.enabled,
                    bundle_verify: true,
                },
            },
        })
    }

    /// Enables panic mode with an optional TTL and reason, persisting the
    /// state.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn enable_panic(&self, ttl_seconds: i64, reason: &str) -> Result<PanicState, ServiceError> {
        let now = Utc::now();
        let state = PanicState {
            enabled: true,
            enabled_at: Some(now),
            expires_at: if ttl_seconds > 0 {
                Some(now + Duration::seconds(ttl_seconds))
            } else {
                None
            },
            ttl_seconds,
            reason: reason.to_string(),
        };
        self.set_panic_state(&state)?;
        Ok(state)
    }

    /// Disables panic mode, persisting the cleared state.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn disable_panic(&self) -> Result<(), ServiceError> {
        self.set_panic_state(&PanicState::disabled())?;
        Ok(())
    }
}
