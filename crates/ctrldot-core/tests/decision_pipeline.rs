//! End-to-end decision pipeline scenarios.
//!
//! Each test drives the full service: store, engines, combiner, ledger
//! sink, and (where relevant) the autobundle manager, against an in-memory
//! store and temp-dir bundles.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ctrldot_core::config::Config;
use ctrldot_core::domain::{
    ActionProposal, Decision, Event, EventSeverity, PanicState, event_types,
};
use ctrldot_core::ledger::autobundle::AutobundleManager;
use ctrldot_core::ledger::bundle::{BundleError, verify_bundle};
use ctrldot_core::ledger::NoopSink;
use ctrldot_core::limits::daily_window_start_ms;
use ctrldot_core::service::DecisionService;
use ctrldot_core::store::{EventFilter, RuntimeStore, SqliteStore};
use ctrldot_core::token::TokenKeeper;
use serde_json::json;

struct Harness {
    store: Arc<SqliteStore>,
    service: DecisionService,
    _tmp: Option<tempfile::TempDir>,
}

fn harness(config: Config) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let service = DecisionService::new(
        store.clone(),
        Arc::new(config),
        Arc::new(NoopSink),
        None,
        TokenKeeper::from_secret("test-secret"),
    );
    Harness {
        store,
        service,
        _tmp: None,
    }
}

fn harness_with_autobundle(mut config: Config) -> Harness {
    let tmp = tempfile::TempDir::new().unwrap();
    config.autobundle.output_dir = tmp.path().join("bundles").display().to_string();
    config.ledger_sink.bundle.sign.key_path = tmp.path().join("keys/signing").display().to_string();
    config.ledger_sink.bundle.sign.public_key_path =
        tmp.path().join("keys/signing.pub").display().to_string();

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let config = Arc::new(config);
    let manager = Arc::new(AutobundleManager::new(
        config.clone(),
        Some(store.clone() as Arc<dyn RuntimeStore>),
        "0.1.0",
    ));
    let service = DecisionService::new(
        store.clone(),
        config,
        Arc::new(NoopSink),
        Some(manager),
        TokenKeeper::from_secret("test-secret"),
    );
    Harness {
        store,
        service,
        _tmp: Some(tmp),
    }
}

fn fs_read_proposal(agent: &str, path: &str, cost: f64) -> ActionProposal {
    let mut p = ActionProposal {
        agent_id: agent.to_string(),
        ..ActionProposal::default()
    };
    p.intent.title = "read a file".to_string();
    p.action.action_type = "filesystem.read".to_string();
    p.action.target.insert("path".to_string(), json!(path));
    p.cost.estimated_gbp = cost;
    p.context.tool = "test".to_string();
    p
}

fn seed_spend(store: &SqliteStore, agent: &str, gbp: f64) {
    let mut state = ctrldot_core::domain::LimitsState::empty_daily(agent, daily_window_start_ms());
    state.budget_spent_gbp = gbp;
    state.action_count = 1;
    store.update_limits_state(&state).unwrap();
}

#[tokio::test]
async fn s1_plain_allow_mints_token_and_accounts_spend() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let response = h
        .service
        .propose_action(&fs_read_proposal("a1", "~/dev/x.txt", 0.01))
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::Allow);
    assert!(!response.execution_token.is_empty());
    assert!(response.reasons.is_empty());
    assert!(response.recommendation.is_none());
    assert!(!response.ledger_event_id.is_empty());

    // One decision event appended, carrying the action hash and cost.
    let events = h
        .store
        .list_events(&EventFilter {
            agent_id: Some("a1".to_string()),
            ..EventFilter::default()
        })
        .unwrap();
    let decision_events: Vec<&Event> = events
        .iter()
        .filter(|e| e.event_type == event_types::DECISION_ISSUED)
        .collect();
    assert_eq!(decision_events.len(), 1);
    assert_eq!(decision_events[0].event_id, response.ledger_event_id);
    assert!(!decision_events[0].action_hash.is_empty());
    assert_eq!(decision_events[0].cost_gbp, Some(0.01));
    assert_eq!(decision_events[0].severity, EventSeverity::Info);

    // Limits window incremented by the proposal cost.
    let limits = h.service.get_agent_limits("a1").unwrap();
    assert!((limits.spent_gbp - 0.01).abs() < 1e-9);
    assert_eq!(limits.action_count, 1);
}

#[tokio::test]
async fn s2_resolution_required_denies_with_code_and_recommendation() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.action.action_type = "git.push".to_string();
    proposal.resolution_token = String::new();

    let response = h.service.propose_action(&proposal).await.unwrap();

    assert_eq!(response.decision, Decision::Deny);
    assert_eq!(response.reason, "Requires resolution for git.push");
    assert_eq!(response.reasons.len(), 1);
    assert_eq!(response.reasons[0].code, "RESOLUTION_REQUIRED");
    let rec = response.recommendation.expect("recommendation attached");
    assert_eq!(rec.kind, "use_resolution");
    assert!(response.execution_token.is_empty());

    // No spend accounted on a hard outcome.
    let limits = h.service.get_agent_limits("a1").unwrap();
    assert!(limits.spent_gbp.abs() < f64::EPSILON);
}

#[tokio::test]
async fn s2b_valid_resolution_token_allows_the_action() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let keeper = TokenKeeper::from_secret("test-secret");
    let token = keeper.mint("a1", "git.push", 120).unwrap();

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.action.action_type = "git.push".to_string();
    proposal.resolution_token = token;

    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(response.decision, Decision::Allow);

    // A token for the wrong action type is finalised into the same denial
    // as an absent one.
    let wrong = keeper.mint("a1", "filesystem.delete", 120).unwrap();
    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.action.action_type = "git.push".to_string();
    proposal.resolution_token = wrong;
    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(response.decision, Decision::Deny);
    assert_eq!(response.reason, "Requires resolution for git.push");
}

#[tokio::test]
async fn s3_budget_stop_at_hard_threshold() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();
    seed_spend(&h.store, "a1", 9.90);

    let response = h
        .service
        .propose_action(&fs_read_proposal("a1", "~/dev/x.txt", 0.20))
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::Stop);
    assert_eq!(response.reason, "Budget limit reached");
    assert_eq!(response.reasons[0].code, "BUDGET_STOP_THRESHOLD");
    assert!(response.execution_token.is_empty());

    // The window is not incremented by a stopped action.
    let limits = h.service.get_agent_limits("a1").unwrap();
    assert!((limits.spent_gbp - 9.90).abs() < 1e-9);
}

#[tokio::test]
async fn s4_loop_stop_under_panic_overlay() {
    let mut config = Config::default();
    config.panic.r#loop.window_seconds = 60;
    config.panic.r#loop.stop_repeats = 3;
    let h = harness(config);
    h.service.register_agent("a1", "Agent One", None).unwrap();

    h.store
        .set_panic_state(&PanicState {
            enabled: true,
            enabled_at: Some(Utc::now()),
            expires_at: None,
            ttl_seconds: 0,
            reason: "test".to_string(),
        })
        .unwrap();

    // Three identical decision events in the last thirty seconds reach the
    // stop threshold.
    for _ in 0..3 {
        let mut event = Event::now(event_types::DECISION_ISSUED, "a1");
        event.ts = Utc::now() - Duration::seconds(15);
        event.action_hash = "probe-hash".to_string();
        h.store.append_event(&event).unwrap();
    }

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.context.hash = "probe-hash".to_string();

    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(response.decision, Decision::Stop);
    assert!(response.reason.contains("Loop detected"));
    assert_eq!(response.reasons[0].code, "LOOP_STOP_THRESHOLD");
    let rec = response.recommendation.expect("recommendation attached");
    assert_eq!(rec.kind, "reduce_loop");
}

#[tokio::test]
async fn s4b_second_identical_proposal_is_not_yet_a_loop() {
    let mut config = Config::default();
    config.panic.r#loop.window_seconds = 60;
    config.panic.r#loop.stop_repeats = 3;
    let h = harness(config);
    h.service.register_agent("a1", "Agent One", None).unwrap();
    h.store
        .set_panic_state(&PanicState {
            enabled: true,
            enabled_at: Some(Utc::now()),
            expires_at: None,
            ttl_seconds: 0,
            reason: String::new(),
        })
        .unwrap();

    // One short of the stop threshold.
    for _ in 0..2 {
        let mut event = Event::now(event_types::DECISION_ISSUED, "a1");
        event.ts = Utc::now() - Duration::seconds(15);
        event.action_hash = "probe-hash".to_string();
        h.store.append_event(&event).unwrap();
    }

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.context.hash = "probe-hash".to_string();

    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_ne!(response.decision, Decision::Stop);
}

#[tokio::test]
async fn s5_network_denies_unlisted_and_allows_subdomains() {
    let mut config = Config::default();
    config.rules.network.deny_all = true;
    config.rules.network.allow_domains = vec!["github.com".to_string()];
    let h = harness(config);
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let mut proposal = ActionProposal {
        agent_id: "a1".to_string(),
        ..ActionProposal::default()
    };
    proposal.action.action_type = "http.get".to_string();
    proposal
        .action
        .target
        .insert("url".to_string(), json!("https://api.example.com/x"));

    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(response.decision, Decision::Deny);
    assert_eq!(response.reason, "Network access denied by rules");
    assert_eq!(response.reasons[0].code, "NETWORK_DOMAIN_DENIED");
    let rec = response.recommendation.expect("recommendation attached");
    assert_eq!(rec.kind, "tighten_scope");

    proposal
        .action
        .target
        .insert("url".to_string(), json!("https://raw.github.com/org/repo"));
    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(response.decision, Decision::Allow);
}

#[tokio::test]
async fn s6_deny_autobundle_verifies_and_detects_tampering() {
    let h = harness_with_autobundle(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.action.action_type = "git.push".to_string();
    proposal.session_id = "sess:bundle-test".to_string();

    let response = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(response.decision, Decision::Deny);
    assert!(!response.autobundle_path.is_empty(), "bundle written on deny");
    assert_eq!(response.autobundle_trigger, "decision_deny");

    let dir = std::path::PathBuf::from(&response.autobundle_path);
    verify_bundle(&dir).unwrap();

    // Tamper with the decision records and expect the verifier to name the
    // file.
    let target = dir.join("decision_records.jsonl");
    let mut data = std::fs::read(&target).unwrap();
    data[0] ^= 0x01;
    std::fs::write(&target, data).unwrap();

    match verify_bundle(&dir).unwrap_err() {
        BundleError::HashMismatch { file, .. } => assert_eq!(file, "decision_records.jsonl"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn autobundle_debounce_limits_to_one_per_window() {
    let h = harness_with_autobundle(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.action.action_type = "git.push".to_string();
    proposal.session_id = "sess:debounce".to_string();

    let first = h.service.propose_action(&proposal).await.unwrap();
    assert!(!first.autobundle_path.is_empty());

    let second = h.service.propose_action(&proposal).await.unwrap();
    assert_eq!(second.decision, Decision::Deny);
    assert!(
        second.autobundle_path.is_empty(),
        "second deny within debounce produces no bundle"
    );
}

#[tokio::test]
async fn unregistered_agent_is_denied() {
    let h = harness(Config::default());
    let response = h
        .service
        .propose_action(&fs_read_proposal("ghost", "~/dev/x.txt", 0.01))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Deny);
    assert_eq!(response.reason, "Agent not registered");
    assert_eq!(response.reasons[0].code, "DENY_OR_STOP");
}

#[tokio::test]
async fn halted_agent_is_stopped_with_code_and_recommendation() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();
    h.service.halt_agent("a1", "operator request").unwrap();

    let response = h
        .service
        .propose_action(&fs_read_proposal("a1", "~/dev/x.txt", 0.01))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Stop);
    assert_eq!(response.reason, "Agent is halted");
    assert_eq!(response.reasons[0].code, "AGENT_HALTED");
    let rec = response.recommendation.expect("recommendation attached");
    assert_eq!(rec.kind, "enable_ctrldot");

    h.service.resume_agent("a1").unwrap();
    let response = h
        .service
        .propose_action(&fs_read_proposal("a1", "~/dev/x.txt", 0.01))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Allow);
}

#[tokio::test]
async fn warn_band_produces_warn_with_budget_code() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();
    seed_spend(&h.store, "a1", 7.00);

    let response = h
        .service
        .propose_action(&fs_read_proposal("a1", "~/dev/x.txt", 0.05))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Warn);
    assert_eq!(response.warnings.len(), 1);
    assert_eq!(response.warnings[0].code, "BUDGET_70");
    assert!(!response.execution_token.is_empty(), "warn is allow-like");
}

#[tokio::test]
async fn throttle_band_attaches_profile_and_recommendation() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();
    seed_spend(&h.store, "a1", 9.55);

    let response = h
        .service
        .propose_action(&fs_read_proposal("a1", "~/dev/x.txt", 0.01))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Throttle);
    let throttle = response.throttle.expect("profile attached");
    assert_eq!(throttle.model_policy, "cheap");
    assert_eq!(response.recommendation.unwrap().kind, "reduce_loop");
    assert!(!response.execution_token.is_empty(), "throttle is allow-like");
}

#[tokio::test]
async fn decisions_are_deterministic_for_fixed_inputs() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();

    let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
    proposal.action.action_type = "git.push".to_string();

    let first = h.service.propose_action(&proposal).await.unwrap();
    let second = h.service.propose_action(&proposal).await.unwrap();

    // Identical modulo event and token identifiers.
    assert_eq!(first.decision, second.decision);
    assert_eq!(first.reason, second.reason);
    assert_eq!(first.reasons, second.reasons);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(first.recommendation, second.recommendation);
}

#[tokio::test]
async fn panic_expiry_is_persisted_on_read() {
    let h = harness(Config::default());
    let now = Utc::now();
    h.store
        .set_panic_state(&PanicState {
            enabled: true,
            enabled_at: Some(now - Duration::seconds(120)),
            expires_at: Some(now - Duration::seconds(60)),
            ttl_seconds: 60,
            reason: "expired".to_string(),
        })
        .unwrap();

    let state = h.service.get_panic_state().unwrap();
    assert!(!state.enabled, "expired panic reads as disabled");

    // The transition was persisted, not just returned.
    let stored = h.store.get_panic_state().unwrap();
    assert!(!stored.enabled);
}

#[tokio::test]
async fn panic_tightens_but_never_loosens() {
    // A proposal allowed under panic is allowed under the base config too
    // (checked along the resolution and network axes).
    let base = Config::default();
    let h_base = harness(base.clone());
    h_base.service.register_agent("a1", "A", None).unwrap();

    let mut config = base;
    config.panic.resolution.force_require_resolution = true;
    let h_panic = harness(config);
    h_panic.service.register_agent("a1", "A", None).unwrap();
    h_panic
        .store
        .set_panic_state(&PanicState {
            enabled: true,
            enabled_at: Some(Utc::now()),
            expires_at: None,
            ttl_seconds: 0,
            reason: String::new(),
        })
        .unwrap();

    for action_type in ["filesystem.read", "tool.call", "git.push", "http.get"] {
        let mut proposal = fs_read_proposal("a1", "~/dev/x.txt", 0.01);
        proposal.action.action_type = action_type.to_string();
        if action_type == "http.get" {
            proposal
                .action
                .target
                .insert("url".to_string(), json!("https://api.anthropic.com/v1"));
        }
        let under_panic = h_panic.service.propose_action(&proposal).await.unwrap();
        let under_base = h_base.service.propose_action(&proposal).await.unwrap();

        if under_panic.decision == Decision::Allow {
            assert_eq!(
                under_base.decision,
                Decision::Allow,
                "panic allowed {action_type} but base did not"
            );
        }
    }
}

#[tokio::test]
async fn capabilities_reflect_config_and_panic() {
    let h = harness(Config::default());
    let caps = h.service.get_capabilities("0.1.0").unwrap();
    assert_eq!(caps.ctrldot.api.base_url, "http://127.0.0.1:7777");
    assert_eq!(caps.ctrldot.runtime_store.kind, "sqlite");
    assert_eq!(caps.ctrldot.ledger_sink.kind, "none");
    assert!(caps.ctrldot.panic.is_none());
    assert!(caps.ctrldot.features.auto_bundles);

    h.service.enable_panic(300, "drill").unwrap();
    let caps = h.service.get_capabilities("0.1.0").unwrap();
    let panic = caps.ctrldot.panic.expect("panic summary present");
    assert!(panic.enabled);
    assert!(panic.expires_at.is_some());
    let effective = panic.effective.expect("effective overlay present");
    assert_eq!(effective.r#loop.stop_repeats, 5);
}

#[tokio::test]
async fn sessions_start_and_end() {
    let h = harness(Config::default());
    h.service.register_agent("a1", "Agent One", None).unwrap();
    let mut metadata = serde_json::Map::new();
    metadata.insert("task".to_string(), json!("migration"));

    let session = h.service.start_session("a1", metadata).unwrap();
    assert!(session.session_id.starts_with("sess:"));

    h.service.end_session(&session.session_id).unwrap();
    let stored = h.store.get_session(&session.session_id).unwrap().unwrap();
    assert!(stored.ended_at.is_some());
}
