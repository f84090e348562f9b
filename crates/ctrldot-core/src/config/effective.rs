//! The panic overlay: a pure transform from base config to effective config.
//!
//! Panic mode is modelled as a function on immutable config snapshots rather
//! than a mode flag threaded through every engine. Each proposal is evaluated
//! against the config this function returns.

use chrono::Utc;

use super::{Config, LoopOverlay};
use crate::domain::PanicState;

/// USD to GBP approximate; used only for the panic budget clamp.
const USD_TO_GBP: f64 = 0.79;

/// Returns the config a proposal should be evaluated against.
///
/// When panic is disabled the base config is returned unchanged. Otherwise a
/// clone is tightened along every axis: budget clamp, thresholds, resolution
/// coercion, filesystem roots, network allowlist, and loop overlay.
#[must_use]
pub fn effective(base: &Config, panic_state: Option<&PanicState>) -> Config {
    let Some(state) = panic_state else {
        return base.clone();
    };
    if !state.enabled {
        return base.clone();
    }

    let mut out = base.clone();

    // Budget clamp: min(agent default, panic max) in GBP. Non-positive
    // budgets also become the clamp.
    let panic_budget_gbp = base.panic.max_daily_budget_usd * USD_TO_GBP;
    if out.agents.default.daily_budget_gbp <= 0.0
        || out.agents.default.daily_budget_gbp > panic_budget_gbp
    {
        out.agents.default.daily_budget_gbp = panic_budget_gbp;
    }

    // Threshold overrides, where positive.
    if base.panic.thresholds.warn_pct > 0.0 {
        out.agents.default.warn_pct = vec![base.panic.thresholds.warn_pct];
    }
    if base.panic.thresholds.throttle_pct > 0.0 {
        out.agents.default.throttle_pct = base.panic.thresholds.throttle_pct;
    }
    if base.panic.thresholds.stop_pct > 0.0 {
        out.agents.default.hard_stop_pct = base.panic.thresholds.stop_pct;
    }

    // Resolution: force require for all non-safe-read actions.
    if base.panic.resolution.force_require_resolution {
        out.rules.require_resolution = vec![
            "git.push".to_string(),
            "filesystem.delete".to_string(),
            "filesystem.write".to_string(),
            "tool.call".to_string(),
            "exec".to_string(),
            "network.".to_string(),
            "http.".to_string(),
            "web.".to_string(),
        ];
    }

    // Filesystem: restrict to panic workspace roots when set; read-only
    // with no roots denies all writes.
    if !base.panic.filesystem.workspace_roots.is_empty() {
        out.rules.filesystem.allow_roots = base.panic.filesystem.workspace_roots.clone();
    } else if base.panic.filesystem.mode == "read_only" {
        out.rules.filesystem.allow_roots = Vec::new();
    }

    // Network: default deny plus panic allowlist.
    if base.panic.network.default_deny {
        out.rules.network.deny_all = true;
        if !base.panic.network.allow_domains.is_empty() {
            out.rules.network.allow_domains = base.panic.network.allow_domains.clone();
        }
    }

    // Loop: tighter window and repeat count.
    let window_seconds = if base.panic.r#loop.window_seconds > 0 {
        base.panic.r#loop.window_seconds
    } else {
        60
    };
    let stop_repeats = if base.panic.r#loop.stop_repeats > 0 {
        base.panic.r#loop.stop_repeats
    } else {
        5
    };
    out.loop_overlay = Some(LoopOverlay {
        window_seconds,
        stop_repeats,
    });
    out.agents.default.max_iterations_per_action = stop_repeats;

    out
}

/// True when panic is enabled but past its expiry time.
#[must_use]
pub fn panic_expired(state: &PanicState) -> bool {
    if !state.enabled {
        return false;
    }
    match state.expires_at {
        Some(expires_at) => Utc::now() > expires_at,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn enabled_panic() -> PanicState {
        PanicState {
            enabled: true,
            enabled_at: Some(Utc::now()),
            expires_at: None,
            ttl_seconds: 0,
            reason: String::new(),
        }
    }

    #[test]
    fn disabled_panic_returns_base_unchanged() {
        let base = Config::default();
        let eff = effective(&base, None);
        assert!(eff.loop_overlay.is_none());
        assert_eq!(
            eff.rules.require_resolution,
            base.rules.require_resolution
        );

        let off = PanicState::default();
        let eff = effective(&base, Some(&off));
        assert!(eff.loop_overlay.is_none());
    }

    #[test]
    fn budget_clamps_to_usd_times_rate() {
        let base = Config::default(); // budget 10.0, panic max 5.0 USD
        let eff = effective(&base, Some(&enabled_panic()));
        assert!((eff.agents.default.daily_budget_gbp - 5.0 * 0.79).abs() < 1e-9);
    }

    #[test]
    fn budget_clamp_applies_to_non_positive_budgets() {
        let mut base = Config::default();
        base.agents.default.daily_budget_gbp = -1.0;
        let eff = effective(&base, Some(&enabled_panic()));
        assert!((eff.agents.default.daily_budget_gbp - 5.0 * 0.79).abs() < 1e-9);
    }

    #[test]
    fn smaller_base_budget_survives_the_clamp() {
        let mut base = Config::default();
        base.agents.default.daily_budget_gbp = 1.0;
        let eff = effective(&base, Some(&enabled_panic()));
        assert!((eff.agents.default.daily_budget_gbp - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn thresholds_are_overridden() {
        let base = Config::default();
        let eff = effective(&base, Some(&enabled_panic()));
        assert_eq!(eff.agents.default.warn_pct, vec![0.40]);
        assert!((eff.agents.default.throttle_pct - 0.60).abs() < f64::EPSILON);
        assert!((eff.agents.default.hard_stop_pct - 0.90).abs() < f64::EPSILON);
    }

    #[test]
    fn resolution_coercion_expands_the_set() {
        let base = Config::default();
        let eff = effective(&base, Some(&enabled_panic()));
        for entry in ["git.push", "filesystem.write", "tool.call", "exec", "network.", "http.", "web."] {
            assert!(
                eff.rules.require_resolution.iter().any(|e| e == entry),
                "missing {entry}"
            );
        }
    }

    #[test]
    fn read_only_mode_clears_allow_roots() {
        let mut base = Config::default();
        base.panic.filesystem.mode = "read_only".to_string();
        base.panic.filesystem.workspace_roots = Vec::new();
        let eff = effective(&base, Some(&enabled_panic()));
        assert!(eff.rules.filesystem.allow_roots.is_empty());
    }

    #[test]
    fn workspace_roots_replace_allow_roots() {
        let mut base = Config::default();
        base.panic.filesystem.workspace_roots = vec!["/workspace".to_string()];
        let eff = effective(&base, Some(&enabled_panic()));
        assert_eq!(eff.rules.filesystem.allow_roots, vec!["/workspace"]);
    }

    #[test]
    fn network_allowlist_is_swapped() {
        let base = Config::default();
        let eff = effective(&base, Some(&enabled_panic()));
        assert!(eff.rules.network.deny_all);
        assert!(eff.rules.network.allow_domains.iter().any(|d| d == "pypi.org"));
    }

    #[test]
    fn loop_overlay_is_installed_with_defaults() {
        let mut base = Config::default();
        base.panic.r#loop.window_seconds = 0;
        base.panic.r#loop.stop_repeats = 0;
        let eff = effective(&base, Some(&enabled_panic()));
        let overlay = eff.loop_overlay.expect("overlay installed");
        assert_eq!(overlay.window_seconds, 60);
        assert_eq!(overlay.stop_repeats, 5);
        assert_eq!(eff.agents.default.max_iterations_per_action, 5);
    }

    #[test]
    fn expiry_requires_enabled_and_past_deadline() {
        let mut state = enabled_panic();
        assert!(!panic_expired(&state));

        state.expires_at = Some(Utc::now() - Duration::seconds(5));
        assert!(panic_expired(&state));

        state.enabled = false;
        assert!(!panic_expired(&state));

        state.enabled = true;
        state.expires_at = Some(Utc::now() + Duration::seconds(60));
        assert!(!panic_expired(&state));
    }
}
