//! Triggered, debounced bundle production.
//!
//! The manager writes a signed bundle when a hard outcome, shutdown, or
//! panic toggle fires a configured trigger. Decision triggers debounce per
//! `session.trigger` key; shutdown, panic toggles, and manual tests never
//! debounce.

// Debounce windows are small; the elapsed-seconds cast cannot wrap.
#![allow(clippy::cast_possible_wrap)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Duration, Utc};

use super::bundle::{ConfigSnapshot, WriteOneOptions, write_one};
use super::{DecisionRecord, SinkError};
use crate::config::Config;
use crate::domain::Event;
use crate::store::{EventFilter, RuntimeStore};

/// Bundle trigger: DENY decision.
pub const TRIGGER_DECISION_DENY: &str = "decision_deny";
/// Bundle trigger: STOP decision.
pub const TRIGGER_DECISION_STOP: &str = "decision_stop";
/// Bundle trigger: loop-driven STOP.
pub const TRIGGER_LOOP_STOP: &str = "loop_stop";
/// Bundle trigger: budget-driven STOP.
pub const TRIGGER_BUDGET_STOP: &str = "budget_stop";
/// Bundle trigger: daemon shutdown.
pub const TRIGGER_SHUTDOWN: &str = "shutdown";
/// Bundle trigger: panic enabled.
pub const TRIGGER_PANIC_ON: &str = "panic_on";
/// Bundle trigger: panic disabled.
pub const TRIGGER_PANIC_OFF: &str = "panic_off";
/// Bundle trigger: forced via the test endpoint or CLI.
pub const TRIGGER_MANUAL_TEST: &str = "manual_test";

/// Fallback debounce when the config value is non-positive.
const DEFAULT_DEBOUNCE_SECS: i64 = 10;

/// Window of recent events included as the bundle's event tail.
const EVENTS_TAIL_WINDOW_SECS: i64 = 3600;

/// Creates signed bundles on DENY / STOP / shutdown / panic toggle, with
/// per session+trigger debounce.
pub struct AutobundleManager {
    config: Arc<Config>,
    store: Option<Arc<dyn RuntimeStore>>,
    daemon_version: String,
    last_fired: Mutex<HashMap<String, Instant>>,
}

impl AutobundleManager {
    /// Creates a manager. `store` may be `None`, which disables the event
    /// tail.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        store: Option<Arc<dyn RuntimeStore>>,
        daemon_version: &str,
    ) -> Self {
        let daemon_version = if daemon_version.is_empty() {
            "0.1.0".to_string()
        } else {
            daemon_version.to_string()
        };
        Self {
            config,
            store,
            daemon_version,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Writes a bundle for a hard decision when the trigger is enabled and
    /// not debounced. Returns the bundle path, or `None` when suppressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be written.
    pub fn maybe_bundle_on_decision(
        &self,
        record: &DecisionRecord,
        trigger: &str,
        effective_panic: bool,
        next_steps: &[String],
        reason_codes: &[String],
    ) -> Result<Option<String>, SinkError> {
        if !self.config.autobundle.enabled || !self.trigger_enabled(trigger) {
            return Ok(None);
        }
        let session_key = if record.session_id.is_empty() {
            "_no_session"
        } else {
            record.session_id.as_str()
        };
        let debounce_key = format!("{session_key}.{trigger}");
        if self.debounced(&debounce_key) {
            return Ok(None);
        }

        let output_dir = self.output_dir();
        if output_dir.is_empty() {
            return Ok(None);
        }

        let events = self.events_tail(Some(&record.agent_id));
        let dir = write_one(&WriteOneOptions {
            output_dir,
            sign_enabled: self.config.ledger_sink.bundle.sign.enabled,
            key_path: self.config.ledger_sink.bundle.sign.key_path.clone(),
            public_key_path: self.config.ledger_sink.bundle.sign.public_key_path.clone(),
            runtime_store_kind: self.runtime_kind(),
            daemon_version: self.daemon_version.clone(),
            session_id: record.session_id.clone(),
            agent_id: record.agent_id.clone(),
            decisions: vec![record.clone()],
            events,
            config_snapshot: self.snapshot(),
            trigger: trigger.to_string(),
            decision_id: record.id.clone(),
            effective_panic_enabled: effective_panic,
            reason_codes: reason_codes.to_vec(),
            next_steps: next_steps.to_vec(),
        })?;

        self.last_fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(debounce_key, Instant::now());
        Ok(Some(dir.display().to_string()))
    }

    /// Writes a shutdown bundle when `triggers.on_shutdown` is enabled.
    /// Debounce does not apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be written.
    pub fn maybe_bundle_on_shutdown(&self) -> Result<Option<String>, SinkError> {
        if !self.config.autobundle.enabled || !self.config.autobundle.triggers.on_shutdown {
            return Ok(None);
        }
        let output_dir = self.output_dir();
        if output_dir.is_empty() {
            return Ok(None);
        }
        let dir = write_one(&WriteOneOptions {
            output_dir,
            sign_enabled: self.config.ledger_sink.bundle.sign.enabled,
            key_path: self.config.ledger_sink.bundle.sign.key_path.clone(),
            public_key_path: self.config.ledger_sink.bundle.sign.public_key_path.clone(),
            runtime_store_kind: self.runtime_kind(),
            daemon_version: self.daemon_version.clone(),
            events: self.events_tail(None),
            config_snapshot: self.snapshot(),
            trigger: TRIGGER_SHUTDOWN.to_string(),
            ..WriteOneOptions::default()
        })?;
        Ok(Some(dir.display().to_string()))
    }

    /// Writes a bundle when panic is toggled, if `triggers.on_panic_toggle`
    /// is enabled. Debounce does not apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be written.
    pub fn maybe_bundle_on_panic_toggle(&self, panic_on: bool) -> Result<Option<String>, SinkError> {
        if !self.config.autobundle.enabled || !self.config.autobundle.triggers.on_panic_toggle {
            return Ok(None);
        }
        let output_dir = self.output_dir();
        if output_dir.is_empty() {
            return Ok(None);
        }
        let trigger = if panic_on {
            TRIGGER_PANIC_ON
        } else {
            TRIGGER_PANIC_OFF
        };
        let dir = write_one(&WriteOneOptions {
            output_dir,
            sign_enabled: self.config.ledger_sink.bundle.sign.enabled,
            key_path: self.config.ledger_sink.bundle.sign.key_path.clone(),
            public_key_path: self.config.ledger_sink.bundle.sign.public_key_path.clone(),
            runtime_store_kind: self.runtime_kind(),
            daemon_version: self.daemon_version.clone(),
            trigger: trigger.to_string(),
            effective_panic_enabled: panic_on,
            ..WriteOneOptions::default()
        })?;
        Ok(Some(dir.display().to_string()))
    }

    /// Forces a `manual_test` bundle. No debounce.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be written.
    pub fn maybe_bundle_test(&self) -> Result<Option<String>, SinkError> {
        if !self.config.autobundle.enabled {
            return Ok(None);
        }
        let output_dir = self.output_dir();
        if output_dir.is_empty() {
            return Ok(None);
        }
        let dir = write_one(&WriteOneOptions {
            output_dir,
            sign_enabled: self.config.ledger_sink.bundle.sign.enabled,
            key_path: self.config.ledger_sink.bundle.sign.key_path.clone(),
            public_key_path: self.config.ledger_sink.bundle.sign.public_key_path.clone(),
            runtime_store_kind: self.runtime_kind(),
            daemon_version: self.daemon_version.clone(),
            events: self.events_tail(None),
            config_snapshot: self.snapshot(),
            trigger: TRIGGER_MANUAL_TEST.to_string(),
            ..WriteOneOptions::default()
        })?;
        Ok(Some(dir.display().to_string()))
    }

    fn trigger_enabled(&self, trigger: &str) -> bool {
        let triggers = &self.config.autobundle.triggers;
        match trigger {
            TRIGGER_DECISION_DENY => triggers.on_deny,
            TRIGGER_DECISION_STOP => triggers.on_stop,
            TRIGGER_LOOP_STOP => triggers.on_loop_stop,
            TRIGGER_BUDGET_STOP => triggers.on_budget_stop,
            _ => false,
        }
    }

    fn debounced(&self, key: &str) -> bool {
        let last_fired = self
            .last_fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(last) = last_fired.get(key) else {
            return false;
        };
        let debounce_secs = if self.config.autobundle.debounce_seconds > 0 {
            self.config.autobundle.debounce_seconds
        } else {
            DEFAULT_DEBOUNCE_SECS
        };
        (last.elapsed().as_secs() as i64) < debounce_secs
    }

    fn events_tail(&self, agent_id: Option<&str>) -> Vec<Event> {
        let tail = self.config.autobundle.include.events_tail;
        let Some(store) = &self.store else {
            return Vec::new();
        };
        if tail <= 0 {
            return Vec::new();
        }
        let since = (Utc::now() - Duration::seconds(EVENTS_TAIL_WINDOW_SECS)).timestamp_millis();
        store
            .list_events(&EventFilter {
                agent_id: agent_id.map(ToString::to_string),
                since_ts_ms: Some(since),
                limit: tail,
            })
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Option<ConfigSnapshot> {
        if self.config.autobundle.include.config_snapshot {
            Some(ConfigSnapshot::from_config(&self.config))
        } else {
            None
        }
    }

    fn output_dir(&self) -> String {
        let dir = &self.config.autobundle.output_dir;
        if !dir.is_empty() {
            return dir.clone();
        }
        let fallback = &self.config.ledger_sink.bundle.output_dir;
        if !fallback.is_empty() {
            return fallback.clone();
        }
        ".ctrldot/bundles".to_string()
    }

    fn runtime_kind(&self) -> String {
        if self.config.runtime_store.kind.is_empty() {
            "sqlite".to_string()
        } else {
            self.config.runtime_store.kind.clone()
        }
    }
}
