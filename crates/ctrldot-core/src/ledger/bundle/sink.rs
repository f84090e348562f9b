//! The bundle ledger sink.
//!
//! Buffers decisions and events in memory keyed by session; `close()`
//! drains the buffer and writes one signed bundle per session. `emit_*` are
//! O(1) under the mutex, so the decision path never waits on disk.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use super::super::{BoxFuture, DecisionRecord, LedgerSink, SinkError};
use super::{ConfigSnapshot, WriteOneOptions, load_or_generate, write_one};
use crate::config::Config;
use crate::domain::Event;

/// Session key used when a record carries no session.
const NO_SESSION: &str = "_no_session";

struct SessionBuffer {
    agent_id: String,
    decisions: Vec<DecisionRecord>,
    events: Vec<Event>,
}

/// Ledger sink that writes one signed bundle per session on close.
pub struct BundleSink {
    output_dir: String,
    sign_enabled: bool,
    key_path: String,
    public_key_path: String,
    runtime_store_kind: String,
    daemon_version: String,
    config_snapshot: ConfigSnapshot,
    sessions: Mutex<HashMap<String, SessionBuffer>>,
}

impl BundleSink {
    /// Creates the sink from config, ensuring the signing keypair exists
    /// when signing is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the output directory or keypair cannot be
    /// prepared.
    pub fn new(
        config: &Config,
        runtime_store_kind: &str,
        daemon_version: &str,
    ) -> Result<Self, SinkError> {
        let bundle_cfg = &config.ledger_sink.bundle;
        std::fs::create_dir_all(crate::config::expand_path(std::path::Path::new(
            &bundle_cfg.output_dir,
        )))
        .map_err(super::BundleError::from)?;
        if bundle_cfg.sign.enabled {
            load_or_generate(&bundle_cfg.sign.key_path, &bundle_cfg.sign.public_key_path)?;
        }
        Ok(Self {
            output_dir: bundle_cfg.output_dir.clone(),
            sign_enabled: bundle_cfg.sign.enabled,
            key_path: bundle_cfg.sign.key_path.clone(),
            public_key_path: bundle_cfg.sign.public_key_path.clone(),
            runtime_store_kind: runtime_store_kind.to_string(),
            daemon_version: daemon_version.to_string(),
            config_snapshot: ConfigSnapshot::from_config(config),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Number of buffered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    fn buffer_decision(&self, record: &DecisionRecord) {
        let key = if record.session_id.is_empty() {
            NO_SESSION.to_string()
        } else {
            record.session_id.clone()
        };
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let buffer = sessions.entry(key).or_insert_with(|| SessionBuffer {
            agent_id: record.agent_id.clone(),
            decisions: Vec::new(),
            events: Vec::new(),
        });
        buffer.decisions.push(record.clone());
    }

    fn buffer_event(&self, event: &Event) {
        let key = if event.session_id.is_empty() {
            NO_SESSION.to_string()
        } else {
            event.session_id.clone()
        };
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let buffer = sessions.entry(key).or_insert_with(|| SessionBuffer {
            agent_id: event.agent_id.clone(),
            decisions: Vec::new(),
            events: Vec::new(),
        });
        buffer.events.push(event.clone());
    }

    fn drain_and_write(&self) -> Result<(), SinkError> {
        let drained: Vec<(String, SessionBuffer)> = {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            sessions.drain().collect()
        };

        for (session_id, buffer) in drained {
            let dir = write_one(&WriteOneOptions {
                output_dir: self.output_dir.clone(),
                sign_enabled: self.sign_enabled,
                key_path: self.key_path.clone(),
                public_key_path: self.public_key_path.clone(),
                runtime_store_kind: self.runtime_store_kind.clone(),
                daemon_version: self.daemon_version.clone(),
                session_id,
                agent_id: buffer.agent_id,
                decisions: buffer.decisions,
                events: buffer.events,
                config_snapshot: Some(self.config_snapshot.clone()),
                ..WriteOneOptions::default()
            })?;
            info!(path = %dir.display(), "session bundle written");
        }
        Ok(())
    }
}

impl LedgerSink for BundleSink {
    fn emit_decision<'a>(
        &'a self,
        record: &'a DecisionRecord,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.buffer_decision(record);
            Ok(())
        })
    }

    fn emit_event<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.buffer_event(event);
            Ok(())
        })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move { self.drain_and_write() })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use super::super::{list_bundles, verify_bundle};
    use super::*;
    use crate::domain::Decision;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.ledger_sink.kind = "bundle".to_string();
        config.ledger_sink.bundle.output_dir = dir.join("bundles").display().to_string();
        config.ledger_sink.bundle.sign.key_path = dir.join("keys/signing").display().to_string();
        config.ledger_sink.bundle.sign.public_key_path =
            dir.join("keys/signing.pub").display().to_string();
        config
    }

    fn record(session: &str) -> DecisionRecord {
        DecisionRecord {
            id: "evt:1".to_string(),
            agent_id: "a1".to_string(),
            session_id: session.to_string(),
            timestamp: Utc::now(),
            action_type: "git.push".to_string(),
            action_target: Map::new(),
            action_inputs: Map::new(),
            decision: Decision::Deny,
            reason: "denied".to_string(),
            warnings: Vec::new(),
            throttle: None,
            budget_spent: 0.0,
            budget_limit: 10.0,
            action_hash: String::new(),
            execution_token_present: false,
        }
    }

    #[tokio::test]
    async fn close_writes_one_verified_bundle_per_session() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let sink = BundleSink::new(&config, "sqlite", "0.1.0").unwrap();

        sink.emit_decision(&record("sess:a")).await.unwrap();
        sink.emit_decision(&record("sess:a")).await.unwrap();
        sink.emit_decision(&record("sess:b")).await.unwrap();
        let mut event = Event::now("decision.issued", "a1");
        event.session_id = "sess:a".to_string();
        sink.emit_event(&event).await.unwrap();
        assert_eq!(sink.session_count(), 2);

        sink.close().await.unwrap();
        assert_eq!(sink.session_count(), 0);

        let names = list_bundles(&config.ledger_sink.bundle.output_dir).unwrap();
        assert_eq!(names.len(), 2);
        let out_dir = crate::config::expand_path(std::path::Path::new(
            &config.ledger_sink.bundle.output_dir,
        ));
        for name in names {
            verify_bundle(out_dir.join(name)).unwrap();
        }
    }

    #[tokio::test]
    async fn empty_session_buckets_under_no_session() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let sink = BundleSink::new(&config, "sqlite", "0.1.0").unwrap();

        sink.emit_decision(&record("")).await.unwrap();
        assert_eq!(sink.session_count(), 1);
        sink.close().await.unwrap();

        let names = list_bundles(&config.ledger_sink.bundle.output_dir).unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("_no_session"));
    }
}
