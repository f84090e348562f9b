//! Loop detection over the append-only event log.
//!
//! The detector counts recent `decision.issued` events whose action hash
//! matches the probe. It reads the same log operators observe, so every
//! loop verdict is auditable after the fact. Storage errors are treated as
//! "not a loop": the detector fails open and the other engines still guard.

// Event counts are bounded by the scan page size of 100.
#![allow(clippy::cast_possible_wrap)]

use chrono::{Duration, Utc};
use tracing::debug;

use crate::config::Config;
use crate::domain::ActionProposal;
use crate::hashing::action_hash;
use crate::store::{EventFilter, RuntimeStore};

/// Page size when scanning the event log for repeats.
const SCAN_LIMIT: i64 = 100;

/// Window for the default repeat check.
const DEFAULT_WINDOW_SECS: i64 = 600;

/// The always-on safety net: this many repeats within sixty seconds stops
/// the agent regardless of configuration.
const SAFETY_NET_WINDOW_SECS: i64 = 60;
const SAFETY_NET_REPEATS: i64 = 10;

/// Detects whether a proposal repeats a recent action often enough to be a
/// loop under the given effective config.
#[must_use]
pub fn detect(store: &dyn RuntimeStore, proposal: &ActionProposal, config: &Config) -> bool {
    let probe = action_hash(proposal);

    // Panic overlay: tighter window and repeat count replace the defaults.
    if let Some(overlay) = config.loop_overlay {
        if overlay.window_seconds > 0 && overlay.stop_repeats > 0 {
            let count = count_matches(store, &proposal.agent_id, &probe, overlay.window_seconds);
            return count >= overlay.stop_repeats;
        }
    }

    let max_iterations = if config.agents.default.max_iterations_per_action > 0 {
        config.agents.default.max_iterations_per_action
    } else {
        25
    };
    if count_matches(store, &proposal.agent_id, &probe, DEFAULT_WINDOW_SECS) >= max_iterations {
        return true;
    }

    count_matches(store, &proposal.agent_id, &probe, SAFETY_NET_WINDOW_SECS) >= SAFETY_NET_REPEATS
}

fn count_matches(store: &dyn RuntimeStore, agent_id: &str, probe: &str, window_secs: i64) -> i64 {
    let since_ms = (Utc::now() - Duration::seconds(window_secs)).timestamp_millis();
    let filter = EventFilter {
        agent_id: Some(agent_id.to_string()),
        since_ts_ms: Some(since_ms),
        limit: SCAN_LIMIT,
    };
    match store.list_events(&filter) {
        Ok(events) => events
            .iter()
            .filter(|event| !event.action_hash.is_empty() && event.action_hash == probe)
            .count() as i64,
        Err(err) => {
            debug!(agent_id, error = %err, "loop scan failed; treating as not a loop");
            0
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::{Config, LoopOverlay};
    use crate::domain::Event;
    use crate::store::SqliteStore;

    fn proposal(agent: &str, hash: &str) -> ActionProposal {
        let mut p = ActionProposal {
            agent_id: agent.to_string(),
            ..ActionProposal::default()
        };
        p.context.hash = hash.to_string();
        p
    }

    fn seed_events(store: &SqliteStore, agent: &str, hash: &str, count: usize, age_secs: i64) {
        for _ in 0..count {
            let mut event = Event::now("decision.issued", agent);
            event.ts = Utc::now() - chrono::Duration::seconds(age_secs);
            event.action_hash = hash.to_string();
            store.append_event(&event).unwrap();
        }
    }

    #[test]
    fn overlay_mode_stops_at_threshold_exactly() {
        let store = SqliteStore::in_memory().unwrap();
        let mut cfg = Config::default();
        cfg.loop_overlay = Some(LoopOverlay {
            window_seconds: 60,
            stop_repeats: 3,
        });

        seed_events(&store, "a1", "h", 3, 30);
        assert!(detect(&store, &proposal("a1", "h"), &cfg), "3 priors reach 3");

        let store2 = SqliteStore::in_memory().unwrap();
        seed_events(&store2, "a1", "h", 2, 30);
        assert!(!detect(&store2, &proposal("a1", "h"), &cfg), "2 priors stay under 3");
    }

    #[test]
    fn overlay_ignores_events_outside_window() {
        let store = SqliteStore::in_memory().unwrap();
        let mut cfg = Config::default();
        cfg.loop_overlay = Some(LoopOverlay {
            window_seconds: 60,
            stop_repeats: 3,
        });
        seed_events(&store, "a1", "h", 5, 120); // all older than the window
        assert!(!detect(&store, &proposal("a1", "h"), &cfg));
    }

    #[test]
    fn normal_mode_uses_max_iterations_over_ten_minutes() {
        let store = SqliteStore::in_memory().unwrap();
        let mut cfg = Config::default();
        cfg.agents.default.max_iterations_per_action = 4;

        seed_events(&store, "a1", "h", 4, 300); // within 10 min, outside 60 s
        assert!(detect(&store, &proposal("a1", "h"), &cfg));

        let store2 = SqliteStore::in_memory().unwrap();
        seed_events(&store2, "a1", "h", 3, 300);
        assert!(!detect(&store2, &proposal("a1", "h"), &cfg));
    }

    #[test]
    fn safety_net_fires_at_ten_in_sixty_seconds() {
        let store = SqliteStore::in_memory().unwrap();
        let cfg = Config::default(); // max_iterations 25 stays out of the way
        seed_events(&store, "a1", "h", 10, 20);
        assert!(detect(&store, &proposal("a1", "h"), &cfg));

        let store2 = SqliteStore::in_memory().unwrap();
        seed_events(&store2, "a1", "h", 9, 20);
        assert!(!detect(&store2, &proposal("a1", "h"), &cfg));
    }

    #[test]
    fn other_agents_and_hashes_do_not_count() {
        let store = SqliteStore::in_memory().unwrap();
        let mut cfg = Config::default();
        cfg.loop_overlay = Some(LoopOverlay {
            window_seconds: 60,
            stop_repeats: 3,
        });
        seed_events(&store, "a2", "h", 5, 10); // different agent
        seed_events(&store, "a1", "other", 5, 10); // different hash
        assert!(!detect(&store, &proposal("a1", "h"), &cfg));
    }
}
