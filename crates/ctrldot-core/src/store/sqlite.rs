//! `SQLite`-backed runtime store.
//!
//! Uses WAL mode so readers proceed while the single writer is active.
//! Timestamps are stored as fixed-width RFC 3339 UTC text (lexicographic
//! order equals chronological order), limits windows as unix milliseconds.

// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Map;

use super::{EventFilter, RuntimeStore, StoreError};
use crate::config::expand_path;
use crate::domain::{Agent, AgentMode, Event, EventSeverity, LimitsState, PanicState, Session};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Default page size for event listings.
const DEFAULT_EVENT_LIMIT: i64 = 50;

/// The embedded runtime store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates the store at `path` (with `~` expansion), sets
    /// pragmas, and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialised.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = expand_path(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialised.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(table: &'static str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            details: format!("timestamp {s:?}: {e}"),
        })
}

fn mode_to_str(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Normal => "normal",
        AgentMode::Cheap => "cheap",
        AgentMode::Throttled => "throttled",
    }
}

fn parse_mode(s: &str) -> Result<AgentMode, StoreError> {
    match s {
        "normal" => Ok(AgentMode::Normal),
        "cheap" => Ok(AgentMode::Cheap),
        "throttled" => Ok(AgentMode::Throttled),
        other => Err(StoreError::CorruptRow {
            table: "ctrldot_agents",
            details: format!("unknown default_mode {other:?}"),
        }),
    }
}

fn severity_to_str(severity: EventSeverity) -> &'static str {
    severity.as_str()
}

fn parse_severity(s: &str) -> Result<EventSeverity, StoreError> {
    match s {
        "info" => Ok(EventSeverity::Info),
        "warn" => Ok(EventSeverity::Warn),
        "error" => Ok(EventSeverity::Error),
        other => Err(StoreError::CorruptRow {
            table: "ctrldot_events",
            details: format!("unknown severity {other:?}"),
        }),
    }
}

fn parse_payload(s: &str) -> Map<String, serde_json::Value> {
    if s.is_empty() {
        return Map::new();
    }
    serde_json::from_str(s).unwrap_or_default()
}

struct EventRow {
    event_id: String,
    event_type: String,
    agent_id: String,
    session_id: Option<String>,
    severity: String,
    payload_json: String,
    action_hash: String,
    cost_gbp: Option<f64>,
    cost_tokens: Option<i64>,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            agent_id: row.get(2)?,
            session_id: row.get(3)?,
            severity: row.get(4)?,
            payload_json: row.get(5)?,
            action_hash: row.get(6)?,
            cost_gbp: row.get(7)?,
            cost_tokens: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_event(self) -> Result<Event, StoreError> {
        Ok(Event {
            event_id: self.event_id,
            ts: parse_ts("ctrldot_events", &self.created_at)?,
            event_type: self.event_type,
            agent_id: self.agent_id,
            session_id: self.session_id.unwrap_or_default(),
            severity: parse_severity(&self.severity)?,
            payload_json: parse_payload(&self.payload_json),
            action_hash: self.action_hash,
            cost_gbp: self.cost_gbp,
            cost_tokens: self.cost_tokens,
        })
    }
}

const EVENT_COLUMNS: &str = "event_id, event_type, agent_id, session_id, severity, payload_json, action_hash, cost_gbp, cost_tokens, created_at";

impl RuntimeStore for SqliteStore {
    fn create_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ctrldot_agents (agent_id, display_name, created_at, default_mode)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (agent_id) DO NOTHING",
            params![
                agent.agent_id,
                agent.display_name,
                to_ts(agent.created_at),
                mode_to_str(agent.default_mode),
            ],
        )?;
        Ok(())
    }

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT agent_id, display_name, created_at, default_mode
             FROM ctrldot_agents
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(agent_id, display_name, created_at, mode)| {
                Ok(Agent {
                    agent_id,
                    display_name,
                    created_at: parse_ts("ctrldot_agents", &created_at)?,
                    default_mode: parse_mode(&mode)?,
                })
            })
            .collect()
    }

    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT agent_id, display_name, created_at, default_mode
                 FROM ctrldot_agents WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((agent_id, display_name, created_at, mode)) => Ok(Some(Agent {
                agent_id,
                display_name,
                created_at: parse_ts("ctrldot_agents", &created_at)?,
                default_mode: parse_mode(&mode)?,
            })),
            None => Ok(None),
        }
    }

    fn is_agent_halted(&self, agent_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ctrldot_halted_agents WHERE agent_id = ?1",
            params![agent_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn halt_agent(&self, agent_id: &str, reason: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ctrldot_halted_agents (agent_id, reason, halted_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (agent_id) DO UPDATE SET
                 reason = excluded.reason,
                 halted_at = excluded.halted_at",
            params![agent_id, reason, to_ts(Utc::now())],
        )?;
        Ok(())
    }

    fn resume_agent(&self, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM ctrldot_halted_agents WHERE agent_id = ?1",
            params![agent_id],
        )?;
        Ok(())
    }

    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&session.metadata).unwrap_or_else(|_| "{}".to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ctrldot_sessions (session_id, agent_id, started_at, ended_at, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id,
                session.agent_id,
                to_ts(session.started_at),
                session.ended_at.map(to_ts),
                metadata,
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT session_id, agent_id, started_at, ended_at, metadata_json
                 FROM ctrldot_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((session_id, agent_id, started_at, ended_at, metadata)) => {
                let ended_at = match ended_at {
                    Some(s) => Some(parse_ts("ctrldot_sessions", &s)?),
                    None => None,
                };
                Ok(Some(Session {
                    session_id,
                    agent_id,
                    started_at: parse_ts("ctrldot_sessions", &started_at)?,
                    ended_at,
                    metadata: parse_payload(&metadata),
                }))
            },
            None => Ok(None),
        }
    }

    fn end_session(&self, session_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE ctrldot_sessions SET ended_at = ?1 WHERE session_id = ?2",
            params![to_ts(Utc::now()), session_id],
        )?;
        Ok(())
    }

    fn get_limits_state(
        &self,
        agent_id: &str,
        window_start_ms: i64,
        window_type: &str,
    ) -> Result<Option<LimitsState>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT agent_id, window_start, window_type, budget_spent_gbp, budget_spent_tokens, action_count
                 FROM ctrldot_limits_state
                 WHERE agent_id = ?1 AND window_start = ?2 AND window_type = ?3",
                params![agent_id, window_start_ms, window_type],
                |row| {
                    Ok(LimitsState {
                        agent_id: row.get(0)?,
                        window_start_ms: row.get(1)?,
                        window_type: row.get(2)?,
                        budget_spent_gbp: row.get(3)?,
                        budget_spent_tokens: row.get(4)?,
                        action_count: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn update_limits_state(&self, state: &LimitsState) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ctrldot_limits_state
                 (agent_id, window_start, window_type, budget_spent_gbp, budget_spent_tokens, action_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (agent_id, window_start, window_type) DO UPDATE SET
                 budget_spent_gbp = excluded.budget_spent_gbp,
                 budget_spent_tokens = excluded.budget_spent_tokens,
                 action_count = excluded.action_count",
            params![
                state.agent_id,
                state.window_start_ms,
                state.window_type,
                state.budget_spent_gbp,
                state.budget_spent_tokens,
                state.action_count,
            ],
        )?;
        Ok(())
    }

    fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(&event.payload_json).unwrap_or_else(|_| "{}".to_string());
        let session_id = if event.session_id.is_empty() {
            None
        } else {
            Some(event.session_id.as_str())
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ctrldot_events
                 (event_id, event_type, agent_id, session_id, severity, payload_json, action_hash, cost_gbp, cost_tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.event_id,
                event.event_type,
                event.agent_id,
                session_id,
                severity_to_str(event.severity),
                payload,
                event.action_hash,
                event.cost_gbp,
                event.cost_tokens,
                to_ts(event.ts),
            ],
        )?;
        Ok(())
    }

    fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let mut query = format!("SELECT {EVENT_COLUMNS} FROM ctrldot_events WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(agent_id) = &filter.agent_id {
            query.push_str(" AND agent_id = ?");
            args.push(Box::new(agent_id.clone()));
        }
        if let Some(since_ms) = filter.since_ts_ms {
            // Stored timestamps are fixed-width RFC 3339 UTC, so a text
            // comparison against the same rendering is a time comparison.
            let since = DateTime::<Utc>::from_timestamp_millis(since_ms).unwrap_or_default();
            query.push_str(" AND created_at >= ?");
            args.push(Box::new(to_ts(since)));
        }
        query.push_str(" ORDER BY created_at DESC");
        let limit = if filter.limit > 0 {
            filter.limit
        } else {
            DEFAULT_EVENT_LIMIT
        };
        query.push_str(" LIMIT ?");
        args.push(Box::new(limit));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                EventRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM ctrldot_events WHERE event_id = ?1"),
                params![event_id],
                EventRow::from_row,
            )
            .optional()?;
        match row {
            Some(row) => Ok(Some(row.into_event()?)),
            None => Ok(None),
        }
    }

    fn get_panic_state(&self) -> Result<PanicState, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT enabled, enabled_at, expires_at, ttl_seconds, reason
                 FROM ctrldot_panic_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((enabled, enabled_at, expires_at, ttl_seconds, reason)) = row else {
            return Ok(PanicState::default());
        };
        let enabled_at = match enabled_at {
            Some(s) => Some(parse_ts("ctrldot_panic_state", &s)?),
            None => None,
        };
        let expires_at = match expires_at {
            Some(s) => Some(parse_ts("ctrldot_panic_state", &s)?),
            None => None,
        };
        Ok(PanicState {
            enabled: enabled != 0,
            enabled_at,
            expires_at,
            ttl_seconds,
            reason,
        })
    }

    fn set_panic_state(&self, state: &PanicState) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ctrldot_panic_state (id, enabled, enabled_at, expires_at, ttl_seconds, reason)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 enabled = excluded.enabled,
                 enabled_at = excluded.enabled_at,
                 expires_at = excluded.expires_at,
                 ttl_seconds = excluded.ttl_seconds,
                 reason = excluded.reason",
            params![
                i64::from(state.enabled),
                state.enabled_at.map(to_ts),
                state.expires_at.map(to_ts),
                state.ttl_seconds,
                state.reason,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn agent(id: &str) -> Agent {
        Agent {
            agent_id: id.to_string(),
            display_name: format!("Agent {id}"),
            created_at: Utc::now(),
            default_mode: AgentMode::Normal,
        }
    }

    #[test]
    fn agent_roundtrip_and_idempotent_create() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_agent(&agent("a1")).unwrap();
        store.create_agent(&agent("a1")).unwrap(); // no conflict error

        let loaded = store.get_agent("a1").unwrap().unwrap();
        assert_eq!(loaded.agent_id, "a1");
        assert_eq!(loaded.default_mode, AgentMode::Normal);

        assert!(store.get_agent("missing").unwrap().is_none());
        assert_eq!(store.list_agents().unwrap().len(), 1);
    }

    #[test]
    fn halt_and_resume() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_agent(&agent("a1")).unwrap();
        assert!(!store.is_agent_halted("a1").unwrap());

        store.halt_agent("a1", "runaway").unwrap();
        assert!(store.is_agent_halted("a1").unwrap());

        // Upsert keeps a single mark.
        store.halt_agent("a1", "still runaway").unwrap();
        assert!(store.is_agent_halted("a1").unwrap());

        store.resume_agent("a1").unwrap();
        assert!(!store.is_agent_halted("a1").unwrap());
    }

    #[test]
    fn session_roundtrip_and_end() {
        let store = SqliteStore::in_memory().unwrap();
        let mut metadata = Map::new();
        metadata.insert("task".to_string(), json!("refactor"));
        let session = Session {
            session_id: "sess:1".to_string(),
            agent_id: "a1".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            metadata,
        };
        store.create_session(&session).unwrap();

        let loaded = store.get_session("sess:1").unwrap().unwrap();
        assert_eq!(loaded.agent_id, "a1");
        assert!(loaded.ended_at.is_none());
        assert_eq!(loaded.metadata.get("task"), Some(&json!("refactor")));

        store.end_session("sess:1").unwrap();
        let ended = store.get_session("sess:1").unwrap().unwrap();
        assert!(ended.ended_at.is_some());
    }

    #[test]
    fn limits_state_upserts_on_natural_key() {
        let store = SqliteStore::in_memory().unwrap();
        let window = 1_700_000_000_000;
        assert!(store.get_limits_state("a1", window, "daily").unwrap().is_none());

        let mut state = LimitsState::empty_daily("a1", window);
        state.budget_spent_gbp = 0.5;
        state.action_count = 1;
        store.update_limits_state(&state).unwrap();

        state.budget_spent_gbp = 0.75;
        state.action_count = 2;
        store.update_limits_state(&state).unwrap();

        let loaded = store.get_limits_state("a1", window, "daily").unwrap().unwrap();
        assert!((loaded.budget_spent_gbp - 0.75).abs() < f64::EPSILON);
        assert_eq!(loaded.action_count, 2);

        // Different window is a different row.
        assert!(store.get_limits_state("a1", window + 1, "daily").unwrap().is_none());
    }

    #[test]
    fn events_filter_by_agent_and_time() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();

        let mut old = Event::now("decision.issued", "a1");
        old.ts = now - Duration::minutes(30);
        old.action_hash = "h1".to_string();
        store.append_event(&old).unwrap();

        let mut recent = Event::now("decision.issued", "a1");
        recent.ts = now - Duration::seconds(10);
        recent.action_hash = "h1".to_string();
        store.append_event(&recent).unwrap();

        let mut other = Event::now("decision.issued", "a2");
        other.ts = now - Duration::seconds(5);
        store.append_event(&other).unwrap();

        let all_a1 = store
            .list_events(&EventFilter {
                agent_id: Some("a1".to_string()),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(all_a1.len(), 2);

        let since = (now - Duration::minutes(10)).timestamp_millis();
        let recent_a1 = store
            .list_events(&EventFilter {
                agent_id: Some("a1".to_string()),
                since_ts_ms: Some(since),
                limit: 100,
            })
            .unwrap();
        assert_eq!(recent_a1.len(), 1);
        assert_eq!(recent_a1[0].event_id, recent.event_id);

        let by_id = store.get_event(&recent.event_id).unwrap().unwrap();
        assert_eq!(by_id.action_hash, "h1");
        assert_eq!(by_id.severity, EventSeverity::Info);
    }

    #[test]
    fn event_costs_survive_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut event = Event::now("decision.issued", "a1");
        event.cost_gbp = Some(0.25);
        event.cost_tokens = Some(1200);
        event.session_id = "sess:x".to_string();
        store.append_event(&event).unwrap();

        let loaded = store.get_event(&event.event_id).unwrap().unwrap();
        assert_eq!(loaded.cost_gbp, Some(0.25));
        assert_eq!(loaded.cost_tokens, Some(1200));
        assert_eq!(loaded.session_id, "sess:x");
    }

    #[test]
    fn panic_state_defaults_then_roundtrips() {
        let store = SqliteStore::in_memory().unwrap();
        let initial = store.get_panic_state().unwrap();
        assert!(!initial.enabled);

        let now = Utc::now();
        let state = PanicState {
            enabled: true,
            enabled_at: Some(now),
            expires_at: Some(now + Duration::seconds(300)),
            ttl_seconds: 300,
            reason: "incident".to_string(),
        };
        store.set_panic_state(&state).unwrap();

        let loaded = store.get_panic_state().unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.ttl_seconds, 300);
        assert_eq!(loaded.reason, "incident");
        assert!(loaded.expires_at.is_some());

        // Idempotent overwrite back to disabled.
        store.set_panic_state(&PanicState::default()).unwrap();
        store.set_panic_state(&PanicState::default()).unwrap();
        assert!(!store.get_panic_state().unwrap().enabled);
    }

    #[test]
    fn open_creates_file_and_wal_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");
        let store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());

        let mode: String = store
            .conn
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
