//! Runtime store: durable operational state for the gate.
//!
//! The store holds agents, halt marks, sessions, limits windows, the
//! append-only event log, and the panic state row. It deliberately excludes
//! anything belonging to the external kernel ledger.

mod sqlite;

use thiserror::Error;

pub use sqlite::SqliteStore;

use crate::domain::{Agent, Event, LimitsState, PanicState, Session};

/// Errors raised by runtime store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during store operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded.
    #[error("corrupt row in {table}: {details}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// What failed to decode.
        details: String,
    },

    /// The configured store kind is not available in this build.
    #[error("unsupported runtime store kind: {kind}")]
    UnsupportedKind {
        /// The configured kind.
        kind: String,
    },
}

/// Filter for [`RuntimeStore::list_events`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Only events at or after this unix-millisecond timestamp.
    pub since_ts_ms: Option<i64>,
    /// Page size; zero means the store default.
    pub limit: i64,
}

/// Durable runtime state for the gate.
///
/// All writes must be serialisable per key; the embedded implementation
/// achieves this with a single connection behind a mutex and WAL mode.
/// Operations are synchronous and cheap; callers on async executors invoke
/// them inline.
pub trait RuntimeStore: Send + Sync {
    /// Creates an agent; idempotent on `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn create_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    /// Lists all agents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;

    /// Fetches an agent by id; `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError>;

    /// True when a halt mark exists for the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn is_agent_halted(&self, agent_id: &str) -> Result<bool, StoreError>;

    /// Upserts a halt mark for the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn halt_agent(&self, agent_id: &str, reason: &str) -> Result<(), StoreError>;

    /// Removes the halt mark for the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn resume_agent(&self, agent_id: &str) -> Result<(), StoreError>;

    /// Creates a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Fetches a session by id; `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Marks a session ended now.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn end_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// Reads one limits window; `None` when no row exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_limits_state(
        &self,
        agent_id: &str,
        window_start_ms: i64,
        window_type: &str,
    ) -> Result<Option<LimitsState>, StoreError>;

    /// Upserts a limits window on its natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn update_limits_state(&self, state: &LimitsState) -> Result<(), StoreError>;

    /// Appends an event to the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn append_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Lists events matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    /// Fetches one event by id; `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Reads the panic state row; a disabled default when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_panic_state(&self) -> Result<PanicState, StoreError>;

    /// Writes the panic state row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn set_panic_state(&self, state: &PanicState) -> Result<(), StoreError>;
}
