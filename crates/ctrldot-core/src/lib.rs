//! # ctrldot-core
//!
//! Core library for ctrldot - an out-of-band action gate that AI agents
//! consult before executing potentially costly or destructive operations.
//!
//! For every proposed action the gate returns a decision (ALLOW / WARN /
//! THROTTLE / DENY / STOP) computed from three interacting engines — domain
//! rules, budget limits, and loop detection — under an optional strict-mode
//! overlay called panic mode. Every decision is recorded immutably and, for
//! hard outcomes, packaged as a cryptographically signed evidence bundle.
//!
//! ## Features
//!
//! - **Decision pipeline**: proposal → rules → loop → limits → combined
//!   outcome → reason codes → recommendation
//! - **Panic overlay**: a pure transform that reshapes the effective policy
//!   at request time
//! - **Runtime store**: durable agents, sessions, halt marks, limits windows,
//!   event log, and panic state over embedded `SQLite`
//! - **Ledger sinks**: immutable decision recording over noop, signed-bundle,
//!   and remote HTTP transports
//! - **Signed bundles**: directory artefacts with a hashed manifest and an
//!   Ed25519 signature, verifiable as self-contained units
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ctrldot_core::config::Config;
//! use ctrldot_core::ledger::NoopSink;
//! use ctrldot_core::service::DecisionService;
//! use ctrldot_core::store::SqliteStore;
//! use ctrldot_core::token::TokenKeeper;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::in_memory()?);
//! let config = Arc::new(Config::default());
//! let service = DecisionService::new(
//!     store,
//!     config,
//!     Arc::new(NoopSink),
//!     None,
//!     TokenKeeper::from_secret("change-me"),
//! );
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod domain;
pub mod hashing;
pub mod ledger;
pub mod limits;
pub mod loop_detect;
pub mod recommend;
pub mod rules;
pub mod service;
pub mod store;
pub mod token;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::{ActionProposal, Decision, DecisionResponse};
    pub use crate::ledger::{DecisionRecord, LedgerSink};
    pub use crate::service::DecisionService;
    pub use crate::store::RuntimeStore;
}

/// Re-export commonly used types at the crate root.
pub use config::Config;
pub use domain::{ActionProposal, Decision, DecisionResponse};
pub use service::DecisionService;

/// Daemon version reported in health, capabilities, and bundle manifests.
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");
