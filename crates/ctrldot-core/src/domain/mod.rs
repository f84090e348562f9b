//! Domain model for the action gate.
//!
//! These types cross every boundary in the system: they arrive as JSON on
//! the HTTP surface, persist in the runtime store, and serialise into
//! decision records and signed bundles. Field names are the wire contract
//! and must stay stable.

mod action;
mod agent;
mod capabilities;
mod decision;
mod event;
mod limits_state;
mod panic_state;
mod recommendation;
mod session;

pub use action::{Action, ActionContext, ActionIntent, ActionProposal, CostEstimate};
pub use agent::{Agent, AgentMode};
pub use capabilities::{
    ApiInfo, CapabilitiesResponse, CtrlDotCapabilities, FeaturesInfo, LedgerSinkInfo, LoopInfo,
    PanicEffectiveInfo, PanicInfo, RuntimeStoreInfo,
};
pub use decision::{Decision, DecisionResponse, Reason, ThrottleInfo, Warning};
pub use event::{Event, EventSeverity, event_types};
pub use limits_state::{AgentLimitsResponse, LimitsConfigResponse, LimitsState};
pub use panic_state::PanicState;
pub use recommendation::Recommendation;
pub use session::Session;
