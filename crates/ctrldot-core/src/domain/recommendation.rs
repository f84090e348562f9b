//! Remediation recommendations attached to non-ALLOW outcomes.

use serde::{Deserialize, Serialize};

/// The machine-readable "why blocked" and what to do next.
///
/// Returned with DENY / STOP / THROTTLE outcomes. `next_steps` are runnable
/// shell commands parameterised by agent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Selection kind: `enable_ctrldot` | `enable_panic` | `use_resolution`
    /// | `tighten_scope` | `reduce_loop`.
    pub kind: String,

    /// Short title.
    pub title: String,

    /// One-line summary, usually the decision reason.
    pub summary: String,

    /// Runnable commands (lines starting with `#` are comments).
    pub next_steps: Vec<String>,

    /// Pointer into the documentation, when one applies.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docs_hint: String,

    /// Classification tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}
