//! Capability discovery document served at `GET /v1/capabilities`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level capabilities response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    /// The gate's capabilities.
    pub ctrldot: CtrlDotCapabilities,
}

/// Capabilities of the gate itself. No secrets; paths are expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrlDotCapabilities {
    /// Daemon version.
    pub version: String,
    /// API base URL and version.
    pub api: ApiInfo,
    /// Runtime store transport.
    pub runtime_store: RuntimeStoreInfo,
    /// Ledger sink transport.
    pub ledger_sink: LedgerSinkInfo,
    /// Panic mode state summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic: Option<PanicInfo>,
    /// Feature flags.
    pub features: FeaturesInfo,
}

/// API connection details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInfo {
    /// Base URL, e.g. `http://127.0.0.1:7777`.
    pub base_url: String,
    /// API version segment.
    pub version: String,
}

/// Runtime store details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStoreInfo {
    /// Store kind, `sqlite` or `postgres`.
    pub kind: String,
    /// Expanded path of the embedded database, when applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sqlite_path: String,
}

/// Ledger sink details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSinkInfo {
    /// Sink kind, `none`, `bundle`, or `kernel_http`.
    pub kind: String,
    /// Expanded bundle output directory, when applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bundle_dir: String,
}

/// Panic mode summary for discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicInfo {
    /// Whether panic mode is currently enabled.
    pub enabled: bool,
    /// When panic auto-expires, if a TTL was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// The effective overlay values while panic is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective: Option<PanicEffectiveInfo>,
}

/// Effective panic overlay values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicEffectiveInfo {
    /// Budget clamp in USD.
    pub max_daily_budget_usd: f64,
    /// Whether the network is default-deny under panic.
    pub network_default_deny: bool,
    /// Filesystem mode, `workspace_only` or `read_only`.
    pub filesystem_mode: String,
    /// Loop overlay in effect.
    pub r#loop: LoopInfo,
}

/// Loop overlay values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopInfo {
    /// Sliding window size in seconds.
    pub window_seconds: i64,
    /// Repeats at which the agent is stopped.
    pub stop_repeats: i64,
}

/// Feature flags advertised for agent discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesInfo {
    /// Execution/resolution token minting and validation.
    pub resolution_tokens: bool,
    /// Loop detection over the event log.
    pub loop_detector: bool,
    /// Daily budget accounting.
    pub budget_limits: bool,
    /// Domain rules engine.
    pub rules_engine: bool,
    /// Automatic bundle production on hard outcomes.
    pub auto_bundles: bool,
    /// Bundle verification.
    pub bundle_verify: bool,
}
