//! Configuration: file format, defaults, and environment overrides.
//!
//! The config file is YAML at `~/.ctrldot/config.yaml` by default; a
//! commented default file is written on first run so the user has something
//! to edit. Environment variables override file values after load.

mod effective;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use effective::{effective, panic_expired};

/// Errors raised while loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error touching the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid YAML for this schema.
    #[error("parse config {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The config could not be serialised.
    #[error("serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// The ctrldot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Runtime store transport.
    pub runtime_store: RuntimeStoreConfig,
    /// Ledger sink transport.
    pub ledger_sink: LedgerSinkConfig,
    /// Event log retention.
    pub events: EventsConfig,
    /// Agent budget defaults.
    pub agents: AgentsConfig,
    /// Domain rules.
    pub rules: RulesConfig,
    /// Degraded-mode profiles.
    pub degrade_modes: DegradeModesConfig,
    /// Panic mode overlay settings.
    pub panic: PanicConfig,
    /// Automatic bundle production.
    pub autobundle: AutobundleConfig,
    /// Currency for display only; stored amounts are GBP.
    pub display_currency: String,

    /// Loop overlay installed by [`effective`] while panic is on. Never
    /// read from or written to the config file.
    #[serde(skip)]
    pub loop_overlay: Option<LoopOverlay>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
        }
    }
}

/// Runtime store transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeStoreConfig {
    /// `sqlite` or `postgres`.
    pub kind: String,
    /// Path to the embedded database file.
    pub sqlite_path: String,
    /// Connection URL for the external store.
    pub db_url: String,
}

impl Default for RuntimeStoreConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            sqlite_path: "~/.ctrldot/ctrldot.sqlite".to_string(),
            db_url: String::new(),
        }
    }
}

/// Ledger sink transport selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSinkConfig {
    /// `none`, `bundle`, or `kernel_http`.
    pub kind: String,
    /// Remote HTTP sink settings, used when kind is `kernel_http`.
    pub kernel_http: KernelHttpConfig,
    /// Signed bundle sink settings, used when kind is `bundle`.
    pub bundle: BundleSinkConfig,
}

/// Remote HTTP ledger sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelHttpConfig {
    /// Root of the receiving API, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// When true, sink failures propagate to the caller.
    pub required: bool,
}

impl Default for KernelHttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: String::new(),
            timeout_ms: 2000,
            required: false,
        }
    }
}

/// Signed bundle sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSinkConfig {
    /// Directory bundles are written into.
    pub output_dir: String,
    /// Signing settings.
    pub sign: BundleSignConfig,
}

impl Default for BundleSinkConfig {
    fn default() -> Self {
        Self {
            output_dir: "~/.ctrldot/bundles".to_string(),
            sign: BundleSignConfig::default(),
        }
    }
}

/// Ed25519 signing settings for bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSignConfig {
    /// Whether bundles are signed.
    pub enabled: bool,
    /// Private key path (created on first use, mode 0600).
    pub key_path: String,
    /// Public key path (created on first use, mode 0644).
    pub public_key_path: String,
}

impl Default for BundleSignConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_path: "~/.ctrldot/keys/ctrldot_ed25519".to_string(),
            public_key_path: "~/.ctrldot/keys/ctrldot_ed25519.pub".to_string(),
        }
    }
}

/// Event log retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Days of events to keep.
    pub retention_days: i64,
    /// Upper bound on stored rows.
    pub max_rows: i64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            max_rows: 50_000,
        }
    }
}

/// Agent defaults container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Defaults applied to every agent.
    pub default: AgentDefaults,
}

/// Default agent budget and iteration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Daily budget, GBP.
    pub daily_budget_gbp: f64,
    /// Warn thresholds as fractions of the daily budget.
    pub warn_pct: Vec<f64>,
    /// Throttle threshold as a fraction.
    pub throttle_pct: f64,
    /// Hard-stop threshold as a fraction.
    pub hard_stop_pct: f64,
    /// Identical-action repeats tolerated in a ten-minute window.
    pub max_iterations_per_action: i64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            daily_budget_gbp: 10.0,
            warn_pct: vec![0.70, 0.90],
            throttle_pct: 0.95,
            hard_stop_pct: 1.00,
            max_iterations_per_action: 25,
        }
    }
}

/// Domain rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Action types (or dotted prefixes) that require a resolution token.
    pub require_resolution: Vec<String>,
    /// Filesystem scope rules.
    pub filesystem: FilesystemRules,
    /// Network scope rules.
    pub network: NetworkRules,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            require_resolution: vec!["git.push".to_string(), "filesystem.delete".to_string()],
            filesystem: FilesystemRules::default(),
            network: NetworkRules::default(),
        }
    }
}

/// Filesystem access rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemRules {
    /// Roots under which filesystem actions are allowed. Empty = no
    /// restriction.
    pub allow_roots: Vec<String>,
}

impl Default for FilesystemRules {
    fn default() -> Self {
        Self {
            allow_roots: vec!["~/dev".to_string()],
        }
    }
}

/// Network access rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRules {
    /// When true, only allow-listed domains may be reached.
    pub deny_all: bool,
    /// Domains (and their subdomains) that remain reachable.
    pub allow_domains: Vec<String>,
}

impl Default for NetworkRules {
    fn default() -> Self {
        Self {
            deny_all: true,
            allow_domains: vec![
                "api.openai.com".to_string(),
                "api.anthropic.com".to_string(),
            ],
        }
    }
}

/// Degraded-mode profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradeModesConfig {
    /// The `cheap` profile applied under THROTTLE.
    pub cheap: DegradeMode,
}

/// A degraded operation profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradeMode {
    /// Model selection policy.
    pub model_policy: String,
    /// Maximum parallel tasks.
    pub max_parallel_tasks: i64,
    /// Tools to avoid.
    pub deny_tools: Vec<String>,
}

impl Default for DegradeMode {
    fn default() -> Self {
        Self {
            model_policy: "cheap".to_string(),
            max_parallel_tasks: 2,
            deny_tools: vec!["web".to_string()],
        }
    }
}

/// Panic mode overlay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicConfig {
    /// Whether panic is requested at startup.
    pub enabled: bool,
    /// TTL applied when panic is enabled at startup (0 = no expiry).
    pub ttl_seconds: i64,
    /// Budget clamp in USD.
    pub max_daily_budget_usd: f64,
    /// Threshold overrides.
    pub thresholds: PanicThresholds,
    /// Resolution coercion.
    pub resolution: PanicResolution,
    /// Filesystem restriction.
    pub filesystem: PanicFilesystem,
    /// Network restriction.
    pub network: PanicNetwork,
    /// Loop overlay values.
    pub r#loop: PanicLoop,
}

impl Default for PanicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: 0,
            max_daily_budget_usd: 5.0,
            thresholds: PanicThresholds::default(),
            resolution: PanicResolution::default(),
            filesystem: PanicFilesystem::default(),
            network: PanicNetwork::default(),
            r#loop: PanicLoop::default(),
        }
    }
}

/// Threshold overrides applied while panic is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicThresholds {
    /// Single warn threshold.
    pub warn_pct: f64,
    /// Throttle threshold.
    pub throttle_pct: f64,
    /// Hard-stop threshold.
    pub stop_pct: f64,
}

impl Default for PanicThresholds {
    fn default() -> Self {
        Self {
            warn_pct: 0.40,
            throttle_pct: 0.60,
            stop_pct: 0.90,
        }
    }
}

/// Resolution coercion while panic is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicResolution {
    /// Expand `require_resolution` to the broad coercion set.
    pub force_require_resolution: bool,
}

impl Default for PanicResolution {
    fn default() -> Self {
        Self {
            force_require_resolution: true,
        }
    }
}

/// Filesystem restriction while panic is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicFilesystem {
    /// `workspace_only` or `read_only`.
    pub mode: String,
    /// Roots substituted for the configured allow-roots.
    pub workspace_roots: Vec<String>,
}

impl Default for PanicFilesystem {
    fn default() -> Self {
        Self {
            mode: "workspace_only".to_string(),
            workspace_roots: Vec::new(),
        }
    }
}

/// Network restriction while panic is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicNetwork {
    /// Force network deny-all.
    pub default_deny: bool,
    /// Allowlist substituted while panic is on, when non-empty.
    pub allow_domains: Vec<String>,
}

impl Default for PanicNetwork {
    fn default() -> Self {
        Self {
            default_deny: true,
            allow_domains: vec![
                "pypi.org".to_string(),
                "files.pythonhosted.org".to_string(),
                "registry.npmjs.org".to_string(),
                "github.com".to_string(),
                "raw.githubusercontent.com".to_string(),
            ],
        }
    }
}

/// Loop thresholds while panic is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicLoop {
    /// Repeats at which throttling would apply.
    pub throttle_repeats: i64,
    /// Repeats at which the agent is stopped.
    pub stop_repeats: i64,
    /// Sliding window size in seconds.
    pub window_seconds: i64,
}

impl Default for PanicLoop {
    fn default() -> Self {
        Self {
            throttle_repeats: 3,
            stop_repeats: 5,
            window_seconds: 60,
        }
    }
}

/// Automatic bundle production settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutobundleConfig {
    /// Master switch.
    pub enabled: bool,
    /// Output directory; falls back to the bundle sink's directory.
    pub output_dir: String,
    /// Per session+trigger debounce in seconds.
    pub debounce_seconds: i64,
    /// Which outcomes trigger a bundle.
    pub triggers: AutobundleTriggers,
    /// What each bundle includes.
    pub include: AutobundleInclude,
}

impl Default for AutobundleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: String::new(),
            debounce_seconds: 10,
            triggers: AutobundleTriggers::default(),
            include: AutobundleInclude::default(),
        }
    }
}

/// Autobundle trigger switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutobundleTriggers {
    /// Bundle on DENY decisions.
    pub on_deny: bool,
    /// Bundle on STOP decisions.
    pub on_stop: bool,
    /// Bundle on budget-driven STOP decisions.
    pub on_budget_stop: bool,
    /// Bundle on loop-driven STOP decisions.
    pub on_loop_stop: bool,
    /// Bundle on daemon shutdown.
    pub on_shutdown: bool,
    /// Bundle when panic mode is toggled.
    pub on_panic_toggle: bool,
}

impl Default for AutobundleTriggers {
    fn default() -> Self {
        Self {
            on_deny: true,
            on_stop: true,
            on_budget_stop: true,
            on_loop_stop: true,
            on_shutdown: true,
            on_panic_toggle: false,
        }
    }
}

/// What autobundles include besides the triggering decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutobundleInclude {
    /// Tail of recent events for the same agent, capped at this many.
    pub events_tail: i64,
    /// Reserved cap on included decisions.
    pub decisions_tail: i64,
    /// Whether the whitelisted config snapshot is included.
    pub config_snapshot: bool,
}

impl Default for AutobundleInclude {
    fn default() -> Self {
        Self {
            events_tail: 500,
            decisions_tail: 200,
            config_snapshot: true,
        }
    }
}

/// Loop overlay installed by the panic transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOverlay {
    /// Sliding window size in seconds.
    pub window_seconds: i64,
    /// Repeats at which the agent is stopped.
    pub stop_repeats: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            runtime_store: RuntimeStoreConfig::default(),
            ledger_sink: LedgerSinkConfig {
                kind: "none".to_string(),
                kernel_http: KernelHttpConfig::default(),
                bundle: BundleSinkConfig::default(),
            },
            events: EventsConfig::default(),
            agents: AgentsConfig::default(),
            rules: RulesConfig::default(),
            degrade_modes: DegradeModesConfig::default(),
            panic: PanicConfig::default(),
            autobundle: AutobundleConfig::default(),
            display_currency: "gbp".to_string(),
            loop_overlay: None,
        }
    }
}

const CONFIG_HEADER: &str = "# Ctrl Dot config — edit and restart the daemon to apply changes.\n";

impl Config {
    /// Loads configuration from `path`, writing a commented default file
    /// first when none exists, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, created, or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = expand_path(path.as_ref());
        if !path.exists() {
            Self::default().write(&path)?;
        }
        let data = std::fs::read_to_string(&path)?;
        let mut cfg: Self = serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Writes this configuration to `path` (0600, commented header),
    /// creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialised or written.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = expand_path(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_yaml::to_string(self)?;
        let mut data = String::with_capacity(CONFIG_HEADER.len() + body.len());
        data.push_str(CONFIG_HEADER);
        data.push_str(&body);
        write_private(&path, data.as_bytes())?;
        Ok(())
    }

    /// Applies `CTRLDOT_*` / `DB_URL` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DB_URL") {
            if !v.is_empty() {
                self.runtime_store.db_url = v;
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_RUNTIME_STORE") {
            if !v.is_empty() {
                self.runtime_store.kind = v;
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_SQLITE_PATH") {
            if !v.is_empty() {
                self.runtime_store.sqlite_path = v;
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_LEDGER_SINK") {
            if !v.is_empty() {
                self.ledger_sink.kind = v;
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_KERNEL_URL") {
            if !v.is_empty() {
                self.ledger_sink.kernel_http.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_BUNDLE_DIR") {
            if !v.is_empty() {
                self.ledger_sink.bundle.output_dir = v;
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_PANIC") {
            if !v.is_empty() {
                self.panic.enabled = env_truthy(&v);
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_PANIC_TTL") {
            if let Ok(n) = v.parse::<i64>() {
                if n >= 0 {
                    self.panic.ttl_seconds = n;
                }
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_PANIC_BUDGET_USD") {
            if let Ok(f) = v.parse::<f64>() {
                if f >= 0.0 {
                    self.panic.max_daily_budget_usd = f;
                }
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_AUTOBUNDLE") {
            if !v.is_empty() {
                self.autobundle.enabled = env_truthy(&v);
            }
        }
        if let Ok(v) = std::env::var("CTRLDOT_AUTOBUNDLE_DIR") {
            if !v.is_empty() {
                self.autobundle.output_dir = v;
            }
        }
    }

    /// The daily budget with the fallback applied: unset or non-positive
    /// values become 10.0.
    #[must_use]
    pub fn daily_budget_gbp(&self) -> f64 {
        let budget = self.agents.default.daily_budget_gbp;
        if budget <= 0.0 { 10.0 } else { budget }
    }
}

fn env_truthy(v: &str) -> bool {
    matches!(v, "1" | "true" | "on")
}

/// Expands a leading `~/` to the user's home directory.
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if !home.is_empty() {
                return PathBuf::from(home).join(rest);
            }
        }
    }
    path.to_path_buf()
}

/// Expands a leading `~/` in a string path, returning a display string.
#[must_use]
pub fn expand_path_str(path: &str) -> String {
    expand_path(Path::new(path)).display().to_string()
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_policy() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 7777);
        assert!((cfg.agents.default.daily_budget_gbp - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.agents.default.warn_pct, vec![0.70, 0.90]);
        assert_eq!(cfg.rules.require_resolution, vec!["git.push", "filesystem.delete"]);
        assert!(cfg.rules.network.deny_all);
        assert_eq!(cfg.ledger_sink.kind, "none");
        assert!(cfg.autobundle.enabled);
        assert_eq!(cfg.autobundle.debounce_seconds, 10);
    }

    #[test]
    fn budget_fallback_applies_to_non_positive() {
        let mut cfg = Config::default();
        cfg.agents.default.daily_budget_gbp = 0.0;
        assert!((cfg.daily_budget_gbp() - 10.0).abs() < f64::EPSILON);
        cfg.agents.default.daily_budget_gbp = -3.0;
        assert!((cfg.daily_budget_gbp() - 10.0).abs() < f64::EPSILON);
        cfg.agents.default.daily_budget_gbp = 2.5;
        assert!((cfg.daily_budget_gbp() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn load_writes_default_file_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let cfg = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.server.port, 7777);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# Ctrl Dot config"));

        // Round-trip: an edited value survives a second load.
        let edited = written.replace("port: 7777", "port: 8888");
        std::fs::write(&path, edited).unwrap();
        let cfg2 = Config::load(&path).unwrap();
        assert_eq!(cfg2.server.port, 8888);
    }

    #[test]
    fn expand_path_replaces_tilde() {
        let home = std::env::var("HOME").unwrap();
        let expanded = expand_path_str("~/dev/x");
        assert_eq!(expanded, format!("{home}/dev/x"));
        assert_eq!(expand_path_str("/abs/path"), "/abs/path");
    }
}
