//! Signed evidence bundles.
//!
//! A bundle is a directory of decision records, events, and a whitelisted
//! config snapshot, sealed by a manifest whose SHA-256 file hashes are
//! signed with Ed25519. Once written, a bundle directory is append-forbidden;
//! verification is a pure function of the directory contents.

mod keys;
mod readme;
mod sink;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use keys::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE, load_or_generate};
pub use readme::{ReadmeOptions, write_readme};
pub use sink::BundleSink;

use super::{DecisionRecord, REDACT_KEYS};
use crate::config::{Config, expand_path, expand_path_str};
use crate::domain::Event;

/// Manifest format version.
const BUNDLE_VERSION: &str = "1";

/// Maximum session-id length embedded in a bundle directory name.
const MAX_SESSION_IN_NAME: usize = 36;

/// Errors raised while writing or verifying bundles.
#[derive(Debug, Error)]
pub enum BundleError {
    /// I/O error touching bundle files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialised.
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    /// The config snapshot could not be serialised.
    #[error("encode config snapshot: {0}")]
    Snapshot(#[from] serde_yaml::Error),

    /// A key file is unusable.
    #[error("invalid key at {path}: {details}")]
    InvalidKey {
        /// Path of the offending key file.
        path: String,
        /// What is wrong with it.
        details: String,
    },

    /// A hashed file could not be read back during verification.
    #[error("{file}: {source}")]
    FileUnreadable {
        /// File named in the manifest.
        file: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A hashed file does not match its manifest entry.
    #[error("{file}: hash mismatch (got {got}, want {want})")]
    HashMismatch {
        /// File named in the manifest.
        file: String,
        /// Recomputed hash.
        got: String,
        /// Hash recorded in the manifest.
        want: String,
    },

    /// The public key file has the wrong size.
    #[error("invalid public key size")]
    PublicKeySize,

    /// The public key bytes do not form a valid Ed25519 point.
    #[error("invalid public key")]
    PublicKeyInvalid,

    /// The signature file has the wrong size.
    #[error("invalid signature size")]
    SignatureSize,

    /// The signature does not verify over the manifest bytes.
    #[error("signature verification failed")]
    SignatureInvalid,
}

/// The manifest written as `manifest.json`.
///
/// Optional trigger fields are set by autobundles; verification ignores
/// unknown fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Manifest format version.
    pub bundle_version: String,
    /// When the bundle was created.
    pub created_at: DateTime<Utc>,
    /// Daemon version that wrote the bundle.
    pub daemon_version: String,
    /// Runtime store kind in use.
    pub runtime_store_kind: String,
    /// Ledger sink kind in use.
    pub ledger_sink_kind: String,
    /// Session the bundle belongs to.
    #[serde(default)]
    pub session_id: String,
    /// Agent the bundle belongs to.
    #[serde(default)]
    pub agent_id: String,
    /// File name to lowercase hex SHA-256.
    pub hashes: BTreeMap<String, String>,
    /// The redaction keyset applied to the records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<String>,
    /// Autobundle trigger tag, e.g. `decision_deny`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trigger: String,
    /// When the trigger fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,
    /// Decision that triggered the bundle, when one did.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub decision_id: String,
    /// Panic was effective when the bundle was created.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub effective_panic_enabled: bool,
}

/// Whitelisted subset of config written as `config_snapshot.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Runtime store kind and path.
    pub runtime_store: SnapshotRuntimeStore,
    /// Ledger sink kind.
    pub ledger_sink: SnapshotLedgerSink,
    /// Server bind address.
    pub server: SnapshotServer,
    /// Event retention.
    pub events: SnapshotEvents,
}

/// Runtime store snapshot fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRuntimeStore {
    /// Store kind.
    pub kind: String,
    /// Embedded database path.
    pub sqlite_path: String,
}

/// Ledger sink snapshot fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLedgerSink {
    /// Sink kind.
    pub kind: String,
}

/// Server snapshot fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotServer {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

/// Event retention snapshot fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEvents {
    /// Days of events kept.
    pub retention_days: i64,
    /// Row cap on the event log.
    pub max_rows: i64,
}

impl ConfigSnapshot {
    /// Extracts the whitelisted snapshot from a full config. Secrets and
    /// policy internals never enter a bundle.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            runtime_store: SnapshotRuntimeStore {
                kind: config.runtime_store.kind.clone(),
                sqlite_path: config.runtime_store.sqlite_path.clone(),
            },
            ledger_sink: SnapshotLedgerSink {
                kind: config.ledger_sink.kind.clone(),
            },
            server: SnapshotServer {
                host: config.server.host.clone(),
                port: config.server.port,
            },
            events: SnapshotEvents {
                retention_days: config.events.retention_days,
                max_rows: config.events.max_rows,
            },
        }
    }
}

/// Inputs for writing a single bundle directory.
#[derive(Debug, Clone, Default)]
pub struct WriteOneOptions {
    /// Directory bundles are written into.
    pub output_dir: String,
    /// Whether the manifest is signed.
    pub sign_enabled: bool,
    /// Private key path.
    pub key_path: String,
    /// Public key path.
    pub public_key_path: String,
    /// Runtime store kind recorded in the manifest.
    pub runtime_store_kind: String,
    /// Daemon version recorded in the manifest.
    pub daemon_version: String,
    /// Session the bundle belongs to.
    pub session_id: String,
    /// Agent the bundle belongs to.
    pub agent_id: String,
    /// Decision records, in order.
    pub decisions: Vec<DecisionRecord>,
    /// Events, in order.
    pub events: Vec<Event>,
    /// Whitelisted config snapshot, when included.
    pub config_snapshot: Option<ConfigSnapshot>,
    /// Trigger tag for autobundles.
    pub trigger: String,
    /// Decision that triggered the bundle.
    pub decision_id: String,
    /// Panic was effective at trigger time.
    pub effective_panic_enabled: bool,
    /// Reason codes for the README.
    pub reason_codes: Vec<String>,
    /// Suggested next steps for the README.
    pub next_steps: Vec<String>,
}

/// Writes one bundle directory and returns its path.
///
/// The directory is named `bundle_<UTC timestamp>_<session>` with the
/// session id truncated to 36 characters. `README.md` is written last and
/// excluded from the manifest hashes.
///
/// # Errors
///
/// Returns an error if any file cannot be written or the signing key is
/// unusable.
pub fn write_one(opts: &WriteOneOptions) -> Result<PathBuf, BundleError> {
    let output_dir = expand_path(Path::new(&opts.output_dir));
    std::fs::create_dir_all(&output_dir)?;

    let now = Utc::now();
    let created = now.format("%Y-%m-%dT%H%M%SZ").to_string();
    let mut session = if opts.session_id.is_empty() {
        "_autobundle".to_string()
    } else {
        opts.session_id.clone()
    };
    if session.len() > MAX_SESSION_IN_NAME {
        session = session.chars().take(MAX_SESSION_IN_NAME).collect();
    }
    let dir_name = format!("bundle_{created}_{session}");
    let dir = output_dir.join(&dir_name);
    std::fs::create_dir_all(&dir)?;

    write_jsonl(&dir.join("decision_records.jsonl"), &opts.decisions)?;
    write_jsonl(&dir.join("events.jsonl"), &opts.events)?;

    let mut hashes = BTreeMap::new();
    hashes.insert(
        "decision_records.jsonl".to_string(),
        sha256_file(&dir.join("decision_records.jsonl"))?,
    );
    hashes.insert(
        "events.jsonl".to_string(),
        sha256_file(&dir.join("events.jsonl"))?,
    );

    if let Some(snapshot) = &opts.config_snapshot {
        let path = dir.join("config_snapshot.yaml");
        std::fs::write(&path, serde_yaml::to_string(snapshot)?)?;
        hashes.insert("config_snapshot.yaml".to_string(), sha256_file(&path)?);
    }

    let manifest = BundleManifest {
        bundle_version: BUNDLE_VERSION.to_string(),
        created_at: now,
        daemon_version: opts.daemon_version.clone(),
        runtime_store_kind: opts.runtime_store_kind.clone(),
        ledger_sink_kind: "bundle".to_string(),
        session_id: opts.session_id.clone(),
        agent_id: opts.agent_id.clone(),
        hashes,
        redactions: REDACT_KEYS.iter().map(|s| (*s).to_string()).collect(),
        trigger: opts.trigger.clone(),
        triggered_at: if opts.trigger.is_empty() {
            None
        } else {
            Some(now)
        },
        decision_id: opts.decision_id.clone(),
        effective_panic_enabled: opts.effective_panic_enabled,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    std::fs::write(dir.join("manifest.json"), &manifest_bytes)?;

    if opts.sign_enabled {
        let signing_key = load_or_generate(&opts.key_path, &opts.public_key_path)?;
        let signature = signing_key.sign(&manifest_bytes);
        std::fs::write(dir.join("signature.ed25519"), signature.to_bytes())?;
        std::fs::write(
            dir.join("public_key.ed25519"),
            signing_key.verifying_key().as_bytes(),
        )?;
    }

    let outcome = opts
        .decisions
        .first()
        .map(|d| d.decision.as_str().to_string())
        .unwrap_or_default();
    let reason_summary = opts
        .decisions
        .first()
        .map(|d| d.reason.clone())
        .unwrap_or_default();
    write_readme(
        &dir,
        &ReadmeOptions {
            trigger: opts.trigger.clone(),
            timestamp: Some(now),
            agent_id: opts.agent_id.clone(),
            session_id: opts.session_id.clone(),
            outcome,
            reason_codes: opts.reason_codes.clone(),
            reason_summary,
            panic_enabled: opts.effective_panic_enabled,
            next_steps: opts.next_steps.clone(),
            bundle_dir_name: dir_name,
        },
    )?;

    Ok(dir)
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), BundleError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String, BundleError> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Verifies the manifest hashes and Ed25519 signature of a bundle
/// directory.
///
/// # Errors
///
/// Fails with an error naming the corrupted file, or the signature, on any
/// mismatch.
pub fn verify_bundle(dir: impl AsRef<Path>) -> Result<(), BundleError> {
    let dir = dir.as_ref();
    let manifest_bytes =
        std::fs::read(dir.join("manifest.json")).map_err(|source| BundleError::FileUnreadable {
            file: "manifest.json".to_string(),
            source,
        })?;
    let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)?;

    for (file, want) in &manifest.hashes {
        let path = dir.join(file);
        let data = std::fs::read(&path).map_err(|source| BundleError::FileUnreadable {
            file: file.clone(),
            source,
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let got = hex::encode(hasher.finalize());
        if got != *want {
            return Err(BundleError::HashMismatch {
                file: file.clone(),
                got,
                want: want.clone(),
            });
        }
    }

    let public = std::fs::read(dir.join("public_key.ed25519")).map_err(|source| {
        BundleError::FileUnreadable {
            file: "public_key.ed25519".to_string(),
            source,
        }
    })?;
    let public: &[u8; PUBLIC_KEY_SIZE] =
        public.as_slice().try_into().map_err(|_| BundleError::PublicKeySize)?;
    let verifying_key =
        VerifyingKey::from_bytes(public).map_err(|_| BundleError::PublicKeyInvalid)?;

    let signature = std::fs::read(dir.join("signature.ed25519")).map_err(|source| {
        BundleError::FileUnreadable {
            file: "signature.ed25519".to_string(),
            source,
        }
    })?;
    let signature: &[u8; SIGNATURE_SIZE] =
        signature.as_slice().try_into().map_err(|_| BundleError::SignatureSize)?;
    let signature = Signature::from_bytes(signature);

    verifying_key
        .verify(&manifest_bytes, &signature)
        .map_err(|_| BundleError::SignatureInvalid)
}

/// Lists bundle directory names under `output_dir`, sorted ascending.
///
/// The timestamp prefix makes lexicographic order chronological. A missing
/// directory reads as empty.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_bundles(output_dir: impl AsRef<Path>) -> Result<Vec<String>, BundleError> {
    let output_dir = expand_path(output_dir.as_ref());
    let entries = match std::fs::read_dir(&output_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && name.starts_with("bundle_") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// The expanded bundle output directory for display purposes.
#[must_use]
pub fn display_output_dir(configured: &str) -> String {
    expand_path_str(configured)
}
