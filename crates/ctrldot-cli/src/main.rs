//! ctrldot - CLI client for the action-gating daemon.
//!
//! Talks to a running `ctrldotd` over HTTP; bundle listing and verification
//! run locally against the bundle directory.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use client::{DaemonClient, print_json};
use ctrldot_core::ledger::bundle::{list_bundles, verify_bundle};

/// ctrldot - agent action gate
#[derive(Parser, Debug)]
#[command(name = "ctrldot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon base URL
    #[arg(long, default_value = "http://127.0.0.1:7777")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Daemon liveness
    Health,

    /// Capability discovery document
    Capabilities,

    /// Agent management
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Session management
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Propose an action (JSON from --file or stdin)
    Propose {
        /// Read the proposal from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List recent events
    Events {
        /// Restrict to one agent
        #[arg(long)]
        agent: Option<String>,

        /// Only events at or after this unix-millisecond timestamp
        #[arg(long)]
        since_ts: Option<i64>,

        /// Page size
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Panic mode control
    Panic {
        #[command(subcommand)]
        command: PanicCommands,
    },

    /// Autobundle status and test
    Autobundle {
        #[command(subcommand)]
        command: AutobundleCommands,
    },

    /// Local bundle operations
    Bundle {
        #[command(subcommand)]
        command: BundleCommands,
    },

    /// Resolution token management
    Resolve {
        #[command(subcommand)]
        command: ResolveCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AgentCommands {
    /// Register an agent (idempotent)
    Register {
        /// Stable agent id
        agent_id: String,
        /// Display name
        #[arg(long, default_value = "")]
        name: String,
        /// Default mode: normal, cheap, or throttled
        #[arg(long)]
        mode: Option<String>,
    },
    /// List agents
    List,
    /// Show one agent
    Show {
        /// Agent id
        agent_id: String,
    },
    /// Halt an agent
    Halt {
        /// Agent id
        agent_id: String,
        /// Why the agent is halted
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Resume a halted agent
    Resume {
        /// Agent id
        agent_id: String,
    },
    /// Current daily budget window
    Limits {
        /// Agent id
        agent_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// Start a session
    Start {
        /// Agent id
        agent_id: String,
    },
    /// End a session
    End {
        /// Session id
        session_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum PanicCommands {
    /// Current panic state
    Status,
    /// Enable panic mode
    On {
        /// Auto-expire after this many seconds (0 = never)
        #[arg(long, default_value = "0")]
        ttl: i64,
        /// Why panic is being enabled
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Disable panic mode
    Off,
}

#[derive(Subcommand, Debug)]
enum AutobundleCommands {
    /// Current autobundle configuration
    Status,
    /// Force a manual_test bundle
    Test,
}

#[derive(Subcommand, Debug)]
enum ResolveCommands {
    /// Generate an allow-once resolution token
    ///
    /// Tokens are stateless HMAC strings; this signs with the secret in
    /// CTRLDOT_TOKEN_SECRET, which must match the daemon's.
    AllowOnce {
        /// Agent the token is bound to
        #[arg(long)]
        agent: String,
        /// Action type the token is bound to
        #[arg(long)]
        action: String,
        /// Time to live, e.g. 120s, 10m, 1h
        #[arg(long, default_value = "10m")]
        ttl: String,
    },
}

#[derive(Subcommand, Debug)]
enum BundleCommands {
    /// List bundle directories
    List {
        /// Bundle directory (default ~/.ctrldot/bundles)
        #[arg(long, default_value = "~/.ctrldot/bundles")]
        dir: String,
    },
    /// Verify a bundle directory's hashes and signature
    Verify {
        /// Path to the bundle directory
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = DaemonClient::new(&cli.url);

    match cli.command {
        Commands::Health => print_json(&client.get("/v1/health").await?),
        Commands::Capabilities => print_json(&client.get("/v1/capabilities").await?),

        Commands::Agents { command } => match command {
            AgentCommands::Register {
                agent_id,
                name,
                mode,
            } => {
                let mut body = json!({ "agent_id": agent_id, "display_name": name });
                if let Some(mode) = mode {
                    body["default_mode"] = json!(mode);
                }
                print_json(&client.post("/v1/agents/register", &body).await?);
            },
            AgentCommands::List => print_json(&client.get("/v1/agents").await?),
            AgentCommands::Show { agent_id } => {
                print_json(&client.get(&format!("/v1/agents/{agent_id}")).await?);
            },
            AgentCommands::Halt { agent_id, reason } => {
                let body = json!({ "reason": reason });
                print_json(
                    &client
                        .post(&format!("/v1/agents/{agent_id}/halt"), &body)
                        .await?,
                );
            },
            AgentCommands::Resume { agent_id } => {
                print_json(
                    &client
                        .post(&format!("/v1/agents/{agent_id}/resume"), &json!({}))
                        .await?,
                );
            },
            AgentCommands::Limits { agent_id } => {
                print_json(&client.get(&format!("/v1/agents/{agent_id}/limits")).await?);
            },
        },

        Commands::Session { command } => match command {
            SessionCommands::Start { agent_id } => {
                let body = json!({ "agent_id": agent_id });
                print_json(&client.post("/v1/sessions/start", &body).await?);
            },
            SessionCommands::End { session_id } => {
                print_json(
                    &client
                        .post(&format!("/v1/sessions/{session_id}/end"), &json!({}))
                        .await?,
                );
            },
        },

        Commands::Propose { file } => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read proposal from {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("read proposal from stdin")?;
                    buffer
                },
            };
            let proposal: Value = serde_json::from_str(&raw).context("parse proposal JSON")?;
            print_json(&client.post("/v1/actions/propose", &proposal).await?);
        },

        Commands::Events {
            agent,
            since_ts,
            limit,
        } => {
            let mut path = format!("/v1/events?limit={limit}");
            if let Some(agent) = agent {
                path.push_str(&format!("&agent_id={agent}"));
            }
            if let Some(since_ts) = since_ts {
                path.push_str(&format!("&since_ts={since_ts}"));
            }
            print_json(&client.get(&path).await?);
        },

        Commands::Panic { command } => match command {
            PanicCommands::Status => print_json(&client.get("/v1/panic").await?),
            PanicCommands::On { ttl, reason } => {
                let body = json!({ "ttl_seconds": ttl, "reason": reason });
                print_json(&client.post("/v1/panic/on", &body).await?);
            },
            PanicCommands::Off => print_json(&client.post("/v1/panic/off", &json!({})).await?),
        },

        Commands::Autobundle { command } => match command {
            AutobundleCommands::Status => print_json(&client.get("/v1/autobundle").await?),
            AutobundleCommands::Test => {
                print_json(&client.post("/v1/autobundle/test", &json!({})).await?);
            },
        },

        Commands::Bundle { command } => match command {
            BundleCommands::List { dir } => {
                let names = list_bundles(&dir)?;
                if names.is_empty() {
                    println!("no bundles in {dir}");
                } else {
                    for name in names {
                        println!("{name}");
                    }
                }
            },
            BundleCommands::Verify { path } => match verify_bundle(&path) {
                Ok(()) => println!("OK: {}", path.display()),
                Err(err) => bail!("verification failed: {err}"),
            },
        },

        Commands::Resolve { command } => match command {
            ResolveCommands::AllowOnce { agent, action, ttl } => {
                let secret = std::env::var("CTRLDOT_TOKEN_SECRET").unwrap_or_default();
                let keeper = ctrldot_core::token::TokenKeeper::from_secret(&secret);
                let ttl_seconds = parse_ttl(&ttl)?;
                let token = keeper
                    .mint(&agent, &action, ttl_seconds)
                    .context("mint resolution token")?;
                println!("{token}");
            },
        },
    }

    Ok(())
}

/// Parses a TTL like `120s`, `10m`, `1h`, or a bare number of seconds.
fn parse_ttl(value: &str) -> Result<i64> {
    let value = value.trim();
    let (digits, multiplier) = match value.bytes().last() {
        Some(b's') => (&value[..value.len() - 1], 1),
        Some(b'm') => (&value[..value.len() - 1], 60),
        Some(b'h') => (&value[..value.len() - 1], 3600),
        _ => (value, 1),
    };
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("invalid TTL: {value}"))?;
    if amount <= 0 {
        bail!("TTL must be positive: {value}");
    }
    Ok(amount * multiplier)
}
