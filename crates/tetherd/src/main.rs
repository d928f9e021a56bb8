//! `tetherd`: the tether routing daemon.
//!
//! Drives a [`Balancer`] from a line-oriented JSON command stream: discovery
//! changes go in, routing decisions and reset notifications come out, one
//! JSON object per line.
//!
//! # Usage
//!
//! ```text
//! tetherd run                          # read commands from stdin
//! tetherd run -i commands.jsonl        # read commands from a file
//! tetherd run -c tether.toml           # with seed nodes and ring settings
//! tetherd hash "42-1"                  # print a key's ring position
//! tetherd status -c tether.toml        # status after applying seed nodes
//! ```
//!
//! # Commands
//!
//! ```text
//! {"op":"add","host":"10.0.0.1","port":8080,"metadata":{"access-space":"1,2"}}
//! {"op":"update","host":"10.0.0.1","port":8080,"metadata":{"access-space":"2"}}
//! {"op":"remove","host":"10.0.0.1","port":8080}
//! {"op":"route","identity":"42","space":1,"live":[{"host":"10.0.0.1","port":8080}]}
//! {"op":"disconnect","identity":"42"}
//! {"op":"status"}
//! ```
//!
//! `live` may be omitted, in which case every registered node is live.

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tether_cluster::{Balancer, ChannelNotifier, DiscoveryListener, Outbound, Route};
use tether_placement::ring_hash;
use tether_types::{DiscoveryEvent, Instance, NodeDescriptor, NodeId};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "tetherd",
    version,
    about = "Sticky connection routing over a consistent hashing ring"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON-lines command stream and print the results.
    Run {
        /// Read commands from this file instead of stdin.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the ring position of a key.
    Hash {
        /// The key, e.g. `"10.0.0.1:8080#0"` or `"42-1"`.
        key: String,
    },

    /// Print the status after applying the configured seed nodes.
    Status,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Run { input } => cmd_run(&config, input).await,
        Commands::Hash { key } => {
            println!("{}", ring_hash(&key));
            Ok(())
        }
        Commands::Status => cmd_status(&config).await,
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
/// Logs go to stderr so stdout stays machine-readable.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build a balancer and apply the configured seed nodes through the
/// discovery listener.
async fn start(config: &CliConfig) -> Result<(Arc<Balancer>, mpsc::UnboundedReceiver<Outbound>)> {
    let (notifier, resets) = ChannelNotifier::new();
    let balancer = Balancer::new(config.balancer(), Arc::new(notifier));

    let seeds = config.seed_descriptors();
    if !seeds.is_empty() {
        let (handle, task) = DiscoveryListener::spawn(balancer.clone(), 1);
        handle
            .send(DiscoveryEvent::Added(seeds))
            .await
            .context("discovery listener stopped before seeding")?;
        drop(handle);
        let summary = task.await.context("discovery listener panicked")?;
        info!(applied = summary.applied, dropped = summary.dropped, "seed nodes applied");
    }

    Ok((balancer, resets))
}

// -----------------------------------------------------------------------
// tetherd status
// -----------------------------------------------------------------------

async fn cmd_status(config: &CliConfig) -> Result<()> {
    let (balancer, _resets) = start(config).await?;
    let status = balancer.status().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&status).context("failed to encode status")?
    );
    Ok(())
}

// -----------------------------------------------------------------------
// tetherd run
// -----------------------------------------------------------------------

/// One line of the command stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Add {
        host: String,
        port: u16,
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    Update {
        host: String,
        port: u16,
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    Remove {
        host: String,
        port: u16,
    },
    Route {
        identity: String,
        space: u32,
        #[serde(default)]
        live: Option<Vec<Instance>>,
    },
    Disconnect {
        identity: String,
    },
    Status,
}

async fn cmd_run(config: &CliConfig, input: Option<PathBuf>) -> Result<()> {
    let (balancer, mut resets) = start(config).await?;

    let reader: Box<dyn AsyncRead + Unpin> = match &input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(reader).lines();

    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read command")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<Command>(line) {
            Ok(command) => {
                debug!(line = line_no, ?command, "executing command");
                let output = execute(&balancer, command).await;
                println!("{output}");
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed command");
                println!("{}", json!({ "kind": "error", "line": line_no, "error": e.to_string() }));
            }
        }

        while let Ok(outbound) = resets.try_recv() {
            println!(
                "{}",
                json!({ "kind": "reset", "channel": outbound.channel, "message": outbound.message })
            );
        }
    }

    info!(lines = line_no, "command stream finished");
    Ok(())
}

fn descriptor(host: &str, port: u16, metadata: &HashMap<String, String>) -> Result<NodeDescriptor, String> {
    NodeDescriptor::from_metadata(host, port, metadata).map_err(|e| e.to_string())
}

async fn execute(balancer: &Balancer, command: Command) -> serde_json::Value {
    match command {
        Command::Add { host, port, metadata } => match descriptor(&host, port, &metadata) {
            Ok(d) => {
                let summary = balancer.apply(DiscoveryEvent::Added(vec![d])).await;
                json!({ "kind": "added", "node": NodeId::from_addr(&host, port), "summary": summary })
            }
            Err(e) => json!({ "kind": "error", "error": e }),
        },
        Command::Update { host, port, metadata } => match descriptor(&host, port, &metadata) {
            Ok(d) => {
                let summary = balancer.apply(DiscoveryEvent::MetadataChanged(vec![d])).await;
                json!({ "kind": "updated", "node": NodeId::from_addr(&host, port), "summary": summary })
            }
            Err(e) => json!({ "kind": "error", "error": e }),
        },
        Command::Remove { host, port } => {
            let node_id = NodeId::from_addr(&host, port);
            let summary = balancer
                .apply(DiscoveryEvent::Removed(vec![node_id.clone()]))
                .await;
            json!({ "kind": "removed", "node": node_id, "summary": summary })
        }
        Command::Route { identity, space, live } => {
            let live = match live {
                Some(live) => live,
                None => registered_instances(balancer).await,
            };
            match balancer.route(&identity, space, &live).await {
                Ok(Route::Assigned(a)) => json!({
                    "kind": "route",
                    "identity": identity,
                    "space": space,
                    "node": a.node_id,
                    "address": a.instance.to_string(),
                    "position": a.position,
                }),
                Ok(Route::Unavailable) => json!({
                    "kind": "route",
                    "identity": identity,
                    "space": space,
                    "node": null,
                }),
                Err(e) => json!({ "kind": "error", "error": e.to_string() }),
            }
        }
        Command::Disconnect { identity } => {
            let released = balancer.disconnect(&identity).await;
            json!({
                "kind": "disconnected",
                "identity": identity,
                "node": released.map(|p| p.node_id),
            })
        }
        Command::Status => json!({ "kind": "status", "status": balancer.status().await }),
    }
}

/// Every registered node as a live instance.
async fn registered_instances(balancer: &Balancer) -> Vec<Instance> {
    balancer
        .status()
        .await
        .nodes
        .into_iter()
        .filter_map(|n| {
            let (host, port) = n.address.rsplit_once(':')?;
            Some(Instance::new(host, port.parse().ok()?))
        })
        .collect()
}
