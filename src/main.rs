use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddrV4;
use std::path::PathBuf;

use gossip_membership::config::JoinRetryConfig;
use gossip_membership::logging::init_logging;
use gossip_membership::runtime::NodeRuntime;
use gossip_membership::sim::{FailurePlan, NetworkConditions, Simulation, SimulationConfig};
use gossip_membership::{MembershipConfig, Node, UdpTransport};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ProtocolArgs {
    /// Ticks without a fresher heartbeat before a peer is suspected
    #[arg(long)]
    suspicion_timeout: Option<u64>,
    /// Ticks without a fresher heartbeat before a peer is removed
    #[arg(long)]
    removal_timeout: Option<u64>,
    /// Number of peers gossiped to per tick
    #[arg(long)]
    fanout: Option<usize>,
}

impl ProtocolArgs {
    fn apply(&self, config: &mut MembershipConfig) {
        if let Some(suspicion) = self.suspicion_timeout {
            config.suspicion_timeout = suspicion;
        }
        if let Some(removal) = self.removal_timeout {
            config.removal_timeout = removal;
        }
        if let Some(fanout) = self.fanout {
            config.fanout = fanout;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a membership node over UDP
    Run {
        #[arg(long, default_value = "127.0.0.1:7946")]
        bind: SocketAddrV4,
        /// Well-known introducer; defaults to the config value
        #[arg(long)]
        introducer: Option<SocketAddrV4>,
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Length of one protocol period in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,
        /// Give up joining after this many unanswered requests
        #[arg(long)]
        join_attempts: Option<u32>,
        #[command(flatten)]
        protocol: ProtocolArgs,
    },
    /// Simulate a cluster over an in-process lossy network
    Simulate {
        #[arg(long, default_value = "10")]
        nodes: usize,
        #[arg(long, default_value = "100")]
        ticks: u64,
        /// Ticks between two node starts
        #[arg(long, default_value = "1")]
        start_interval: u64,
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,
        #[arg(long, default_value = "0.0")]
        duplicate_rate: f64,
        #[arg(long)]
        reorder: bool,
        /// Tick at which nodes are failed
        #[arg(long)]
        fail_at: Option<u64>,
        /// Number of nodes failed at --fail-at, taken from the highest ids
        #[arg(long, default_value = "1")]
        fail_count: usize,
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        protocol: ProtocolArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bind,
            introducer,
            config,
            period_ms,
            join_attempts,
            protocol,
        } => {
            let mut config = match config {
                Some(path) => MembershipConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => MembershipConfig::default(),
            };
            protocol.apply(&mut config);
            if let Some(introducer) = introducer {
                config.introducer = introducer;
            }
            if let Some(period_ms) = period_ms {
                config.protocol_period_ms = period_ms;
            }
            if let Some(max_attempts) = join_attempts {
                config.join_retry = Some(JoinRetryConfig {
                    max_attempts,
                    ..config.join_retry.unwrap_or_default()
                });
            }

            let transport = UdpTransport::bind(bind)
                .await
                .with_context(|| format!("binding UDP socket on {}", bind))?;
            let node = Node::new(transport.local_address(), config)?;

            println!(
                "Starting membership node {} (introducer {})",
                node.address(),
                node.introducer()
            );
            let mut runtime = NodeRuntime::new(node, transport);
            runtime
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            println!("Left the group after {} ticks", runtime.now());
        }
        Commands::Simulate {
            nodes,
            ticks,
            start_interval,
            drop_rate,
            duplicate_rate,
            reorder,
            fail_at,
            fail_count,
            seed,
            json,
            protocol,
        } => {
            let mut membership = MembershipConfig::default();
            protocol.apply(&mut membership);

            // Never fail the introducer
            let failures = fail_at
                .map(|at| FailurePlan {
                    at,
                    nodes: (1..nodes)
                        .rev()
                        .take(fail_count)
                        .map(Simulation::address_of)
                        .collect(),
                })
                .into_iter()
                .collect();

            let mut sim = Simulation::new(SimulationConfig {
                nodes,
                start_interval,
                conditions: NetworkConditions {
                    drop_rate,
                    duplicate_rate,
                    reorder,
                },
                failures,
                seed,
                membership,
            })?;
            sim.run(ticks);

            let report = sim.report();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "After {} ticks (converged: {}), network sent {} dropped {} duplicated {}",
                    report.ticks,
                    report.converged,
                    report.network.sent,
                    report.network.dropped,
                    report.network.duplicated
                );
                for node in &report.nodes {
                    println!(
                        "{:<12} {:<14} heartbeat {:<6} members [{}]",
                        node.address,
                        node.state.to_string(),
                        node.heartbeat,
                        node.members.join(", ")
                    );
                }
            }
        }
    }

    Ok(())
}
