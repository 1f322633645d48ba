//! votesim - drive a simulated voting cluster from the command line

mod demo;
mod output;

use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use votesim_cluster::{ClusterConfig, ClusterConfigBuilder, VotingCoordinator};
use votesim_storage::FileStateStore;

/// Simulated voting cluster with leader election, Lamport clock and replication.
#[derive(Parser)]
#[command(name = "votesim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit diagnostic logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Print responses as JSON instead of trace lines
    #[arg(long, global = true)]
    json: bool,

    /// File holding the cluster state
    #[arg(
        long,
        env = "VOTESIM_STATE_FILE",
        default_value = "votesim-state.json",
        global = true
    )]
    state_file: PathBuf,

    /// Number of nodes created by `init`
    #[arg(long, env = "VOTESIM_NODES", default_value_t = 3, global = true)]
    nodes: usize,

    /// Attempts before giving up on a contended write
    #[arg(long, env = "VOTESIM_MAX_ATTEMPTS", default_value_t = 5, global = true)]
    max_attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset the cluster: all nodes up, node-1 leader
    Init,

    /// Cast a vote
    Vote {
        /// Voter id, each voter may vote once
        #[arg(long)]
        voter: String,

        /// Candidate name
        #[arg(long)]
        candidate: String,
    },

    /// Register a new candidate
    AddCandidate {
        /// Candidate name
        name: String,
    },

    /// Simulate a node crash
    FailNode {
        /// Node id, e.g. node-1
        node: String,
    },

    /// Bring a crashed node back as a follower
    RecoverNode {
        /// Node id, e.g. node-1
        node: String,
    },

    /// Show the current cluster state
    State,

    /// Run the fail-over walkthrough against an in-memory cluster
    Demo,
}

impl Cli {
    fn config(&self) -> Result<ClusterConfig> {
        ensure!(self.nodes > 0, "--nodes must be at least 1");
        ensure!(self.max_attempts > 0, "--max-attempts must be at least 1");

        Ok(ClusterConfigBuilder::new()
            .cluster_size(self.nodes)
            .max_commit_attempts(self.max_attempts)
            .build())
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = cli.config()?;
    let store = FileStateStore::new(&cli.state_file);
    let coordinator = VotingCoordinator::new(Arc::new(store), config.clone());

    let response = match &cli.command {
        Commands::Init => coordinator.initialize()?,
        Commands::Vote { voter, candidate } => coordinator.vote(voter, candidate)?,
        Commands::AddCandidate { name } => coordinator.add_candidate(name)?,
        Commands::FailNode { node } => coordinator.fail_node(node)?,
        Commands::RecoverNode { node } => coordinator.recover_node(node)?,
        Commands::State => {
            match coordinator.state()? {
                Some(state) => output::print_state(&state, cli.json)?,
                None => output::print_uninitialized(cli.json)?,
            }
            return Ok(());
        }
        Commands::Demo => return demo::run(config, cli.json).await,
    };

    output::print_response(&response, cli.json)
}
