//! Fail-over walkthrough against an in-memory cluster
//!
//! Registers a candidate, votes, crashes the leader, votes again so an
//! election runs, and finally brings the old leader back.

use crate::output;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use votesim_cluster::{ClusterConfig, ClusterService, MemoryStateStore, Response, VotingCoordinator};

pub async fn run(config: ClusterConfig, json: bool) -> Result<()> {
    let store = Arc::new(MemoryStateStore::new());
    let service = ClusterService::spawn(VotingCoordinator::new(store, config));

    let mut steps: Vec<(&str, Response)> = Vec::new();
    steps.push(("Initialize the cluster", service.initialize().await?));
    steps.push(("Register candidate Alice", service.add_candidate("Alice").await?));
    steps.push(("Voter v1 votes for Alice", service.vote("v1", "Alice").await?));
    steps.push(("Voter v1 tries to vote again", service.vote("v1", "Alice").await?));
    steps.push(("Crash the leader, node-1", service.fail_node("node-1").await?));
    steps.push(("Voter v2 votes for Alice", service.vote("v2", "Alice").await?));
    steps.push(("Bring node-1 back", service.recover_node("node-1").await?));

    service.shutdown().await;

    if json {
        let mut rendered = Vec::with_capacity(steps.len());
        for (title, response) in &steps {
            let mut entry = serde_json::Map::new();
            entry.insert("step".to_string(), Value::from(*title));
            entry.insert("response".to_string(), serde_json::to_value(response)?);
            rendered.push(Value::Object(entry));
        }
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    println!("=== votesim fail-over walkthrough ===\n");
    for (i, (title, response)) in steps.iter().enumerate() {
        println!("--- Step {}: {title} ---", i + 1);
        output::print_response(response, false)?;
        println!();
    }

    Ok(())
}
