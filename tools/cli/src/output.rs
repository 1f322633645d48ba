//! Terminal rendering of responses and state

use anyhow::Result;
use votesim_cluster::{ClusterState, Node, NodeId, Response};

pub fn print_response(response: &Response, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    print!("{}", response.trace);
    println!("=> {}", response.message());
    println!();
    print_summary(&response.state);
    Ok(())
}

pub fn print_state(state: &ClusterState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
    } else {
        print_summary(state);
    }
    Ok(())
}

pub fn print_uninitialized(json: bool) -> Result<()> {
    if json {
        println!("null");
    } else {
        println!("System not initialized. Run `votesim init` first.");
    }
    Ok(())
}

fn print_summary(state: &ClusterState) {
    println!(
        "clock {}  requests {}  voters {}",
        state.lamport_clock,
        state.request_counter,
        state.voted_voter_ids.len()
    );

    for (id, node) in &state.nodes {
        println!("  {}", node_line(*id, node));
    }

    for candidate in state.candidate_totals() {
        let note = if candidate.registered { "" } else { " (write-in)" };
        println!("  {:<16} {}{note}", candidate.name, candidate.total_votes);
    }
}

fn node_line(id: NodeId, node: &Node) -> String {
    let role = match (node.is_up(), node.is_leader) {
        (true, true) => "leader",
        (true, false) => "follower",
        (false, _) => "-",
    };
    let tallies: Vec<String> = node
        .votes
        .iter()
        .map(|(candidate, count)| format!("{candidate}={count}"))
        .collect();

    format!(
        "{:<8} {:<5} {:<8} {}",
        id.to_string(),
        node.status.to_string(),
        role,
        tallies.join(" ")
    )
    .trim_end()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_line() {
        let mut state = ClusterState::new(2);
        state.nodes.get_mut(&NodeId(1)).unwrap().votes.insert("Alice".to_string(), 2);
        state.fail_node(NodeId(2));

        assert_eq!(
            node_line(NodeId(1), state.node(NodeId(1)).unwrap()),
            "node-1   UP    leader   Alice=2"
        );
        assert_eq!(
            node_line(NodeId(2), state.node(NodeId(2)).unwrap()),
            "node-2   DOWN  -"
        );
    }
}
