//! Replication of accepted writes to every live replica

use crate::state::ClusterState;
use tracing::debug;

/// The candidate name is already registered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("candidate '{0}' is already registered")]
pub struct DuplicateCandidate(pub String);

/// Add one vote for `candidate` on every up node
///
/// Returns the number of replicas updated. Zero means quorum is lost; callers
/// detect that through the election, not through this return value.
pub fn apply_vote(state: &mut ClusterState, candidate: &str) -> usize {
    let mut replicas = 0;
    for (id, node) in state.nodes.iter_mut().filter(|(_, node)| node.is_up()) {
        let tally = node.votes.entry(candidate.to_string()).or_insert(0);
        *tally += 1;
        replicas += 1;

        debug!(node = %id, candidate, tally = *tally, "applied vote");
    }
    replicas
}

/// Register `name` and seed a zero tally for it on every up node
///
/// Returns the number of replicas seeded.
pub fn register_candidate(state: &mut ClusterState, name: &str) -> Result<usize, DuplicateCandidate> {
    if !state.candidates.insert(name.to_string()) {
        return Err(DuplicateCandidate(name.to_string()));
    }

    let mut replicas = 0;
    for node in state.nodes.values_mut().filter(|node| node.is_up()) {
        node.votes.entry(name.to_string()).or_insert(0);
        replicas += 1;
    }
    Ok(replicas)
}
