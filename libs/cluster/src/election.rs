//! Leader election over the simulated node set
//!
//! Election follows the bully priority rule: among the nodes that are up, the
//! one with the highest id wins. Ids are unique integers, so there is never a
//! tie to break.

use crate::state::Nodes;
use crate::types::NodeId;
use tracing::{info, warn};

/// No node is up, so nobody can be elected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no node is up to be elected leader")]
pub struct NoQuorum;

/// The node that is flagged as leader and is up
///
/// Returns `None` both when no node is flagged and when the flagged node is
/// down.
pub fn current_leader(nodes: &Nodes) -> Option<NodeId> {
    nodes
        .iter()
        .find(|(_, node)| node.is_leader && node.is_up())
        .map(|(id, _)| *id)
}

/// Elect the highest up node and clear every other leader flag
pub fn elect(nodes: &mut Nodes) -> Result<NodeId, NoQuorum> {
    let winner = nodes
        .iter()
        .filter(|(_, node)| node.is_up())
        .map(|(id, _)| *id)
        .max();

    for (id, node) in nodes.iter_mut() {
        node.is_leader = Some(*id) == winner;
    }

    match winner {
        Some(leader) => {
            info!(%leader, "elected new leader");
            Ok(leader)
        }
        None => {
            warn!("election failed, every node is down");
            Err(NoQuorum)
        }
    }
}
