//! Round-robin load balancer
//!
//! The chosen target is only reported in the trace. Requests are never
//! dispatched to it: every vote is still handled by the leader.

use crate::types::NodeId;

/// Target for the `request_counter`-th request in a cluster of `cluster_size`
///
/// Computes `((request_counter - 1) mod cluster_size) + 1` with a Euclidean
/// modulo, so counter 0 wraps to the last node.
///
/// # Panics
///
/// Panics if `cluster_size` is zero.
pub fn select_target(request_counter: u64, cluster_size: usize) -> NodeId {
    assert!(cluster_size > 0, "cluster_size must be greater than 0");

    let slot = (i128::from(request_counter) - 1).rem_euclid(cluster_size as i128) + 1;
    NodeId(slot as u64)
}
