//! Core types used throughout the simulator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a simulated node
///
/// Rendered and serialized as `node-<n>`. Ordering is numeric, so `node-10`
/// sorts after `node-9` and map iteration follows node creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Error returned when a string is not of the form `node-<n>` with `n >= 1`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id '{0}', expected node-<n>")]
pub struct ParseNodeIdError(pub String);

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("node-")
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .map(NodeId)
            .ok_or_else(|| ParseNodeIdError(s.to_string()))
    }
}

impl TryFrom<String> for NodeId {
    type Error = ParseNodeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

/// Liveness of a simulated node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Up,
    Down,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Up => write!(f, "UP"),
            NodeStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Cluster-wide Lamport clock
///
/// Ticks once for every vote request the cluster receives, whether or not the
/// vote is eventually accepted. It models "event observed", not "event
/// committed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct LamportClock(pub u64);

impl LamportClock {
    /// Advance the clock by one and return the new value
    ///
    /// Returns `None`, leaving the clock untouched, once it has reached
    /// `u64::MAX`.
    pub fn tick(&mut self) -> Option<u64> {
        self.0 = self.0.checked_add(1)?;
        Some(self.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.0 == u64::MAX
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LamportClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L:{}", self.0)
    }
}
