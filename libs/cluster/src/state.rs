//! Cluster state: the single record that the store persists

use crate::election;
use crate::types::{LamportClock, NodeId, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A simulated node and its local replica of the vote tallies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub status: NodeStatus,

    pub is_leader: bool,

    /// Candidate name -> votes this replica has applied
    #[serde(default)]
    pub votes: BTreeMap<String, u64>,
}

impl Node {
    pub fn new() -> Self {
        Self {
            status: NodeStatus::Up,
            is_leader: false,
            votes: BTreeMap::new(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == NodeStatus::Up
    }

    /// Take the node down. A down node never leads.
    pub fn shut_down(&mut self) {
        self.status = NodeStatus::Down;
        self.is_leader = false;
    }

    pub fn tally(&self, candidate: &str) -> u64 {
        self.votes.get(candidate).copied().unwrap_or(0)
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

/// Nodes keyed by id, iterated in creation order
pub type Nodes = BTreeMap<NodeId, Node>;

/// Aggregated view of one candidate, derived from the replicas on read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub name: String,

    /// Highest tally held by any replica. Up replicas agree; a replica that
    /// was down can only lag behind.
    pub total_votes: u64,

    /// False for write-in names that received votes without registration
    pub registered: bool,
}

/// Complete state of the simulated cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub nodes: Nodes,

    /// Registered candidate names, stored as a `{name: 0}` map
    #[serde(default, with = "candidate_names")]
    pub candidates: BTreeSet<String>,

    /// Voters whose ballot has been accepted (append-only)
    #[serde(rename = "voted_ids", default)]
    pub voted_voter_ids: BTreeSet<String>,

    #[serde(rename = "global_lamport_clock", default)]
    pub lamport_clock: LamportClock,

    /// Vote requests received so far, drives the round-robin balancer
    #[serde(default)]
    pub request_counter: u64,
}

impl ClusterState {
    /// Fresh cluster of `cluster_size` up nodes with `node-1` as leader
    pub fn new(cluster_size: usize) -> Self {
        let nodes = (1..=cluster_size as u64)
            .map(|i| {
                let mut node = Node::new();
                node.is_leader = i == 1;
                (NodeId(i), node)
            })
            .collect();

        Self {
            nodes,
            candidates: BTreeSet::new(),
            voted_voter_ids: BTreeSet::new(),
            lamport_clock: LamportClock::default(),
            request_counter: 0,
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn up_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_up())
            .map(|(id, node)| (*id, node))
    }

    /// Current live leader, if any
    pub fn leader(&self) -> Option<NodeId> {
        election::current_leader(&self.nodes)
    }

    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.voted_voter_ids.contains(voter_id)
    }

    /// Record an accepted voter. Returns false if the voter was already known.
    pub fn record_voter(&mut self, voter_id: &str) -> bool {
        self.voted_voter_ids.insert(voter_id.to_string())
    }

    /// Tally of `candidate` on node `id`, `None` if the node does not exist
    pub fn tally(&self, id: NodeId, candidate: &str) -> Option<u64> {
        self.nodes.get(&id).map(|node| node.tally(candidate))
    }

    /// Registered candidates plus any write-ins that received votes
    pub fn candidate_totals(&self) -> Vec<Candidate> {
        let mut totals: BTreeMap<&str, u64> =
            self.candidates.iter().map(|name| (name.as_str(), 0)).collect();

        for node in self.nodes.values() {
            for (name, count) in &node.votes {
                let total = totals.entry(name.as_str()).or_insert(0);
                *total = (*total).max(*count);
            }
        }

        totals
            .into_iter()
            .map(|(name, total_votes)| Candidate {
                name: name.to_string(),
                total_votes,
                registered: self.candidates.contains(name),
            })
            .collect()
    }

    /// Take node `id` down.
    ///
    /// Returns `None` for an unknown node, otherwise whether it was the leader.
    pub fn fail_node(&mut self, id: NodeId) -> Option<bool> {
        let node = self.nodes.get_mut(&id)?;
        let was_leader = node.is_leader && node.is_up();
        node.shut_down();
        Some(was_leader)
    }

    /// Bring a down node back as a follower.
    ///
    /// The node rejoins with zeroed tallies for the registered candidates and
    /// does not catch up on votes it missed. Returns `None` for an unknown
    /// node and `Some(false)` if the node was already up.
    pub fn recover_node(&mut self, id: NodeId) -> Option<bool> {
        let candidates = &self.candidates;
        let node = self.nodes.get_mut(&id)?;
        if node.is_up() {
            return Some(false);
        }

        node.status = NodeStatus::Up;
        node.is_leader = false;
        node.votes = candidates.iter().map(|name| (name.clone(), 0)).collect();
        Some(true)
    }

    /// Check the structural invariants of a loaded record
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("cluster has no nodes".to_string());
        }

        for (expected, id) in (1..).map(NodeId).zip(self.nodes.keys()) {
            if expected != *id {
                return Err(format!("node ids are not contiguous: expected {expected}, found {id}"));
            }
        }

        if let Some((id, _)) = self
            .nodes
            .iter()
            .find(|(_, node)| node.is_leader && !node.is_up())
        {
            return Err(format!("{id} is down but flagged as leader"));
        }

        let leaders = self.nodes.values().filter(|node| node.is_leader).count();
        if leaders > 1 {
            return Err(format!("{leaders} nodes are flagged as leader"));
        }

        if self.lamport_clock.is_exhausted() {
            return Err(format!("logical clock is exhausted ({})", self.lamport_clock));
        }
        if self.request_counter == u64::MAX {
            return Err("request counter is exhausted".to_string());
        }

        Ok(())
    }
}

mod candidate_names {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::{BTreeMap, BTreeSet};

    pub fn serialize<S: Serializer>(names: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(names.iter().map(|name| (name, 0u64)))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Names {
        Map(BTreeMap<String, IgnoredAny>),
        List(BTreeSet<String>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
        Ok(match Names::deserialize(deserializer)? {
            Names::Map(map) => map.into_keys().collect(),
            Names::List(names) => names,
        })
    }
}
