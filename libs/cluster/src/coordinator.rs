//! Request pipeline of the simulated cluster
//!
//! Each request runs as one unit: load the record, apply the operation to a
//! private copy, and write it back with a compare-and-swap on the version it
//! was loaded at. Losing the race re-runs the whole pipeline from a fresh load,
//! so only the trace of the attempt that actually committed is returned.
//!
//! A vote walks these states:
//!
//! ```text
//! Start -> ClockTicked -> LeaderChecked -> [ElectionRun] -> Validated -> Replicated -> Done
//!                                               |              |
//!                                               v              v
//!                                         Failed(NoQuorum)  Rejected(DuplicateVoter)
//! ```
//!
//! Nothing is rolled back on the early exits: the clock tick and request
//! counter are persisted either way.

use crate::balancer::select_target;
use crate::config::ClusterConfig;
use crate::election::{current_leader, elect, NoQuorum};
use crate::replication::{apply_vote, register_candidate, DuplicateCandidate};
use crate::state::ClusterState;
use crate::store::{StateStore, StoreError, Versioned};
use crate::trace::{Tag, Trace};
use crate::types::NodeId;
use crate::{ClusterError, Result};

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a request ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// The operation took effect
    Committed,
    /// Refused without side effects beyond the clock and counter
    Rejected(Rejection),
    /// Could not be carried out, partial side effects were persisted
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("voter '{voter_id}' has already voted")]
    DuplicateVoter { voter_id: String },

    #[error("candidate '{name}' already exists")]
    DuplicateCandidate { name: String },

    #[error("candidate name must not be empty")]
    InvalidCandidate,

    #[error("a ballot needs both a voter id and a candidate name")]
    InvalidBallot,

    #[error("'{node_id}' is not a node of this cluster")]
    UnknownNode { node_id: String },

    #[error("{node_id} is already up")]
    NodeAlreadyUp { node_id: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    #[error("no leader available to process vote")]
    NoQuorum,

    #[error("logical clock or request counter is exhausted")]
    CounterExhausted,
}

/// Result of one request: what happened, how, and the state it left behind
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub trace: Trace,
    pub outcome: Outcome,
    pub state: ClusterState,
    /// Store version of `state`
    pub version: u64,
}

impl Response {
    pub fn is_committed(&self) -> bool {
        self.outcome == Outcome::Committed
    }

    /// One-line summary for clients
    pub fn message(&self) -> String {
        match &self.outcome {
            Outcome::Committed => "OK".to_string(),
            Outcome::Rejected(rejection) => rejection.to_string(),
            Outcome::Failed(failure) => failure.to_string(),
        }
    }
}

/// Runs cluster operations against a state store
pub struct VotingCoordinator {
    store: Arc<dyn StateStore>,
    config: ClusterConfig,
}

impl VotingCoordinator {
    pub fn new(store: Arc<dyn StateStore>, config: ClusterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Reset the cluster to `cluster_size` up nodes with `node-1` as leader
    pub fn initialize(&self) -> Result<Response> {
        let size = self.config.cluster_size;
        let mut trace = Trace::new();
        trace.push(Tag::Init, "Initializing system...");

        let state = ClusterState::new(size);
        let version = self.store.replace(&state)?;

        trace.push(
            Tag::Init,
            format!("System reset complete. {size} nodes created. node-1 is leader."),
        );
        info!(cluster_size = size, version, "cluster initialized");

        Ok(Response {
            trace,
            outcome: Outcome::Committed,
            state,
            version,
        })
    }

    /// Cast a ballot for `candidate` on behalf of `voter_id`
    pub fn vote(&self, voter_id: &str, candidate: &str) -> Result<Response> {
        self.commit("vote", |state, trace| {
            process_vote(state, trace, voter_id, candidate)
        })
    }

    pub fn add_candidate(&self, name: &str) -> Result<Response> {
        self.commit("add_candidate", |state, trace| {
            process_add_candidate(state, trace, name)
        })
    }

    /// Simulate a crash of `node_id` (given as `node-<n>`)
    pub fn fail_node(&self, node_id: &str) -> Result<Response> {
        self.commit("fail_node", |state, trace| {
            process_fail_node(state, trace, node_id)
        })
    }

    /// Bring a failed node back as a follower
    pub fn recover_node(&self, node_id: &str) -> Result<Response> {
        self.commit("recover_node", |state, trace| {
            process_recover_node(state, trace, node_id)
        })
    }

    /// Current state, `None` if the cluster was never initialized
    pub fn state(&self) -> Result<Option<ClusterState>> {
        Ok(self.load()?.map(|record| record.state))
    }

    fn load(&self) -> Result<Option<Versioned<ClusterState>>> {
        match self.store.load()? {
            Some(record) => {
                record.state.validate().map_err(ClusterError::CorruptState)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Load, apply, compare-and-swap; retry the whole pipeline on conflict
    fn commit<F>(&self, operation: &'static str, mut apply: F) -> Result<Response>
    where
        F: FnMut(&mut ClusterState, &mut Trace) -> Outcome,
    {
        let attempts = self.config.max_commit_attempts;

        for attempt in 1..=attempts {
            let record = self.load()?.ok_or(ClusterError::Uninitialized)?;
            let mut state = record.state;
            let mut trace = Trace::new();

            let outcome = apply(&mut state, &mut trace);

            match self.store.compare_and_swap(Some(record.version), &state) {
                Ok(version) => {
                    debug!(operation, attempt, version, ?outcome, "state committed");
                    return Ok(Response {
                        trace,
                        outcome,
                        state,
                        version,
                    });
                }
                Err(StoreError::Conflict { expected, actual }) => {
                    warn!(
                        operation,
                        attempt,
                        ?expected,
                        ?actual,
                        "lost compare-and-swap race, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ClusterError::Contention { attempts })
    }
}

fn counters_exhausted(trace: &mut Trace) -> Outcome {
    trace.push(Tag::RpcSim, "Vote counters exhausted. Rejecting.");
    Outcome::Failed(Failure::CounterExhausted)
}

fn process_vote(state: &mut ClusterState, trace: &mut Trace, voter_id: &str, candidate: &str) -> Outcome {
    trace.push(Tag::RpcSim, "Received vote request from client.");

    let Some(request) = state.request_counter.checked_add(1) else {
        return counters_exhausted(trace);
    };
    let Some(lamport) = state.lamport_clock.tick() else {
        return counters_exhausted(trace);
    };
    trace.push(Tag::Clock(lamport), "Lamport clock incremented for vote event.");

    state.request_counter = request;
    let target = select_target(state.request_counter, state.cluster_size());
    trace.push(
        Tag::LoadBalancer,
        format!(
            "Request #{}. Round-robin chose {target} as target.",
            state.request_counter
        ),
    );

    let leader = match current_leader(&state.nodes) {
        Some(leader) => leader,
        None => {
            trace.push(Tag::LeaderCheck, "Leader is down!");
            trace.push(Tag::LeaderElection, "Starting leader election simulation.");

            match elect(&mut state.nodes) {
                Ok(leader) => {
                    trace.push(Tag::LeaderElection, format!("{leader} is the new leader."));
                    leader
                }
                Err(NoQuorum) => {
                    trace.push(Tag::LeaderElection, "No available nodes to elect as leader.");
                    return Outcome::Failed(Failure::NoQuorum);
                }
            }
        }
    };

    trace.push(
        Tag::RpcSim,
        format!("Request conceptually forwarded to leader: {leader}."),
    );

    if voter_id.is_empty() || candidate.is_empty() {
        trace.push(
            Tag::Leader(None),
            "Ballot is missing a voter id or candidate name. Rejecting.",
        );
        return Outcome::Rejected(Rejection::InvalidBallot);
    }

    if !state.record_voter(voter_id) {
        trace.push(
            Tag::Leader(None),
            format!("Voter '{voter_id}' has already voted. Rejecting."),
        );
        return Outcome::Rejected(Rejection::DuplicateVoter {
            voter_id: voter_id.to_string(),
        });
    }

    trace.push(
        Tag::Leader(Some(leader)),
        format!("Vote for '{candidate}' validated and recorded."),
    );

    trace.push(
        Tag::Replication,
        "Replicating new vote state to all active follower nodes...",
    );
    let replicas = apply_vote(state, candidate);
    trace.push(
        Tag::Replication,
        format!("State successfully replicated across {replicas} active nodes."),
    );

    Outcome::Committed
}

fn process_add_candidate(state: &mut ClusterState, trace: &mut Trace, name: &str) -> Outcome {
    if name.is_empty() {
        trace.push(Tag::Admin, "Admin action rejected: candidate name is empty.");
        return Outcome::Rejected(Rejection::InvalidCandidate);
    }

    match register_candidate(state, name) {
        Ok(replicas) => {
            trace.push(
                Tag::Admin,
                format!("Admin added new candidate: {name}. Initialized on {replicas} active nodes."),
            );
            Outcome::Committed
        }
        Err(DuplicateCandidate(name)) => {
            trace.push(Tag::Admin, format!("Candidate '{name}' already exists."));
            Outcome::Rejected(Rejection::DuplicateCandidate { name })
        }
    }
}

fn process_fail_node(state: &mut ClusterState, trace: &mut Trace, node_id: &str) -> Outcome {
    let Some((id, was_leader)) = node_id
        .parse::<NodeId>()
        .ok()
        .and_then(|id| state.fail_node(id).map(|was_leader| (id, was_leader)))
    else {
        trace.push(Tag::Admin, format!("Node '{node_id}' is not part of the cluster."));
        return Outcome::Rejected(Rejection::UnknownNode {
            node_id: node_id.to_string(),
        });
    };

    trace.push(
        Tag::Failure,
        format!("!! FAILURE SIMULATED !! Node {id} has been shut down."),
    );
    if was_leader {
        trace.push(
            Tag::Failure,
            format!("{id} was the leader. A new leader will be elected on the next request."),
        );
    }
    info!(node = %id, was_leader, "node failed");

    Outcome::Committed
}

fn process_recover_node(state: &mut ClusterState, trace: &mut Trace, node_id: &str) -> Outcome {
    let Some((id, recovered)) = node_id
        .parse::<NodeId>()
        .ok()
        .and_then(|id| state.recover_node(id).map(|recovered| (id, recovered)))
    else {
        trace.push(Tag::Admin, format!("Node '{node_id}' is not part of the cluster."));
        return Outcome::Rejected(Rejection::UnknownNode {
            node_id: node_id.to_string(),
        });
    };

    if !recovered {
        trace.push(Tag::Admin, format!("Node {id} is already up."));
        return Outcome::Rejected(Rejection::NodeAlreadyUp { node_id: id });
    }

    trace.push(
        Tag::Admin,
        format!("Node {id} recovered and rejoined as a follower with empty tallies."),
    );
    info!(node = %id, "node recovered");

    Outcome::Committed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStateStore, StoreResult};
    use crate::types::LamportClock;
    use crate::ClusterConfigBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> (Arc<MemoryStateStore>, VotingCoordinator) {
        let store = Arc::new(MemoryStateStore::new());
        let coordinator = VotingCoordinator::new(store.clone(), ClusterConfig::default());
        (store, coordinator)
    }

    #[test]
    fn test_initialize() {
        let (_, coordinator) = coordinator();
        let response = coordinator.initialize().unwrap();

        assert!(response.is_committed());
        assert_eq!(response.version, 1);
        assert_eq!(
            response.trace.lines(),
            vec![
                "[INIT] Initializing system...",
                "[INIT] System reset complete. 3 nodes created. node-1 is leader.",
            ]
        );
        assert_eq!(coordinator.state().unwrap(), Some(ClusterState::new(3)));
    }

    #[test]
    fn test_uninitialized() {
        let (_, coordinator) = coordinator();

        assert!(matches!(
            coordinator.vote("v1", "Alice"),
            Err(ClusterError::Uninitialized)
        ));
        assert!(matches!(
            coordinator.add_candidate("Alice"),
            Err(ClusterError::Uninitialized)
        ));
        assert!(coordinator.state().unwrap().is_none());
    }

    #[test]
    fn test_storage_unavailable() {
        let (store, coordinator) = coordinator();
        coordinator.initialize().unwrap();
        store.set_available(false);

        assert!(matches!(
            coordinator.vote("v1", "Alice"),
            Err(ClusterError::StorageUnavailable(_))
        ));
        assert!(matches!(
            coordinator.initialize(),
            Err(ClusterError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_corrupt_record() {
        let (store, coordinator) = coordinator();
        let mut broken = ClusterState::new(3);
        broken.nodes.get_mut(&NodeId(2)).unwrap().is_leader = true;
        store.replace(&broken).unwrap();

        assert!(matches!(
            coordinator.vote("v1", "Alice"),
            Err(ClusterError::CorruptState(_))
        ));
    }

    #[test]
    fn test_exhausted_counters_are_corrupt() {
        let (store, coordinator) = coordinator();
        let mut exhausted = ClusterState::new(3);
        exhausted.request_counter = u64::MAX;
        store.replace(&exhausted).unwrap();

        assert!(matches!(
            coordinator.vote("v1", "Alice"),
            Err(ClusterError::CorruptState(_))
        ));
    }

    #[test]
    fn test_vote_at_counter_limit_fails_without_changes() {
        for (clock, counter) in [(u64::MAX, 7), (7, u64::MAX)] {
            let mut state = ClusterState::new(3);
            state.lamport_clock = LamportClock(clock);
            state.request_counter = counter;
            let before = state.clone();

            let mut trace = Trace::default();
            let outcome = process_vote(&mut state, &mut trace, "v1", "Alice");

            assert_eq!(outcome, Outcome::Failed(Failure::CounterExhausted));
            assert_eq!(state, before);
        }
    }

    #[test]
    fn test_vote_trace() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();
        coordinator.add_candidate("Alice").unwrap();

        let response = coordinator.vote("v1", "Alice").unwrap();

        assert!(response.is_committed());
        assert_eq!(
            response.trace.lines(),
            vec![
                "[RPC-SIM] Received vote request from client.",
                "[CLOCK L:1] Lamport clock incremented for vote event.",
                "[LOAD BALANCER] Request #1. Round-robin chose node-1 as target.",
                "[RPC-SIM] Request conceptually forwarded to leader: node-1.",
                "[LEADER - node-1] Vote for 'Alice' validated and recorded.",
                "[REPLICATION] Replicating new vote state to all active follower nodes...",
                "[REPLICATION] State successfully replicated across 3 active nodes.",
            ]
        );
    }

    #[test]
    fn test_duplicate_voter_still_ticks() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();

        coordinator.vote("v1", "Alice").unwrap();
        let response = coordinator.vote("v1", "Bob").unwrap();

        assert_eq!(
            response.outcome,
            Outcome::Rejected(Rejection::DuplicateVoter {
                voter_id: "v1".to_string()
            })
        );
        assert_eq!(response.message(), "voter 'v1' has already voted");
        assert_eq!(response.state.lamport_clock.value(), 2);
        assert_eq!(response.state.request_counter, 2);
        assert_eq!(response.state.tally(NodeId(1), "Alice"), Some(1));
        assert_eq!(response.state.tally(NodeId(1), "Bob"), Some(0));
        assert_eq!(
            response.trace.lines().last().unwrap(),
            "[LEADER] Voter 'v1' has already voted. Rejecting."
        );

        // The rejection was persisted with the tick
        let stored = coordinator.state().unwrap().unwrap();
        assert_eq!(stored.lamport_clock.value(), 2);
    }

    #[test]
    fn test_invalid_ballot() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();

        let response = coordinator.vote("", "Alice").unwrap();
        assert_eq!(response.outcome, Outcome::Rejected(Rejection::InvalidBallot));
        assert_eq!(response.state.lamport_clock.value(), 1);
        assert!(response.state.voted_voter_ids.is_empty());
    }

    #[test]
    fn test_no_quorum_persists_partial_state() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();
        for node in ["node-1", "node-2", "node-3"] {
            coordinator.fail_node(node).unwrap();
        }

        let response = coordinator.vote("v1", "Alice").unwrap();

        assert_eq!(response.outcome, Outcome::Failed(Failure::NoQuorum));
        assert_eq!(response.message(), "no leader available to process vote");
        assert_eq!(
            response.trace.lines()[3..],
            [
                "[LEADER CHECK] Leader is down!",
                "[LEADER ELECTION] Starting leader election simulation.",
                "[LEADER ELECTION] No available nodes to elect as leader.",
            ]
        );

        let stored = coordinator.state().unwrap().unwrap();
        assert_eq!(stored.lamport_clock.value(), 1);
        assert_eq!(stored.request_counter, 1);
        assert!(stored.voted_voter_ids.is_empty());
        assert!(stored.nodes.values().all(|node| !node.is_leader));
    }

    #[test]
    fn test_add_candidate_outcomes() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();

        let response = coordinator.add_candidate("Alice").unwrap();
        assert!(response.is_committed());
        assert_eq!(
            response.trace.lines(),
            vec!["[ADMIN] Admin added new candidate: Alice. Initialized on 3 active nodes."]
        );

        let response = coordinator.add_candidate("Alice").unwrap();
        assert_eq!(
            response.outcome,
            Outcome::Rejected(Rejection::DuplicateCandidate {
                name: "Alice".to_string()
            })
        );

        let response = coordinator.add_candidate("").unwrap();
        assert_eq!(response.outcome, Outcome::Rejected(Rejection::InvalidCandidate));
    }

    #[test]
    fn test_fail_node_outcomes() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();

        let response = coordinator.fail_node("node-1").unwrap();
        assert!(response.is_committed());
        assert_eq!(response.trace.len(), 2);
        assert_eq!(response.state.leader(), None);

        for bogus in ["node-7", "leader"] {
            let response = coordinator.fail_node(bogus).unwrap();
            assert_eq!(
                response.outcome,
                Outcome::Rejected(Rejection::UnknownNode {
                    node_id: bogus.to_string()
                })
            );
        }
    }

    #[test]
    fn test_recover_node() {
        let (_, coordinator) = coordinator();
        coordinator.initialize().unwrap();
        coordinator.add_candidate("Alice").unwrap();
        coordinator.fail_node("node-1").unwrap();
        coordinator.vote("v1", "Alice").unwrap();

        let response = coordinator.recover_node("node-1").unwrap();
        assert!(response.is_committed());

        let state = response.state;
        assert_eq!(state.leader(), Some(NodeId(3)));
        assert!(state.node(NodeId(1)).unwrap().is_up());
        assert_eq!(state.tally(NodeId(1), "Alice"), Some(0));
        assert_eq!(state.tally(NodeId(3), "Alice"), Some(1));

        let response = coordinator.recover_node("node-1").unwrap();
        assert_eq!(
            response.outcome,
            Outcome::Rejected(Rejection::NodeAlreadyUp { node_id: NodeId(1) })
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(Outcome::Rejected(Rejection::DuplicateVoter {
            voter_id: "v1".to_string(),
        }))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "rejected",
                "reason": { "kind": "duplicate_voter", "voter_id": "v1" }
            })
        );

        let json = serde_json::to_value(Outcome::Committed).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "committed" }));
    }

    /// Lets another writer slip in between a load and the next compare-and-swap
    struct RacingStore {
        inner: MemoryStateStore,
        races_left: AtomicUsize,
    }

    impl StateStore for RacingStore {
        fn load(&self) -> StoreResult<Option<Versioned<ClusterState>>> {
            self.inner.load()
        }

        fn compare_and_swap(&self, expected: Option<u64>, state: &ClusterState) -> StoreResult<u64> {
            if self.races_left.load(Ordering::SeqCst) > 0 {
                self.races_left.fetch_sub(1, Ordering::SeqCst);

                // A concurrent request casts its own vote first
                let mut rival = self.inner.load()?.unwrap().state;
                let mut trace = Trace::new();
                process_vote(&mut rival, &mut trace, "rival", "Bob");
                self.inner.replace(&rival)?;
            }
            self.inner.compare_and_swap(expected, state)
        }

        fn replace(&self, state: &ClusterState) -> StoreResult<u64> {
            self.inner.replace(state)
        }
    }

    #[test]
    fn test_lost_update_is_retried() {
        let store = Arc::new(RacingStore {
            inner: MemoryStateStore::new(),
            races_left: AtomicUsize::new(0),
        });
        let coordinator = VotingCoordinator::new(store.clone(), ClusterConfig::default());
        coordinator.initialize().unwrap();
        store.races_left.store(1, Ordering::SeqCst);

        let response = coordinator.vote("v1", "Alice").unwrap();

        // Both the rival's vote and ours survive
        let state = response.state;
        assert_eq!(state.tally(NodeId(2), "Bob"), Some(1));
        assert_eq!(state.tally(NodeId(2), "Alice"), Some(1));
        assert_eq!(state.lamport_clock.value(), 2);
        assert_eq!(state.voted_voter_ids.len(), 2);

        // The returned trace is the committed attempt's
        assert_eq!(
            response.trace.lines()[1],
            "[CLOCK L:2] Lamport clock incremented for vote event."
        );
    }

    #[test]
    fn test_contention_is_bounded() {
        let store = Arc::new(RacingStore {
            inner: MemoryStateStore::new(),
            races_left: AtomicUsize::new(usize::MAX),
        });
        let config = ClusterConfigBuilder::new().max_commit_attempts(3).build();
        let coordinator = VotingCoordinator::new(store.clone(), config);
        store.inner.replace(&ClusterState::new(3)).unwrap();

        assert!(matches!(
            coordinator.vote("v1", "Alice"),
            Err(ClusterError::Contention { attempts: 3 })
        ));
    }
}
