//! Ordered, subsystem-tagged trace returned with every response
//!
//! The trace is the simulator's observable output. Given the same starting
//! state and the same request it is reproduced line for line.

use crate::types::NodeId;
use serde::{Serialize, Serializer};
use std::fmt;

/// Subsystem that produced a trace line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Init,
    RpcSim,
    /// Carries the clock value after the tick
    Clock(u64),
    LoadBalancer,
    LeaderCheck,
    LeaderElection,
    /// The leader's validation step, naming the leader once one is known
    Leader(Option<NodeId>),
    Replication,
    Admin,
    Failure,
}

impl Tag {
    /// Subsystem name without per-event detail
    pub fn subsystem(&self) -> &'static str {
        match self {
            Tag::Init => "INIT",
            Tag::RpcSim => "RPC-SIM",
            Tag::Clock(_) => "CLOCK",
            Tag::LoadBalancer => "LOAD BALANCER",
            Tag::LeaderCheck => "LEADER CHECK",
            Tag::LeaderElection => "LEADER ELECTION",
            Tag::Leader(_) => "LEADER",
            Tag::Replication => "REPLICATION",
            Tag::Admin => "ADMIN",
            Tag::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Clock(lamport) => write!(f, "[CLOCK L:{lamport}]"),
            Tag::Leader(Some(leader)) => write!(f, "[LEADER - {leader}]"),
            other => write!(f, "[{}]", other.subsystem()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub tag: Tag,
    pub message: String,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag, self.message)
    }
}

/// Events of one request, in the order they happened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: Tag, message: impl Into<String>) {
        self.events.push(TraceEvent {
            tag,
            message: message.into(),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Rendered lines, e.g. `[CLOCK L:1] Lamport clock incremented for vote event.`
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }

    /// Events produced by `subsystem` (as returned by [`Tag::subsystem`])
    pub fn by_subsystem<'a>(&'a self, subsystem: &'a str) -> impl Iterator<Item = &'a TraceEvent> + 'a {
        self.events
            .iter()
            .filter(move |event| event.tag.subsystem() == subsystem)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.events {
            writeln!(f, "{event}")?;
        }
        Ok(())
    }
}

// Clients consume the trace as a plain list of log lines
impl Serialize for Trace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.events.iter().map(ToString::to_string))
    }
}
