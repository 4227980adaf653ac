//! # consensus-core
//!
//! why: a single-leader replicated log that keeps a cluster agreed on an ordered command sequence
//! relations: driven by an embedding runtime (transport, clock, state machine); consensus-sim is one
//! what: node state machine, election tally, replication coordinator, rpc payloads, collaborator traits

pub mod cluster;
pub mod config;
pub mod election;
pub mod error;
pub mod handler;
pub mod log;
pub mod message;
pub mod node;
pub mod timer;
pub mod transport;

/// Identifier of a cluster member
pub type NodeId = u64;

pub use cluster::{Cluster, Peers};
pub use config::RaftConfig;
pub use election::{majority_of, Election};
pub use error::{RaftError, Result};
pub use handler::Handler;
pub use log::{LogEntry, LogIndex};
pub use message::{AppendEntries, AppendEntriesResponse, RaftMessage, VoteRequest, VoteResponse};
pub use node::{Broadcast, Node, Role};
pub use timer::{RandomTimer, Timer};
pub use transport::{MessageType, Request, Response, ResponseCallback, Transmitter};
