//! # message
//!
//! why: define all raft rpc payloads exchanged between nodes
//! relations: produced by node.rs and cluster.rs, carried by transport.rs, serialized for the wire
//! what: VoteRequest, VoteResponse, AppendEntries, AppendEntriesResponse, RaftMessage codec

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::log::{LogEntry, LogIndex};
use crate::NodeId;

/// Sent by candidates to gather votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    /// `None` when the candidate's log is empty
    pub last_log_index: Option<LogIndex>,
    pub last_log_term: Option<u64>,
}

/// Reply to a [`VoteRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// Replicates log entries; with no entries it is a heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: u64,
    pub leader_id: NodeId,
    /// Index of the entry preceding `entries`, `None` when they start the log
    pub prev_log_index: Option<LogIndex>,
    pub prev_log_term: Option<u64>,
    pub entries: Vec<LogEntry>,
    pub commit_index: Option<LogIndex>,
}

impl AppendEntries {
    /// True when no entries are carried
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reply to [`AppendEntries`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub success: bool,
}

/// All raft messages as they travel over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaftMessage {
    RequestVote(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl RaftMessage {
    /// Serialize to the JSON wire format
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a message previously produced by [`RaftMessage::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<VoteRequest> for RaftMessage {
    fn from(m: VoteRequest) -> Self {
        Self::RequestVote(m)
    }
}

impl From<VoteResponse> for RaftMessage {
    fn from(m: VoteResponse) -> Self {
        Self::VoteResponse(m)
    }
}

impl From<AppendEntries> for RaftMessage {
    fn from(m: AppendEntries) -> Self {
        Self::AppendEntries(m)
    }
}

impl From<AppendEntriesResponse> for RaftMessage {
    fn from(m: AppendEntriesResponse) -> Self {
        Self::AppendEntriesResponse(m)
    }
}
