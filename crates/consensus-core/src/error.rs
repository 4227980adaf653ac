//! # error
//!
//! why: one error type for the caller-facing failures of the consensus core
//! relations: returned by cluster.rs, node.rs, config.rs and the message codec
//! what: RaftError, Result alias
//!
//! protocol rejections (stale term, denied vote, log mismatch) are not errors;
//! they come back as ordinary `vote_granted` / `success` values.

use thiserror::Error;

use crate::NodeId;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("node is not the leader (last known leader: {leader_hint:?})")]
    NotLeader { leader_hint: Option<NodeId> },

    #[error("log index {index} out of range for log of length {len}")]
    IndexOutOfRange { index: u64, len: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RaftError>;
