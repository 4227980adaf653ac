//! # log
//!
//! why: hold the commands that raft replicates, tagged with the term that created them
//! relations: appended by node.rs, sliced by cluster.rs for replication, carried in message.rs
//! what: LogEntry, positional index helpers for a `[LogEntry]` log

use serde::{Deserialize, Serialize};

/// Positional index into a node's log (0-based).
pub type LogIndex = u64;

/// A single entry in the replicated log.
///
/// Entries are immutable once created; an entry is identified by its
/// position in the log rather than by a stored index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    term: u64,
    command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, command: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            command: command.into(),
        }
    }

    /// The term in which a leader accepted this entry
    pub fn term(&self) -> u64 {
        self.term
    }

    /// The opaque command handed to the state machine on commit
    pub fn command(&self) -> &[u8] {
        &self.command
    }
}

/// Index of the last entry, `None` for an empty log
pub(crate) fn last_index(log: &[LogEntry]) -> Option<LogIndex> {
    log.len().checked_sub(1).map(|i| i as LogIndex)
}

/// Term of the last entry, `None` for an empty log
pub(crate) fn last_term(log: &[LogEntry]) -> Option<u64> {
    log.last().map(LogEntry::term)
}

/// Term of the entry at `index`, `None` when out of bounds
pub(crate) fn term_at(log: &[LogEntry], index: LogIndex) -> Option<u64> {
    usize::try_from(index)
        .ok()
        .and_then(|i| log.get(i))
        .map(LogEntry::term)
}
