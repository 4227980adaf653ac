//! # node
//!
//! why: the raft role state machine; every safety rule (terms, votes, log matching, commit order) lives here
//! relations: owned by cluster.rs, uses log.rs and message.rs, reads election.rs, calls Handler and Timer
//! what: Role, Broadcast seam, Node with the rpc handlers and role transitions

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::election::Election;
use crate::error::{RaftError, Result};
use crate::handler::Handler;
use crate::log::{self, LogEntry, LogIndex};
use crate::message::{AppendEntries, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::timer::Timer;
use crate::NodeId;

/// The three possible roles a node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// Passive - accepts entries from the leader, votes when asked
    #[default]
    Follower,
    /// Requesting votes to become leader
    Candidate,
    /// Accepts commands and drives replication
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Outbound side of a node: everything a role transition may ask its cluster to send.
pub trait Broadcast {
    fn broadcast_vote_request(&mut self, request: VoteRequest);
    fn broadcast_entries(&mut self, request: AppendEntries);
    /// Set every peer's next expected index to `index`
    fn reset_index(&mut self, index: LogIndex);
}

/// A single raft node.
///
/// Not internally synchronized: callers must serialize all operations on
/// one node (inbound rpcs, ticks, replicate cycles).
pub struct Node<H, T> {
    id: NodeId,
    current_term: u64,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: Vec<LogEntry>,
    role: Role,
    last_commit: Option<LogIndex>,
    election_timeout: Option<Instant>,
    handler: H,
    timer: T,
}

impl<H: Handler, T: Timer> Node<H, T> {
    /// Create a follower at term 0 with an empty log and an armed election timer
    pub fn new(id: NodeId, handler: H, mut timer: T) -> Self {
        let election_timeout = Some(timer.next());
        Self {
            id,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            role: Role::Follower,
            last_commit: None,
            election_timeout,
            handler,
            timer,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    /// Last node this one accepted entries from (itself when leading)
    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn last_commit(&self) -> Option<LogIndex> {
        self.last_commit
    }

    pub fn election_timeout(&self) -> Option<Instant> {
        self.election_timeout
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn last_log_index(&self) -> Option<LogIndex> {
        log::last_index(&self.log)
    }

    pub fn last_log_term(&self) -> Option<u64> {
        log::last_term(&self.log)
    }

    // -- rpc handlers --

    /// Handle a candidate's vote request
    pub fn request_vote(&mut self, req: &VoteRequest) -> VoteResponse {
        if req.term < self.current_term {
            debug!(node_id = self.id, term = self.current_term, candidate = req.candidate_id, req_term = req.term, "denied vote: stale term");
            return self.vote(false);
        }

        // step down before looking at the log; the term is adopted even if the vote is denied
        if req.term > self.current_term {
            self.adopt_term(req.term);
            self.become_follower(false);
        }

        if let Some(voted) = self.voted_for {
            if voted != req.candidate_id {
                debug!(node_id = self.id, term = self.current_term, candidate = req.candidate_id, voted_for = voted, "denied vote: already voted");
                return self.vote(false);
            }
        }

        if !self.candidate_log_up_to_date(req) {
            debug!(node_id = self.id, term = self.current_term, candidate = req.candidate_id, "denied vote: candidate log behind");
            return self.vote(false);
        }

        self.election_timeout = Some(self.timer.next());
        self.voted_for = Some(req.candidate_id);
        debug!(node_id = self.id, term = self.current_term, candidate = req.candidate_id, "granted vote");
        self.vote(true)
    }

    /// Handle entries (or a heartbeat) from a leader
    pub fn append_entries(&mut self, req: &AppendEntries) -> AppendEntriesResponse {
        if req.term < self.current_term {
            debug!(node_id = self.id, term = self.current_term, leader = req.leader_id, req_term = req.term, "rejected append: stale leader");
            return AppendEntriesResponse { success: false };
        }

        if req.term > self.current_term {
            self.adopt_term(req.term);
        }
        self.leader_id = Some(req.leader_id);
        self.become_follower(true);

        let keep = match req.prev_log_index {
            None => 0,
            Some(prev) => match log::term_at(&self.log, prev) {
                Some(term) if Some(term) == req.prev_log_term => prev + 1,
                found => {
                    debug!(
                        node_id = self.id,
                        term = self.current_term,
                        prev_log_index = prev,
                        expected = ?req.prev_log_term,
                        found = ?found,
                        "rejected append: log mismatch"
                    );
                    return AppendEntriesResponse { success: false };
                }
            },
        };

        self.log.truncate(keep as usize);
        self.log.extend(req.entries.iter().cloned());
        if !req.entries.is_empty() {
            debug!(node_id = self.id, term = self.current_term, appended = req.entries.len(), log_len = self.log.len(), "appended entries");
        }

        if let Some(commit_index) = req.commit_index {
            self.commit_through(commit_index);
        }

        AppendEntriesResponse { success: true }
    }

    // -- timer and transitions --

    /// Start an election if the deadline has passed. Returns true when a candidacy started.
    pub fn tick(&mut self, out: &mut impl Broadcast) -> bool {
        if self.role == Role::Leader {
            return false;
        }
        match self.election_timeout {
            Some(deadline) if self.timer.now() >= deadline => {
                self.become_candidate(out);
                true
            }
            _ => false,
        }
    }

    pub fn become_candidate(&mut self, out: &mut impl Broadcast) {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.election_timeout = Some(self.timer.next());
        info!(node_id = self.id, term = self.current_term, "became candidate");

        out.broadcast_vote_request(VoteRequest {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        });
    }

    pub fn become_follower(&mut self, reset_timer: bool) {
        if self.role != Role::Follower {
            info!(node_id = self.id, term = self.current_term, from = %self.role, "became follower");
        }
        self.role = Role::Follower;
        if reset_timer {
            self.election_timeout = Some(self.timer.next());
        }
    }

    pub fn become_leader(&mut self, out: &mut impl Broadcast) {
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        info!(node_id = self.id, term = self.current_term, log_len = self.log.len(), "became leader");

        out.reset_index(self.log.len() as LogIndex);
        out.broadcast_entries(self.heartbeat(None));
    }

    /// React to the current state of an election round
    pub fn election_update(&mut self, election: &Election, out: &mut impl Broadcast) {
        if let Some(highest) = election.highest_term() {
            if highest > self.current_term {
                self.adopt_term(highest);
                self.become_follower(true);
                return;
            }
        }
        if election.won() && self.role == Role::Candidate {
            self.become_leader(out);
        }
    }

    // -- leader operations --

    /// Append a command and broadcast it. Callers must only invoke this on a leader.
    pub fn accept_command(&mut self, command: impl Into<Vec<u8>>, out: &mut impl Broadcast) -> LogIndex {
        let prev_log_index = self.last_log_index();
        let prev_log_term = self.last_log_term();
        let entry = LogEntry::new(self.current_term, command);
        self.log.push(entry.clone());
        let index = self.log.len() as LogIndex - 1;
        debug!(node_id = self.id, term = self.current_term, index, "accepted command");

        out.broadcast_entries(AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            entries: vec![entry],
            commit_index: None,
        });
        index
    }

    /// Commit through `index` once a majority stores it, then tell the followers
    pub fn majority_accepted(&mut self, index: LogIndex, out: &mut impl Broadcast) -> Result<()> {
        if index >= self.log.len() as LogIndex {
            return Err(RaftError::IndexOutOfRange {
                index,
                len: self.log.len(),
            });
        }
        self.commit_through(index);
        out.broadcast_entries(self.heartbeat(Some(index)));
        Ok(())
    }

    /// Empty append anchored at the last local entry
    pub fn heartbeat(&self, commit_index: Option<LogIndex>) -> AppendEntries {
        AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index: self.last_log_index(),
            prev_log_term: self.last_log_term(),
            entries: Vec::new(),
            commit_index,
        }
    }

    // -- internals --

    fn vote(&self, vote_granted: bool) -> VoteResponse {
        VoteResponse {
            term: self.current_term,
            vote_granted,
        }
    }

    /// Move to a strictly higher term; the vote and known leader belong to the old one
    fn adopt_term(&mut self, term: u64) {
        debug_assert!(term > self.current_term);
        debug!(node_id = self.id, from = self.current_term, to = term, "adopting higher term");
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
    }

    /// Denied when our last term is newer or our log is longer; a nil position sorts lowest
    fn candidate_log_up_to_date(&self, req: &VoteRequest) -> bool {
        if self.log.is_empty() {
            return true;
        }
        !(self.last_log_term() > req.last_log_term || self.last_log_index() > req.last_log_index)
    }

    /// Apply every unapplied entry up to `index` (clamped to the log) in order
    fn commit_through(&mut self, index: LogIndex) {
        let Some(last) = self.last_log_index() else {
            return;
        };
        let target = index.min(last);
        let start = self.last_commit.map_or(0, |c| c + 1);
        if start > target {
            return;
        }
        for i in start..=target {
            self.handler.apply(i, self.log[i as usize].command());
        }
        self.last_commit = Some(target);
        debug!(node_id = self.id, term = self.current_term, from = start, through = target, "committed entries");
    }
}

impl<H, T> fmt::Debug for Node<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("current_term", &self.current_term)
            .field("voted_for", &self.voted_for)
            .field("role", &self.role)
            .field("log_len", &self.log.len())
            .field("last_commit", &self.last_commit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedTimer(Instant);

    impl Timer for FixedTimer {
        fn next(&mut self) -> Instant {
            self.0 + Duration::from_secs(3600)
        }
    }

    #[derive(Default)]
    struct Sink {
        votes: Vec<VoteRequest>,
        entries: Vec<AppendEntries>,
        resets: Vec<LogIndex>,
    }

    impl Broadcast for Sink {
        fn broadcast_vote_request(&mut self, request: VoteRequest) {
            self.votes.push(request);
        }
        fn broadcast_entries(&mut self, request: AppendEntries) {
            self.entries.push(request);
        }
        fn reset_index(&mut self, index: LogIndex) {
            self.resets.push(index);
        }
    }

    fn node() -> Node<Vec<Vec<u8>>, FixedTimer> {
        Node::new(1, Vec::new(), FixedTimer(Instant::now()))
    }

    #[test]
    fn new_node_starts_as_follower() {
        let node = node();
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), 0);
        assert_eq!(node.voted_for(), None);
        assert!(node.log().is_empty());
        assert_eq!(node.last_commit(), None);
        assert!(node.election_timeout().is_some());
    }

    #[test]
    fn candidate_votes_for_itself() {
        let mut node = node();
        let mut sink = Sink::default();
        node.become_candidate(&mut sink);
        assert_eq!(node.voted_for(), Some(1));
        assert_eq!(sink.votes.len(), 1);
        assert_eq!(sink.votes[0].last_log_index, None);
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Leader.to_string(), "leader");
        assert_eq!(Role::default(), Role::Follower);
    }
}
