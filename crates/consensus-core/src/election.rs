//! # election
//!
//! why: tally one candidacy's vote responses and detect quorum
//! relations: created by cluster.rs per candidacy, fed by the integrating caller, read by node.rs
//! what: Election, majority arithmetic

use std::collections::BTreeMap;

use crate::message::VoteResponse;
use crate::NodeId;

/// Smallest number of voters that forms a majority of `total_voters`
pub fn majority_of(total_voters: usize) -> usize {
    total_voters / 2 + 1
}

/// Vote tally for a single election round.
///
/// Each voter contributes at most one response per round; the first one
/// recorded wins and later ones are ignored.
#[derive(Debug, Clone)]
pub struct Election {
    total_voters: usize,
    majority: usize,
    votes: BTreeMap<NodeId, VoteResponse>,
}

impl Election {
    pub fn new(total_voters: usize) -> Self {
        Self {
            total_voters,
            majority: majority_of(total_voters),
            votes: BTreeMap::new(),
        }
    }

    pub fn total_voters(&self) -> usize {
        self.total_voters
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    /// Record `response` from `voter` unless one is already recorded
    pub fn receive_vote(&mut self, voter: NodeId, response: VoteResponse) {
        self.votes.entry(voter).or_insert(response);
    }

    /// Number of distinct voters heard from
    pub fn votes(&self) -> usize {
        self.votes.len()
    }

    pub fn granted_votes(&self) -> usize {
        self.votes.values().filter(|v| v.vote_granted).count()
    }

    /// Enough responses are in to decide, win or lose
    pub fn over(&self) -> bool {
        self.votes() >= self.majority
    }

    pub fn won(&self) -> bool {
        self.granted_votes() >= self.majority
    }

    /// Highest term seen in any response, `None` before the first one
    pub fn highest_term(&self) -> Option<u64> {
        self.votes.values().map(|v| v.term).max()
    }
}
