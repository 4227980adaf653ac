//! # cluster
//!
//! why: leader-side replication; knows the peers and how far each one has caught up
//! relations: owns one node.rs Node, implements its Broadcast seam, sends through transport.rs
//! what: Peers (next_index tracking + fan-out), Cluster (replicate, elections, forwarding entry points)

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::election::{majority_of, Election};
use crate::error::{RaftError, Result};
use crate::handler::Handler;
use crate::log::{self, LogEntry, LogIndex};
use crate::message::{AppendEntries, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::node::{Broadcast, Node};
use crate::timer::Timer;
use crate::transport::{Request, Response, ResponseCallback, Transmitter};
use crate::NodeId;

/// Per-peer replication progress, shared with in-flight completion callbacks
#[derive(Debug, Default)]
struct Progress {
    /// bumped by every reset so replies to older sends are dropped
    epoch: u64,
    next_index: BTreeMap<NodeId, LogIndex>,
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The remote members of a cluster and the transmitter that reaches them
pub struct Peers<X> {
    ids: Vec<NodeId>,
    progress: Arc<Mutex<Progress>>,
    transmitter: X,
}

impl<X: Transmitter> Peers<X> {
    fn new(ids: Vec<NodeId>, transmitter: X) -> Self {
        let next_index = ids.iter().map(|&id| (id, 0)).collect();
        Self {
            ids,
            progress: Arc::new(Mutex::new(Progress {
                epoch: 0,
                next_index,
            })),
            transmitter,
        }
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn next_index(&self, peer: NodeId) -> Option<LogIndex> {
        lock(&self.progress).next_index.get(&peer).copied()
    }

    fn snapshot(&self) -> (u64, BTreeMap<NodeId, LogIndex>) {
        let progress = lock(&self.progress);
        (progress.epoch, progress.next_index.clone())
    }
}

impl<X: Transmitter> Broadcast for Peers<X> {
    fn broadcast_vote_request(&mut self, request: VoteRequest) {
        for &peer in &self.ids {
            trace!(peer, term = request.term, "sending request_vote");
            self.transmitter
                .send(peer, Request::RequestVote(request.clone()), None);
        }
    }

    fn broadcast_entries(&mut self, request: AppendEntries) {
        for &peer in &self.ids {
            trace!(peer, term = request.term, entries = request.entries.len(), "sending append_entries");
            self.transmitter
                .send(peer, Request::AppendEntries(request.clone()), None);
        }
    }

    fn reset_index(&mut self, index: LogIndex) {
        let mut progress = lock(&self.progress);
        progress.epoch += 1;
        for next in progress.next_index.values_mut() {
            *next = index;
        }
    }
}

/// One local node plus everything it needs to talk to its peers.
pub struct Cluster<H, T, X> {
    node: Node<H, T>,
    peers: Peers<X>,
}

impl<H: Handler, T: Timer, X: Transmitter> Cluster<H, T, X> {
    /// `peers` may include `id`; the local node is never its own peer
    pub fn new(
        id: NodeId,
        transmitter: X,
        handler: H,
        timer: T,
        peers: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        let ids: BTreeSet<NodeId> = peers.into_iter().filter(|&p| p != id).collect();
        Self {
            node: Node::new(id, handler, timer),
            peers: Peers::new(ids.into_iter().collect(), transmitter),
        }
    }

    pub fn node(&self) -> &Node<H, T> {
        &self.node
    }

    pub fn peers(&self) -> &Peers<X> {
        &self.peers
    }

    pub fn next_index(&self, peer: NodeId) -> Option<LogIndex> {
        self.peers.next_index(peer)
    }

    /// Voters in this cluster, the local node included
    pub fn total_voters(&self) -> usize {
        self.peers.len() + 1
    }

    // -- replication --

    /// Send every lagging peer the log suffix it is missing.
    ///
    /// Peers that are caught up get nothing. A successful reply moves the
    /// peer's next index past the last entry sent; a failure leaves it for
    /// the next cycle.
    pub fn replicate(&mut self) {
        if !self.node.is_leader() {
            debug!(node_id = self.node.id(), role = %self.node.role(), "skipping replicate: not leader");
            return;
        }

        let log = self.node.log();
        let log_len = log.len() as LogIndex;
        let (epoch, next_indices) = self.peers.snapshot();

        for (peer, next) in next_indices {
            if next >= log_len {
                continue;
            }
            let prev_log_index = next.checked_sub(1);
            let prev_log_term = prev_log_index.and_then(|i| log::term_at(log, i));
            let entries: Vec<LogEntry> = log[next as usize..].to_vec();
            let sent_through = next + entries.len() as LogIndex;

            let request = AppendEntries {
                term: self.node.current_term(),
                leader_id: self.node.id(),
                prev_log_index,
                prev_log_term,
                entries,
                commit_index: None,
            };
            trace!(peer, next, sent_through, "replicating");

            let progress = Arc::clone(&self.peers.progress);
            let on_response: ResponseCallback = Box::new(move |response: Response| {
                let Response::Append(AppendEntriesResponse { success: true }) = response else {
                    debug!(peer, next, "replication rejected");
                    return;
                };
                let mut progress = lock(&progress);
                if progress.epoch != epoch {
                    return;
                }
                if let Some(current) = progress.next_index.get_mut(&peer) {
                    if sent_through > *current {
                        *current = sent_through;
                        debug!(peer, next_index = sent_through, "replication progressed");
                    }
                }
            });

            self.peers
                .transmitter
                .send(peer, Request::AppendEntries(request), Some(on_response));
        }
    }

    /// Set every peer's next index to `index`
    pub fn reset_index(&mut self, index: LogIndex) {
        self.peers.reset_index(index);
    }

    pub fn broadcast_vote_request(&mut self, request: VoteRequest) {
        self.peers.broadcast_vote_request(request);
    }

    pub fn broadcast_entries(&mut self, request: AppendEntries) {
        self.peers.broadcast_entries(request);
    }

    /// Highest current-term index stored on a majority (the leader counts itself)
    pub fn committable_index(&self) -> Option<LogIndex> {
        if !self.node.is_leader() {
            return None;
        }
        let log = self.node.log();
        let last = self.node.last_log_index()?;
        let first = self.node.last_commit().map_or(0, |c| c + 1);
        if first > last {
            return None;
        }

        let (_, next_indices) = self.peers.snapshot();
        let majority = majority_of(self.total_voters());
        let term = self.node.current_term();

        (first..=last).rev().find(|&i| {
            let stored = 1 + next_indices.values().filter(|&&next| next > i).count();
            log[i as usize].term() == term && stored >= majority
        })
    }

    // -- elections --

    /// Fresh tally for the node's current candidacy, holding its own vote
    pub fn new_election(&self) -> Election {
        let mut election = Election::new(self.total_voters());
        if self.node.voted_for() == Some(self.node.id()) {
            election.receive_vote(
                self.node.id(),
                VoteResponse {
                    term: self.node.current_term(),
                    vote_granted: true,
                },
            );
        }
        election
    }

    /// Drive the election timer; returns the new round when a candidacy started
    pub fn tick(&mut self) -> Option<Election> {
        self.node
            .tick(&mut self.peers)
            .then(|| self.new_election())
    }

    pub fn become_candidate(&mut self) -> Election {
        self.node.become_candidate(&mut self.peers);
        self.new_election()
    }

    pub fn become_follower(&mut self, reset_timer: bool) {
        self.node.become_follower(reset_timer);
    }

    pub fn become_leader(&mut self) {
        self.node.become_leader(&mut self.peers);
    }

    pub fn election_update(&mut self, election: &Election) {
        self.node.election_update(election, &mut self.peers);
    }

    // -- inbound rpcs --

    pub fn request_vote(&mut self, request: &VoteRequest) -> VoteResponse {
        self.node.request_vote(request)
    }

    pub fn append_entries(&mut self, request: &AppendEntries) -> AppendEntriesResponse {
        self.node.append_entries(request)
    }

    // -- leader surface --

    /// Append a client command; fails on any node that is not the leader
    pub fn accept_command(&mut self, command: impl Into<Vec<u8>>) -> Result<LogIndex> {
        self.ensure_leader()?;
        Ok(self.node.accept_command(command, &mut self.peers))
    }

    pub fn majority_accepted(&mut self, index: LogIndex) -> Result<()> {
        self.ensure_leader()?;
        self.node.majority_accepted(index, &mut self.peers)
    }

    /// Assert leadership and republish the commit point to every peer
    pub fn heartbeat(&mut self) -> Result<()> {
        self.ensure_leader()?;
        let heartbeat = self.node.heartbeat(self.node.last_commit());
        self.peers.broadcast_entries(heartbeat);
        Ok(())
    }

    fn ensure_leader(&self) -> Result<()> {
        if self.node.is_leader() {
            Ok(())
        } else {
            Err(RaftError::NotLeader {
                leader_hint: self.node.leader_id(),
            })
        }
    }
}
