//! # driver
//!
//! why: play the role of the runtime around each node: clock ticks, rpc delivery, vote routing, commit decisions
//! relations: owns consensus-core Clusters wired to network.rs and clock.rs
//! what: SimCluster

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use consensus_core::{
    Cluster, Election, LogIndex, NodeId, RaftConfig, RaftError, RaftMessage, Request, Response,
    Result, Role, VoteResponse,
};
use tracing::{debug, info, warn};

use crate::clock::{ManualClock, SimTimer};
use crate::network::{Envelope, SimNetwork, SimTransmitter};

pub type SimNode = Cluster<Vec<Vec<u8>>, SimTimer, SimTransmitter>;

/// Upper bound on delivery rounds per step, so a livelock fails loudly instead of hanging
const MAX_ROUNDS: usize = 64;

/// An election a candidate is running, tagged with the term it was started in
struct Round {
    term: u64,
    election: Election,
}

/// A whole cluster of simulated nodes advanced one millisecond at a time.
///
/// Every node is only ever touched from the driver, which serializes ticks,
/// deliveries and replicate cycles per node.
pub struct SimCluster {
    clock: ManualClock,
    network: SimNetwork,
    config: RaftConfig,
    nodes: BTreeMap<NodeId, SimNode>,
    rounds: BTreeMap<NodeId, Round>,
    next_heartbeat: Instant,
}

impl SimCluster {
    /// Nodes `0..size`; `seed` fixes every election timeout
    pub fn new(size: u64, config: RaftConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        if size == 0 {
            return Err(RaftError::InvalidConfig("cluster needs at least one node".into()));
        }

        let clock = ManualClock::new();
        let network = SimNetwork::new();
        let nodes = (0..size)
            .map(|id| {
                let timer = SimTimer::new(clock.clone(), &config, seed.wrapping_add(id));
                let cluster = Cluster::new(id, network.transmitter(id), Vec::new(), timer, 0..size);
                (id, cluster)
            })
            .collect();

        Ok(Self {
            next_heartbeat: clock.now(),
            clock,
            network,
            config,
            nodes,
            rounds: BTreeMap::new(),
        })
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    /// Commands applied so far on `id`
    pub fn applied(&self, id: NodeId) -> Vec<Vec<u8>> {
        self.nodes
            .get(&id)
            .map(|c| c.node().handler().clone())
            .unwrap_or_default()
    }

    /// Every node that currently believes it leads, with its term
    pub fn leaders(&self) -> Vec<(NodeId, u64)> {
        self.nodes
            .values()
            .filter(|c| c.node().role() == Role::Leader)
            .map(|c| (c.node().id(), c.node().current_term()))
            .collect()
    }

    /// The leader of the highest term, if any node leads
    pub fn leader(&self) -> Option<NodeId> {
        self.leaders()
            .into_iter()
            .max_by_key(|&(_, term)| term)
            .map(|(id, _)| id)
    }

    pub fn isolate(&self, id: NodeId) {
        info!(node_id = id, "isolating node");
        self.network.isolate(id);
    }

    pub fn heal(&self, id: NodeId) {
        info!(node_id = id, "healing node");
        self.network.heal(id);
    }

    /// Hand a command to the current leader
    pub fn submit(&mut self, command: impl Into<Vec<u8>>) -> Result<(NodeId, LogIndex)> {
        let leader = self
            .leader()
            .ok_or(RaftError::NotLeader { leader_hint: None })?;
        let index = self.submit_to(leader, command)?;
        Ok((leader, index))
    }

    /// Hand a command to a specific node, which must think it leads
    pub fn submit_to(&mut self, id: NodeId, command: impl Into<Vec<u8>>) -> Result<LogIndex> {
        let cluster = self
            .nodes
            .get_mut(&id)
            .ok_or(RaftError::NotLeader { leader_hint: None })?;
        let index = cluster.accept_command(command)?;
        self.deliver_all();
        Ok(index)
    }

    /// Run `by` worth of virtual time in 1ms steps
    pub fn advance(&mut self, by: Duration) {
        let steps = by.as_millis();
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until some node leads or `limit` passes
    pub fn run_until_leader(&mut self, limit: Duration) -> Option<NodeId> {
        let deadline = self.clock.now() + limit;
        while self.clock.now() < deadline {
            if let Some(leader) = self.leader() {
                return Some(leader);
            }
            self.step();
        }
        self.leader()
    }

    /// One millisecond: ticks, a replicate cycle when due, then delivery until quiet
    pub fn step(&mut self) {
        self.clock.advance(Duration::from_millis(1));

        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            let Some(cluster) = self.nodes.get_mut(&id) else {
                continue;
            };
            if let Some(election) = cluster.tick() {
                let term = cluster.node().current_term();
                if election.over() {
                    cluster.election_update(&election);
                } else {
                    self.rounds.insert(id, Round { term, election });
                }
            }
        }

        if self.clock.now() >= self.next_heartbeat {
            self.next_heartbeat = self.clock.now() + Duration::from_millis(self.config.heartbeat_interval);
            for cluster in self.nodes.values_mut() {
                if cluster.node().is_leader() {
                    cluster.replicate();
                    if let Err(error) = cluster.heartbeat() {
                        warn!(node_id = cluster.node().id(), %error, "heartbeat failed");
                    }
                }
            }
        }

        self.deliver_all();
    }

    /// Deliver queued messages and commit whatever a majority holds, until nothing moves
    pub fn deliver_all(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let mut resync = BTreeSet::new();
            let mut delivered = false;
            while let Some(envelope) = self.network.pop() {
                delivered = true;
                self.deliver(envelope, &mut resync);
            }

            // no decrement on rejection: a leader whose replicate was refused resends everything
            for id in resync {
                if let Some(cluster) = self.nodes.get_mut(&id) {
                    debug!(node_id = id, "resetting replication progress after rejection");
                    cluster.reset_index(0);
                }
            }

            let committed = self.commit_ready();
            if !delivered && !committed && self.network.pending() == 0 {
                return;
            }
        }
        warn!(pending = self.network.pending(), "delivery did not settle");
    }

    fn deliver(&mut self, envelope: Envelope, resync: &mut BTreeSet<NodeId>) {
        let Envelope {
            from,
            to,
            payload,
            on_response,
        } = envelope;

        let request = match RaftMessage::decode(&payload).map(Request::try_from) {
            Ok(Ok(request)) => request,
            Ok(Err(other)) => {
                warn!(from, to, ?other, "unexpected message on request path");
                return;
            }
            Err(error) => {
                warn!(from, to, %error, "undecodable request");
                return;
            }
        };
        let Some(target) = self.nodes.get_mut(&to) else {
            return;
        };

        let (response, vote_term) = match &request {
            Request::RequestVote(req) => (Response::Vote(target.request_vote(req)), Some(req.term)),
            Request::AppendEntries(req) => (Response::Append(target.append_entries(req)), None),
        };
        let Some(response) = round_trip(response) else {
            return;
        };

        if let Some(on_response) = on_response {
            if let Response::Append(reply) = response {
                if !reply.success {
                    resync.insert(from);
                }
            }
            on_response(response);
            return;
        }

        if let (Response::Vote(vote), Some(term)) = (response, vote_term) {
            self.route_vote(from, to, term, vote);
        }
    }

    /// Feed a vote reply into the candidate's round for the term it asked in
    fn route_vote(&mut self, candidate: NodeId, voter: NodeId, term: u64, vote: VoteResponse) {
        let Some(round) = self.rounds.get_mut(&candidate) else {
            return;
        };
        if round.term != term {
            return;
        }
        round.election.receive_vote(voter, vote);
        if !round.election.over() {
            return;
        }
        if let Some(Round { election, .. }) = self.rounds.remove(&candidate) {
            if let Some(cluster) = self.nodes.get_mut(&candidate) {
                cluster.election_update(&election);
                if cluster.node().is_leader() {
                    info!(node_id = candidate, term, votes = election.granted_votes(), "won election");
                }
            }
        }
    }

    /// Let every leader commit what a majority stores; true if anything committed
    fn commit_ready(&mut self) -> bool {
        let mut committed = false;
        for cluster in self.nodes.values_mut() {
            let Some(index) = cluster.committable_index() else {
                continue;
            };
            match cluster.majority_accepted(index) {
                Ok(()) => committed = true,
                Err(error) => warn!(node_id = cluster.node().id(), index, %error, "commit failed"),
            }
        }
        committed
    }
}

/// Send a reply through the wire codec like a real transport would
fn round_trip(response: Response) -> Option<Response> {
    let decoded = RaftMessage::from(response)
        .encode()
        .and_then(|bytes| RaftMessage::decode(&bytes));
    match decoded.map(Response::try_from) {
        Ok(Ok(response)) => Some(response),
        Ok(Err(other)) => {
            warn!(?other, "unexpected message on response path");
            None
        }
        Err(error) => {
            warn!(%error, "undecodable response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_config() {
        let config = RaftConfig {
            election_timeout_min: 0,
            ..RaftConfig::default()
        };
        assert!(SimCluster::new(3, config, 1).is_err());
        assert!(SimCluster::new(0, RaftConfig::default(), 1).is_err());
    }

    #[test]
    fn no_leader_before_first_timeout() {
        let mut sim = SimCluster::new(3, RaftConfig::default(), 1).unwrap();
        sim.advance(Duration::from_millis(100));
        assert!(sim.leader().is_none());
        assert!(matches!(
            sim.submit("x"),
            Err(RaftError::NotLeader { leader_hint: None })
        ));
    }
}
