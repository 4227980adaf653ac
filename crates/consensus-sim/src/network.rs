//! # network
//!
//! why: stand in for the wire between simulated nodes, including loss by partition
//! relations: SimTransmitter is the Transmitter each simulated Cluster sends through; driver.rs delivers
//! what: Envelope queue, isolation set, codec round-trip of every request

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use consensus_core::{NodeId, RaftMessage, Request, ResponseCallback, Transmitter};
use tracing::{trace, warn};

/// A request in flight, already encoded for the wire
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub payload: Vec<u8>,
    pub on_response: Option<ResponseCallback>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("bytes", &self.payload.len())
            .field("has_callback", &self.on_response.is_some())
            .finish()
    }
}

#[derive(Default)]
struct NetworkState {
    queue: VecDeque<Envelope>,
    isolated: BTreeSet<NodeId>,
    sent: u64,
    dropped: u64,
}

/// FIFO network shared by every simulated node
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transmitter(&self, from: NodeId) -> SimTransmitter {
        SimTransmitter {
            from,
            network: self.clone(),
        }
    }

    /// Drop all traffic to and from `id` until healed
    pub fn isolate(&self, id: NodeId) {
        self.state.borrow_mut().isolated.insert(id);
    }

    pub fn heal(&self, id: NodeId) {
        self.state.borrow_mut().isolated.remove(&id);
    }

    pub fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let state = self.state.borrow();
        !state.isolated.contains(&from) && !state.isolated.contains(&to)
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn sent(&self) -> u64 {
        self.state.borrow().sent
    }

    pub fn dropped(&self) -> u64 {
        self.state.borrow().dropped
    }

    pub(crate) fn push(&self, envelope: Envelope) {
        let mut state = self.state.borrow_mut();
        state.sent += 1;
        state.queue.push_back(envelope);
    }

    /// Next deliverable envelope; unreachable ones are discarded on the way
    pub(crate) fn pop(&self) -> Option<Envelope> {
        loop {
            let envelope = self.state.borrow_mut().queue.pop_front()?;
            if self.can_reach(envelope.from, envelope.to) {
                return Some(envelope);
            }
            trace!(from = envelope.from, to = envelope.to, "dropping message across partition");
            self.state.borrow_mut().dropped += 1;
        }
    }
}

/// Per-node handle onto a [`SimNetwork`]
pub struct SimTransmitter {
    from: NodeId,
    network: SimNetwork,
}

impl Transmitter for SimTransmitter {
    fn send(&mut self, peer: NodeId, request: Request, on_response: Option<ResponseCallback>) {
        let kind = request.message_type();
        match RaftMessage::from(request).encode() {
            Ok(payload) => {
                trace!(from = self.from, to = peer, %kind, "queued");
                self.network.push(Envelope {
                    from: self.from,
                    to: peer,
                    payload,
                    on_response,
                });
            }
            Err(error) => warn!(from = self.from, to = peer, %kind, %error, "failed to encode request"),
        }
    }
}
