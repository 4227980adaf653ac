//! # handler
//!
//! why: committed commands leave the consensus core through one narrow seam
//! relations: called by node.rs whenever the commit point advances
//! what: Handler trait, Vec-backed recording impl

use crate::log::LogIndex;

/// Receives each committed command exactly once, in ascending index order.
pub trait Handler {
    fn apply(&mut self, index: LogIndex, command: &[u8]);
}

impl Handler for Vec<Vec<u8>> {
    fn apply(&mut self, _index: LogIndex, command: &[u8]) {
        self.push(command.to_vec());
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn apply(&mut self, index: LogIndex, command: &[u8]) {
        (**self).apply(index, command)
    }
}
