//! # consensus-sim
//!
//! why: run many consensus-core nodes in one process, deterministically, with a lossy network
//! relations: the integrating caller consensus-core expects; used by the scenario tests
//! what: manual clock, seeded timers, simulated network with partitions, cluster driver

pub mod clock;
pub mod driver;
pub mod network;

pub use clock::{ManualClock, SimTimer};
pub use driver::{SimCluster, SimNode};
pub use network::{Envelope, SimNetwork, SimTransmitter};
