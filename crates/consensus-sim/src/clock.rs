//! # clock
//!
//! why: simulated nodes need a shared, manually advanced notion of time
//! relations: SimTimer is the Timer of every node driver.rs builds
//! what: ManualClock, seeded SimTimer

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use consensus_core::{RaftConfig, Timer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shared virtual clock; clones observe the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn now(&self) -> Instant {
        self.now.get()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Randomized election deadlines on a [`ManualClock`], reproducible from a seed
#[derive(Debug)]
pub struct SimTimer {
    clock: ManualClock,
    rng: StdRng,
    min_ms: u64,
    max_ms: u64,
}

impl SimTimer {
    pub fn new(clock: ManualClock, config: &RaftConfig, seed: u64) -> Self {
        Self {
            clock,
            rng: StdRng::seed_from_u64(seed),
            min_ms: config.election_timeout_min,
            max_ms: config.election_timeout_max,
        }
    }
}

impl Timer for SimTimer {
    fn next(&mut self) -> Instant {
        let ms = self.rng.gen_range(self.min_ms..=self.max_ms);
        self.clock.now() + Duration::from_millis(ms)
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}
