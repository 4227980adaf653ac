//! # timer
//!
//! why: election deadlines come from outside the state machine so they can be randomized or faked
//! relations: queried by node.rs whenever a fresh election timeout is needed
//! what: Timer trait, RandomTimer backed by RaftConfig

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RaftConfig;

/// Source of election deadlines.
///
/// `next()` must return a deadline strictly after `now()`. Deadlines are
/// never cancelled; installing a newer one supersedes the old.
pub trait Timer {
    fn next(&mut self) -> Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Timer + ?Sized> Timer for Box<T> {
    fn next(&mut self) -> Instant {
        (**self).next()
    }

    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Wall-clock timer with a uniformly random timeout in the configured range
#[derive(Debug, Clone)]
pub struct RandomTimer {
    min_ms: u64,
    max_ms: u64,
}

impl RandomTimer {
    pub fn new(config: &RaftConfig) -> Self {
        Self {
            min_ms: config.election_timeout_min.max(1),
            max_ms: config.election_timeout_max.max(config.election_timeout_min.max(1)),
        }
    }

    /// Draw a timeout in `[min, max]` milliseconds
    pub fn random_timeout(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

impl Timer for RandomTimer {
    fn next(&mut self) -> Instant {
        Instant::now() + self.random_timeout()
    }
}
