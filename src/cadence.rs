use std::num::NonZeroUsize;

use crate::config::RunConfig;

/// A fixed "every N steps" trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    every: NonZeroUsize,
}

impl Cadence {
    pub fn new(every: NonZeroUsize) -> Self {
        Self { every }
    }

    pub fn every(&self) -> usize {
        self.every.get()
    }

    /// Returns true if `step` lands on this cadence.
    #[inline]
    pub fn fires(&self, step: u64) -> bool {
        step % self.every.get() as u64 == 0
    }
}

/// Which actions a step triggers. Flags are independent of one another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fired {
    pub print: bool,
    pub checkpoint: bool,
    pub sample: bool,
}

/// The three cadences driven by the step counter.
#[derive(Debug, Clone, Copy)]
pub struct Cadences {
    pub print: Cadence,
    pub checkpoint: Cadence,
    pub sample: Cadence,
}

impl Cadences {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            print: Cadence::new(config.print_every_n_steps),
            checkpoint: Cadence::new(config.save_interval),
            sample: Cadence::new(config.sample_interval),
        }
    }

    /// Evaluates every cadence against the same `step`.
    pub fn evaluate(&self, step: u64) -> Fired {
        Fired {
            print: self.print.fires(step),
            checkpoint: self.checkpoint.fires(step),
            sample: self.sample.fires(step),
        }
    }
}
