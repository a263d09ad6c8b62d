use crate::error::*;
use std::thread;

/// Default number of spin iterations before a waiter parks.
pub const DEFAULT_SPIN_COUNT: u64 = 300_000;

/// Spin budget used when there are more harts than CPUs.
pub const DEFAULT_THROTTLED_SPIN_COUNT: u64 = 1_000;

/// 1 MiB.
pub const DEFAULT_STACK_SIZE: usize = 1 << 20;

pub const MIN_STACK_SIZE: usize = 64 << 10;

/// How a waiter that exhausted its spin budget gets out of the way.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParkMode {
    /// Block the OS thread on the watched address.
    Os,

    /// Suspend the waiting context and give its hart back to the scheduler.
    ///
    /// Only applies to waits issued from inside a context. Plain threads
    /// always park the OS thread.
    Cooperative,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Number of worker threads backing the hart pool.
    pub harts: usize,
    pub spin_count: u64,
    pub throttled_spin_count: u64,
    /// Size of each context stack, in bytes.
    pub stack_size: usize,
    pub park_mode: ParkMode,
    /// Overrides the detected hardware parallelism.
    pub available_cpus: Option<usize>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            harts: detect_cpus(),
            spin_count: DEFAULT_SPIN_COUNT,
            throttled_spin_count: DEFAULT_THROTTLED_SPIN_COUNT,
            stack_size: DEFAULT_STACK_SIZE,
            park_mode: ParkMode::Os,
            available_cpus: None,
        }
    }
}

impl Config {
    pub fn with_harts(mut self, harts: usize) -> Config {
        self.harts = harts;
        self
    }

    pub fn with_spin_count(mut self, spin_count: u64) -> Config {
        self.spin_count = spin_count;
        self
    }

    pub fn with_throttled_spin_count(mut self, throttled_spin_count: u64) -> Config {
        self.throttled_spin_count = throttled_spin_count;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Config {
        self.stack_size = stack_size;
        self
    }

    pub fn with_park_mode(mut self, park_mode: ParkMode) -> Config {
        self.park_mode = park_mode;
        self
    }

    pub fn with_available_cpus(mut self, cpus: usize) -> Config {
        self.available_cpus = Some(cpus);
        self
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.harts == 0 {
            return Err(SchedError::InvalidConfig("harts must be non-zero"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedError::InvalidConfig("stack_size is below 64 KiB"));
        }
        if self.available_cpus == Some(0) {
            return Err(SchedError::InvalidConfig("available_cpus must be non-zero"));
        }
        Ok(())
    }

    /// Whether more harts are managed than the host can run in parallel.
    pub fn oversubscribed(&self) -> bool {
        self.harts > self.available_cpus.unwrap_or_else(detect_cpus)
    }

    /// The spin budget a waiter gets before parking.
    pub fn spin_budget(&self) -> u64 {
        if self.oversubscribed() {
            self.throttled_spin_count
        } else {
            self.spin_count
        }
    }
}

fn detect_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stack_size, 1 << 20);
    }

    #[test]
    fn rejects_zero_harts_and_tiny_stacks() {
        assert_eq!(
            Config::default().with_harts(0).validate(),
            Err(SchedError::InvalidConfig("harts must be non-zero"))
        );
        assert!(Config::default().with_stack_size(4096).validate().is_err());
    }

    #[test]
    fn throttles_when_oversubscribed() {
        let config = Config::default()
            .with_harts(8)
            .with_available_cpus(2)
            .with_spin_count(500)
            .with_throttled_spin_count(7);
        assert!(config.oversubscribed());
        assert_eq!(config.spin_budget(), 7);

        let config = config.with_available_cpus(8);
        assert!(!config.oversubscribed());
        assert_eq!(config.spin_budget(), 500);
    }
}
