//! Time source for enrollment timestamps.
//!
//! Production code uses [`SystemClock`]; tests pin time with [`FixedClock`].

use crate::types::Timestamp;
use parking_lot::Mutex;
use std::fmt::Debug;

/// A time provider.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward by `micros`.
    pub fn advance(&self, micros: i64) {
        let mut now = self.now.lock();
        *now = Timestamp(now.0 + micros);
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
