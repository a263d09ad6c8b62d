use super::Parker;
use crate::context;
use core::sync::atomic::{AtomicU32, Ordering};

/// A condition variable that parks without spinning.
///
/// Waiters inside a context block cooperatively, giving their hart back.
/// Plain threads park the OS thread. There is no associated mutex: the
/// caller re-evaluates its condition under its own lock, and the sequence
/// number read before that evaluation catches any notify in between.
pub struct Condvar {
    seq: AtomicU32,
}

impl Condvar {
    pub const fn new() -> Condvar {
        Condvar {
            seq: AtomicU32::new(0),
        }
    }

    /// Blocks while `condition` returns true.
    pub fn wait_while<F: FnMut() -> bool>(&self, parker: &Parker, mut condition: F) {
        loop {
            let seq = self.seq.load(Ordering::Acquire);
            if !condition() {
                return;
            }
            parker.park(&self.seq, seq, context::in_context());
        }
    }

    pub fn notify_all(&self, parker: &Parker) {
        self.seq.fetch_add(1, Ordering::Release);
        parker.wake(&self.seq);
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}
