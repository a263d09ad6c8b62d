//! Spin-then-park waiting on a 32-bit word.

use super::waitqueue::{WaitQueue, Watched};
use crate::config::{Config, ParkMode};
use crate::context;
use crate::tls::TlsHooks;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};
use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::Arc;

/// Waits on memory words for one scheduler tree.
///
/// Writers must call [`Parker::wake`] after changing a watched word.
pub struct Parker {
    spins: u64,
    mode: ParkMode,
    blocked: Arc<WaitQueue>,
    tls: Arc<dyn TlsHooks>,
}

impl Parker {
    pub fn new(config: &Config, tls: Arc<dyn TlsHooks>) -> Parker {
        Parker {
            spins: config.spin_budget(),
            mode: config.park_mode,
            blocked: Arc::new(WaitQueue::new()),
            tls,
        }
    }

    /// Spin iterations a waiter gets before it parks.
    pub fn spin_budget(&self) -> u64 {
        self.spins
    }

    pub fn mode(&self) -> ParkMode {
        self.mode
    }

    /// Contexts currently parked on the blocked list.
    pub fn blocked(&self) -> usize {
        self.blocked.len()
    }

    /// Returns once `word` no longer holds `expected`.
    pub fn wait(&self, word: &AtomicU32, expected: u32) {
        if spin_until_changed(word, expected, self.spins) {
            return;
        }
        let cooperative = self.mode == ParkMode::Cooperative && context::in_context();
        self.park(word, expected, cooperative);
    }

    /// Wakes everything waiting on `word`: parked OS threads are unparked,
    /// parked contexts whose word moved are unblocked.
    ///
    /// Returns the number of waiters released.
    pub fn wake(&self, word: &AtomicU32) -> usize {
        let addr = Watched::new(word).addr();
        let threads = unsafe { parking_lot_core::unpark_all(addr, DEFAULT_UNPARK_TOKEN) };
        threads + self.blocked.wake(addr)
    }

    /// Re-examines every parked context and unblocks the ones whose word moved.
    pub fn poll(&self) -> usize {
        self.blocked.poll()
    }

    /// Parks without spinning first.
    pub(crate) fn park(&self, word: &AtomicU32, expected: u32, cooperative: bool) {
        while word.load(Ordering::Acquire) == expected {
            if cooperative {
                self.park_context(word, expected);
            } else {
                park_thread(word, expected);
            }
        }
    }

    fn park_context(&self, word: &AtomicU32, expected: u32) {
        let watched = Watched::new(word);
        let blocked = self.blocked.clone();
        let tls = self.tls.clone();
        context::block(move |ctx, scheduler| {
            blocked.park(ctx, scheduler, watched, expected, &*tls)
        });
    }
}

/// Returns true once `word` moved off `expected` within `spins` reads.
pub fn spin_until_changed(word: &AtomicU32, expected: u32, spins: u64) -> bool {
    for _ in 0..spins {
        if word.load(Ordering::Acquire) != expected {
            return true;
        }
        spin_loop();
    }
    false
}

fn park_thread(word: &AtomicU32, expected: u32) {
    let key = Watched::new(word).addr();
    // `validate` runs with the park bucket locked, and `unpark_all` takes the
    // same lock, so a wake issued after the store cannot slip between the
    // check and the sleep.
    unsafe {
        parking_lot_core::park(
            key,
            || word.load(Ordering::Acquire) == expected,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::NoTls;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn parker(spins: u64) -> Arc<Parker> {
        let config = Config::default()
            .with_spin_count(spins)
            .with_throttled_spin_count(spins);
        Arc::new(Parker::new(&config, Arc::new(NoTls)))
    }

    #[test]
    fn returns_immediately_when_word_differs() {
        let p = parker(10);
        let word = AtomicU32::new(1);
        p.wait(&word, 0);
    }

    #[test]
    fn wake_releases_parked_threads() {
        let p = parker(0);
        let word = Arc::new(AtomicU32::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let (p, word, done) = (p.clone(), word.clone(), done.clone());
                thread::spawn(move || {
                    p.wait(&word, 0);
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(done.load(Ordering::SeqCst), 0);
        word.store(1, Ordering::Release);
        p.wake(&word);
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn no_lost_wakeups_across_trials() {
        let p = parker(64);
        for trial in 0..200u32 {
            let word = Arc::new(AtomicU32::new(trial));
            let waiters: Vec<_> = (0..4)
                .map(|_| {
                    let (p, word) = (p.clone(), word.clone());
                    thread::spawn(move || p.wait(&word, trial))
                })
                .collect();
            word.store(trial + 1, Ordering::Release);
            p.wake(&word);
            for w in waiters {
                w.join().unwrap();
            }
        }
    }
}
