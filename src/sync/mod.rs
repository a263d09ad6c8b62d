mod condvar;
pub mod lock;
mod wait;
mod waitqueue;

pub use condvar::Condvar;
pub use lock::McsLock;
pub use wait::{spin_until_changed, Parker};
pub use waitqueue::{BlockedWaitEntry, WaitQueue};
