//! Hooks into the embedding runtime's per-context thread-local storage.

use crate::context::ContextId;
use crate::scheduler::SchedulerId;

/// Lifecycle callbacks for context-local storage.
///
/// All hooks run on the hart that is executing the context at that moment,
/// outside any scheduler lock.
pub trait TlsHooks: Send + Sync {
    /// Called before the first instruction of a context runs.
    fn create(&self, _scheduler: SchedulerId, _context: ContextId) {}

    /// Called after the context's start routine returned, before it is released.
    fn destroy(&self, _scheduler: SchedulerId, _context: ContextId) {}

    /// Called when a waiting context is enqueued on the blocked list, with
    /// the list locked. Must not call `Parker::wake`.
    fn park(&self, _scheduler: SchedulerId, _context: ContextId) {}
}

/// Hooks for runtimes without context-local storage.
pub struct NoTls;

impl TlsHooks for NoTls {}
