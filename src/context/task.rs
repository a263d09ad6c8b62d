//! Switch points available to code running inside a context.

use super::{Context, ContextHandle, ContextId};
use crate::scheduler::{SchedRef, SchedulerId};
use crate::tls::TlsHooks;
use core::cell::Cell;
use core::ptr::NonNull;
use corosensei::Yielder;

/// Runs on the hart right after a context blocked.
///
/// Returning the context resumes it on the same hart immediately. Returning
/// `None` means the callback took ownership and will unblock it later.
pub type BlockFn = Box<dyn FnOnce(Box<Context>, &SchedRef) -> Option<Box<Context>> + Send>;

/// What a context asks of its hart when it suspends.
pub(crate) enum Suspend {
    Yield,
    Block(BlockFn),
}

#[derive(Copy, Clone)]
struct Current {
    yielder: NonNull<Yielder<(), Suspend>>,
    scheduler: SchedulerId,
    context: ContextId,
}

thread_local! {
    static CURRENT: Cell<Option<Current>> = Cell::new(None);
}

// A context may resume on a different OS thread than it suspended on, so the
// thread-local must be looked up again after every switch. Keeping these out
// of line stops the TLS address from being cached across `suspend`.
#[inline(never)]
fn current_slot() -> Option<Current> {
    CURRENT.with(|c| c.get())
}

#[inline(never)]
fn set_current_slot(current: Option<Current>) {
    CURRENT.with(|c| c.set(current))
}

pub(crate) fn trampoline(
    yielder: &Yielder<(), Suspend>,
    scheduler: SchedulerId,
    context: ContextId,
    routine: Box<dyn FnOnce() + Send>,
    tls: &dyn TlsHooks,
) {
    set_current_slot(Some(Current {
        yielder: NonNull::from(yielder),
        scheduler,
        context,
    }));
    tls.create(scheduler, context);
    routine();
    tls.destroy(scheduler, context);
}

/// Called by the hart once a context switched back out.
pub(crate) fn leave() {
    set_current_slot(None);
}

fn suspend(request: Suspend, caller: &str) {
    let current = match current_slot() {
        Some(c) => c,
        None => panic!("{}: not running inside a context", caller),
    };
    // The yielder lives on the context's own stack for as long as the
    // context exists.
    unsafe { current.yielder.as_ref() }.suspend(request);
    set_current_slot(Some(current));
}

/// The context running on this hart, if any.
pub fn current() -> Option<ContextHandle> {
    current_slot().map(|c| ContextHandle {
        scheduler: c.scheduler,
        context: c.context,
    })
}

pub fn in_context() -> bool {
    current_slot().is_some()
}

/// Puts the running context back at the tail of its node's queue and gives
/// up the hart. Outside a context this yields the OS thread.
pub fn yield_now() {
    if in_context() {
        suspend(Suspend::Yield, "yield_now");
    } else {
        std::thread::yield_now();
    }
}

/// Suspends the running context and hands it to `f` on the hart.
///
/// There is no automatic resumption: `f` either returns the context to run it
/// again right away, or keeps it and later passes it to the owning
/// scheduler's `context_unblock`.
///
/// # Panics
///
/// Panics when called outside a context.
pub fn block<F>(f: F)
where
    F: FnOnce(Box<Context>, &SchedRef) -> Option<Box<Context>> + Send + 'static,
{
    suspend(Suspend::Block(Box::new(f)), "block");
}
