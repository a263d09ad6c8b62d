use super::task::{self, BlockFn, Suspend};
use crate::memory::Stack;
use crate::scheduler::SchedulerId;
use crate::tls::TlsHooks;
use corosensei::{Coroutine, CoroutineResult};
use std::sync::Arc;

pub(crate) type StartRoutine = Box<dyn FnOnce() + Send + 'static>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ContextId(pub u64);

/// Names a context without pointing at it.
///
/// Stays valid to hold (and compare) after the context exits; ask the owning
/// node whether it is still live.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContextHandle {
    pub scheduler: SchedulerId,
    pub context: ContextId,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Queued,
    Running,
    Blocked,
    Exited,
}

/// A cooperatively scheduled execution unit with its own stack.
///
/// Whoever holds the `Box<Context>` owns it: a node's queue, a hart while
/// running it, or a blocker while it is blocked. Exit consumes the box.
pub struct Context {
    id: ContextId,
    scheduler: SchedulerId,
    status: Status,
    stack_size: usize,
    fiber: Fiber,
}

/// How a context gave its hart back.
pub(crate) enum Switch {
    Yielded,
    Blocked(BlockFn),
    Exited,
}

type Inner = Coroutine<(), Suspend, (), Stack>;

struct Fiber(Option<Inner>);

// A fiber is only ever resumed by the hart that currently owns the context.
// Code running inside it reaches thread-locals through non-inlined accessors
// that are re-evaluated after every switch.
unsafe impl Send for Fiber {}

impl Context {
    pub(crate) fn new(
        scheduler: SchedulerId,
        id: ContextId,
        stack_size: usize,
        stack: Stack,
        routine: StartRoutine,
        tls: Arc<dyn TlsHooks>,
    ) -> Box<Context> {
        let coroutine = Coroutine::with_stack(stack, move |yielder, ()| {
            task::trampoline(yielder, scheduler, id, routine, &*tls)
        });
        Box::new(Context {
            id,
            scheduler,
            status: Status::Queued,
            stack_size,
            fiber: Fiber(Some(coroutine)),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The node that created this context.
    pub fn scheduler(&self) -> SchedulerId {
        self.scheduler
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            scheduler: self.scheduler,
            context: self.id,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Moves the context to `next`, rejecting transitions the lifecycle does
    /// not allow.
    pub fn set_status(&mut self, next: Status) {
        use Status::*;
        let allowed = match (self.status, next) {
            (Queued, Running) => true,
            (Running, Queued) | (Running, Blocked) | (Running, Exited) => true,
            (Blocked, Queued) | (Blocked, Running) => true,
            _ => false,
        };
        if !allowed {
            log::error!(
                "context {:?}/{:?}: illegal transition {:?} -> {:?}",
                self.scheduler,
                self.id,
                self.status,
                next
            );
            panic!(
                "Context::set_status: context {:?} of {:?} cannot go from {:?} to {:?}",
                self.id, self.scheduler, self.status, next
            );
        }
        self.status = next;
    }

    /// Runs the context on the calling hart until its next switch point.
    pub(crate) fn resume(&mut self) -> Switch {
        let coroutine = self
            .fiber
            .0
            .as_mut()
            .expect("Context::resume: context already released its stack");
        let result = coroutine.resume(());
        task::leave();
        match result {
            CoroutineResult::Yield(Suspend::Yield) => Switch::Yielded,
            CoroutineResult::Yield(Suspend::Block(f)) => Switch::Blocked(f),
            CoroutineResult::Return(()) => Switch::Exited,
        }
    }

    /// Releases an exited context, handing back its stack for reuse.
    pub(crate) fn into_stack(mut self: Box<Self>) -> Stack {
        assert!(
            self.status == Status::Exited,
            "Context::into_stack: context {:?} has not exited",
            self.id
        );
        self.fiber
            .0
            .take()
            .expect("Context::into_stack: stack already released")
            .into_stack()
    }
}
