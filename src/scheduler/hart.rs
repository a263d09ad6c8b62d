use super::{HartAction, SchedRef, Tree};
use crate::context::{Context, Status, Switch};
use crate::error::*;
use log::trace;
use parking_lot::{Condvar, Mutex};
use spin::Once;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Id(pub u32);

/// The supplier of harts beneath the root scheduler.
pub trait HartAllocator: Send + Sync {
    /// The root wants `k` more harts (fewer, if negative).
    fn request_harts(&self, k: isize);

    /// A hart left the root and is free again.
    fn yield_hart(&self, _hart: Id) {}
}

/// One unit of hardware parallelism, moving through a scheduler tree.
pub struct HardwareThread {
    id: Id,
    tree: Arc<Tree>,
}

impl HardwareThread {
    pub fn new(id: Id, tree: Arc<Tree>) -> HardwareThread {
        HardwareThread { id, tree }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    /// Drives this hart through the tree, starting at `root`, until it is
    /// yielded back out of the root to the root's allocator.
    ///
    /// A grant moves the hart into the child for good; it only comes back
    /// up through `hart_return` once the child has nothing left for it.
    pub fn enter(&self, root: SchedRef) {
        let mut current = root;
        let mut action = current.hart_enter();
        let root = loop {
            action = match action {
                HartAction::Grant(child) => {
                    trace!("hart {}: {:?} -> {:?}", self.id.0, current.id(), child.id());
                    current = child;
                    current.hart_enter()
                }
                HartAction::Run(context) => {
                    self.run(&current, context);
                    current.hart_enter()
                }
                HartAction::Yield => match current.parent() {
                    Some(parent) => {
                        trace!("hart {}: {:?} -> {:?}", self.id.0, current.id(), parent.id());
                        let next = parent.hart_return(current.id());
                        current = parent;
                        next
                    }
                    None => break current,
                },
            };
        };
        // About to go idle: pick up parked contexts whose words moved
        // without a wake.
        let unblocked = self.tree.parker().poll();
        if unblocked > 0 {
            trace!("hart {}: monitor pass unblocked {}", self.id.0, unblocked);
        }
        root.hart_exit(self.id);
    }

    /// Runs `context` until it yields, exits, or blocks for good.
    fn run(&self, scheduler: &SchedRef, context: Box<Context>) {
        let mut next = Some(context);
        while let Some(mut context) = next.take() {
            context.set_status(Status::Running);
            trace!("hart {}: running {:?}", self.id.0, context.handle());
            match context.resume() {
                Switch::Yielded => scheduler.context_yield(context),
                Switch::Blocked(block) => {
                    scheduler.context_block(&mut context);
                    next = block(context, scheduler);
                }
                Switch::Exited => scheduler.context_exit(context),
            }
        }
    }
}

struct PoolState {
    pending: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    wakeup: Condvar,
    root: Once<Weak<dyn super::Scheduler>>,
}

impl HartAllocator for PoolShared {
    fn request_harts(&self, k: isize) {
        let mut state = self.state.lock();
        if k >= 0 {
            state.pending += k as usize;
            for _ in 0..k {
                self.wakeup.notify_one();
            }
        } else {
            state.pending = state.pending.saturating_sub(k.unsigned_abs());
        }
    }

    fn yield_hart(&self, hart: Id) {
        trace!("hart {}: idle", hart.0);
    }
}

/// A fixed set of worker threads serving the root's hart requests.
pub struct HartPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl HartPool {
    pub fn new() -> HartPool {
        HartPool {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    pending: 0,
                    shutdown: false,
                }),
                wakeup: Condvar::new(),
                root: Once::new(),
            }),
            workers: Vec::new(),
        }
    }

    pub fn allocator(&self) -> Arc<dyn HartAllocator> {
        self.shared.clone()
    }

    /// Requests not yet picked up by a hart.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending
    }

    /// Starts `harts` workers that enter `root` once per request.
    pub fn start(&mut self, harts: usize, tree: Arc<Tree>, root: &SchedRef) -> SchedResult<()> {
        self.shared.root.call_once(|| Arc::downgrade(root));
        for i in 0..harts {
            let shared = self.shared.clone();
            let ht = HardwareThread::new(Id(i as u32), tree.clone());
            let handle = thread::Builder::new()
                .name(format!("hart-{}", i))
                .spawn(move || worker(shared, ht))
                .map_err(|e| {
                    log::error!("hart pool: cannot spawn hart {}: {}", i, e);
                    SchedError::SpawnFailed
                })?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Stops the workers once their current trip through the tree ends.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.wakeup.notify_all();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("hart pool: a hart panicked");
            }
        }
    }
}

impl Default for HartPool {
    fn default() -> Self {
        HartPool::new()
    }
}

impl Drop for HartPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker(shared: Arc<PoolShared>, ht: HardwareThread) {
    loop {
        {
            let mut state = shared.state.lock();
            while state.pending == 0 && !state.shutdown {
                shared.wakeup.wait(&mut state);
            }
            if state.shutdown {
                break;
            }
            state.pending -= 1;
        }
        let root = match shared.root.get().and_then(|r| r.upgrade()) {
            Some(r) => r,
            None => break,
        };
        ht.enter(root);
    }
    trace!("hart {}: stopped", ht.id().0);
}
