mod hart;
mod plan;
mod reason;
mod tree;

pub use hart::{HardwareThread, HartAllocator, HartPool, Id as HardwareThreadId};
pub use plan::{ChildRef, SchedRef, Scheduler, SchedulerNode};
pub use reason::HartAction;
pub use tree::Tree;

use crate::config::Config;
use crate::error::*;
use crate::sync::Parker;
use crate::tls::{NoTls, TlsHooks};
use core::sync::atomic::{AtomicU64, Ordering};
use log::info;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct SchedulerId(pub u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl SchedulerId {
    fn next() -> SchedulerId {
        SchedulerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A scheduler tree with its own pool of worker harts.
///
/// Dropping the runtime joins every hart once its current trip through the
/// tree ends. Call `join_all` on the root (and on every child node) first: a
/// context that keeps yielding, or one parked on an OS wait that nobody
/// wakes, keeps its hart in the tree and the drop never returns.
pub struct Runtime {
    root: Arc<SchedulerNode>,
    pool: HartPool,
}

impl Runtime {
    pub fn new(config: Config) -> SchedResult<Runtime> {
        Runtime::with_tls(config, Arc::new(NoTls))
    }

    pub fn with_tls(config: Config, tls: Arc<dyn TlsHooks>) -> SchedResult<Runtime> {
        let harts = config.harts;
        let tree = Tree::new(config, tls)?;
        let mut pool = HartPool::new();
        let root = SchedulerNode::new_root(tree.clone(), pool.allocator());
        let root_ref: SchedRef = root.clone();
        pool.start(harts, tree, &root_ref)?;
        info!("scheduler: Initialized with {} harts.", harts);
        Ok(Runtime { root, pool })
    }

    pub fn root(&self) -> &Arc<SchedulerNode> {
        &self.root
    }

    pub fn tree(&self) -> &Arc<Tree> {
        self.root.tree()
    }

    pub fn parker(&self) -> &Parker {
        self.tree().parker()
    }

    /// See [`Tree::set_stack_size`].
    pub fn set_stack_size(&self, bytes: usize) -> SchedResult<()> {
        self.tree().set_stack_size(bytes)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.pool.shutdown();
        info!("scheduler: Shut down.");
    }
}
