use super::hart::{HartAllocator, Id as HartId};
use super::{HartAction, SchedulerId, Tree};
use crate::context::{Context, ContextHandle, ContextId, Status};
use crate::sync::{Condvar, McsLock};
use log::{debug, trace};
use std::collections::btree_set::BTreeSet;
use std::collections::vec_deque::VecDeque;
use std::sync::{Arc, Weak};

pub type SchedRef = Arc<dyn Scheduler>;

/// A node of the scheduler tree, as seen by its parent, its children and the
/// harts passing through it.
pub trait Scheduler: Send + Sync {
    fn id(&self) -> SchedulerId;

    /// `None` for the root.
    fn parent(&self) -> Option<SchedRef>;

    /// `child` wants `k` more harts (fewer, if `k` is negative).
    ///
    /// Returns the child's outstanding request count afterwards.
    fn hart_request(&self, child: SchedulerId, k: isize) -> usize;

    /// A hart arrived. Decides what it does next.
    fn hart_enter(&self) -> HartAction;

    /// A hart came back from `child`.
    fn hart_return(&self, _child: SchedulerId) -> HartAction {
        self.hart_enter()
    }

    /// A hart yielded out of this root and leaves the tree.
    fn hart_exit(&self, _hart: HartId) {}

    fn child_enter(&self, child: SchedRef);

    fn child_exit(&self, child: SchedulerId);

    /// The running context suspended itself through `context::block`.
    fn context_block(&self, context: &mut Context) {
        context.set_status(Status::Blocked);
    }

    fn context_unblock(&self, context: Box<Context>);

    fn context_yield(&self, context: Box<Context>);

    fn context_exit(&self, context: Box<Context>);
}

/// A registered child and the harts it is still waiting for.
pub struct ChildRef {
    id: SchedulerId,
    scheduler: SchedRef,
    requested_harts: usize,
}

struct NodeState {
    queue: VecDeque<Box<Context>>,
    children: Vec<ChildRef>,
    live: BTreeSet<ContextId>,
    next_id: u64,
}

enum Upstream {
    Parent(Weak<dyn Scheduler>),
    Allocator(Arc<dyn HartAllocator>),
}

/// The stock scheduler: FIFO context queue, children served first in
/// registration order.
pub struct SchedulerNode {
    id: SchedulerId,
    tree: Arc<Tree>,
    upstream: Upstream,
    state: McsLock<NodeState>,
    done: Condvar,
}

impl SchedulerNode {
    fn new(tree: Arc<Tree>, upstream: Upstream) -> SchedulerNode {
        SchedulerNode {
            id: SchedulerId::next(),
            tree,
            upstream,
            state: McsLock::new(NodeState {
                queue: VecDeque::new(),
                children: Vec::new(),
                live: BTreeSet::new(),
                next_id: 0,
            }),
            done: Condvar::new(),
        }
    }

    /// Creates the root of a tree, drawing harts from `allocator`.
    pub fn new_root(tree: Arc<Tree>, allocator: Arc<dyn HartAllocator>) -> Arc<SchedulerNode> {
        let root = Arc::new(SchedulerNode::new(tree, Upstream::Allocator(allocator)));
        debug!("scheduler: root {:?} created", root.id);
        root
    }

    /// Creates a node under `parent` and registers it there.
    pub fn new_child(parent: &Arc<SchedulerNode>) -> Arc<SchedulerNode> {
        let parent_ref: SchedRef = parent.clone();
        let child = Arc::new(SchedulerNode::new(
            parent.tree.clone(),
            Upstream::Parent(Arc::downgrade(&parent_ref)),
        ));
        parent.child_enter(child.clone());
        child
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Asks upstream for `k` harts.
    pub fn request_harts(&self, k: isize) {
        match &self.upstream {
            Upstream::Parent(parent) => match parent.upgrade() {
                Some(parent) => {
                    parent.hart_request(self.id, k);
                }
                None => panic!(
                    "SchedulerNode::request_harts: parent of {:?} is gone",
                    self.id
                ),
            },
            Upstream::Allocator(allocator) => allocator.request_harts(k),
        }
    }

    /// Creates a context running `routine` and queues it on this node.
    pub fn create<F>(&self, routine: F) -> ContextHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (stack_size, stack) = self.tree.allocate_stack();
        let id = self.state.with(|s| {
            let id = ContextId(s.next_id);
            s.next_id += 1;
            s.live.insert(id);
            id
        });
        let context = Context::new(
            self.id,
            id,
            stack_size,
            stack,
            Box::new(routine),
            self.tree.tls().clone(),
        );
        trace!("scheduler {:?}: created {:?}", self.id, id);
        let handle = context.handle();
        self.schedule(context);
        handle
    }

    /// Blocks until every context created on this node has exited.
    pub fn join_all(&self) {
        self.done
            .wait_while(self.tree.parker(), || self.live_contexts() > 0);
    }

    pub fn live_contexts(&self) -> usize {
        self.state.with(|s| s.live.len())
    }

    pub fn queued_contexts(&self) -> usize {
        self.state.with(|s| s.queue.len())
    }

    pub fn is_live(&self, handle: ContextHandle) -> bool {
        handle.scheduler == self.id && self.state.with(|s| s.live.contains(&handle.context))
    }

    pub fn children(&self) -> Vec<SchedulerId> {
        self.state.with(|s| s.children.iter().map(|c| c.id).collect())
    }

    /// Outstanding requests of a registered child.
    pub fn requested_harts(&self, child: SchedulerId) -> Option<usize> {
        self.state.with(|s| {
            s.children
                .iter()
                .find(|c| c.id == child)
                .map(|c| c.requested_harts)
        })
    }

    /// Leaves the parent once every context here has exited.
    ///
    /// Requests the parent has not served yet are withdrawn first. No
    /// contexts may be created on this node afterwards.
    pub fn detach(&self) {
        self.join_all();
        let parent = match self.parent() {
            Some(p) => p,
            None => panic!("SchedulerNode::detach: {:?} has no parent", self.id),
        };
        let outstanding = parent.hart_request(self.id, 0);
        if outstanding > 0 {
            parent.hart_request(self.id, -(outstanding as isize));
        }
        parent.child_exit(self.id);
    }

    fn schedule(&self, context: Box<Context>) {
        self.state.with(|s| s.queue.push_back(context));
        self.request_harts(1);
    }
}

impl Scheduler for SchedulerNode {
    fn id(&self) -> SchedulerId {
        self.id
    }

    fn parent(&self) -> Option<SchedRef> {
        match &self.upstream {
            Upstream::Parent(parent) => parent.upgrade(),
            Upstream::Allocator(_) => None,
        }
    }

    fn hart_request(&self, child: SchedulerId, k: isize) -> usize {
        let me = self.id;
        let (applied, total) = self.state.with(|s| {
            let entry = match s.children.iter_mut().find(|c| c.id == child) {
                Some(c) => c,
                None => panic!(
                    "SchedulerNode::hart_request: {:?} is not a child of {:?}",
                    child, me
                ),
            };
            // Withdrawals never take the count below zero.
            let applied = if k >= 0 {
                k
            } else {
                -(entry.requested_harts.min(k.unsigned_abs()) as isize)
            };
            entry.requested_harts = match (entry.requested_harts as isize).checked_add(applied) {
                Some(n) => n as usize,
                None => panic!(
                    "SchedulerNode::hart_request: {:?} overflows its request count at {:?}",
                    child, me
                ),
            };
            (applied, entry.requested_harts)
        });
        // Forwarded outside the lock, so concurrent deltas from one child may
        // reach the grandparent reordered. Its clamp can then only leave it
        // over-counting: the surplus grants find nothing and yield straight
        // back, and no request is ever lost.
        if applied != 0 {
            self.request_harts(applied);
        }
        total
    }

    fn hart_enter(&self) -> HartAction {
        let action = self.state.with(|s| {
            // Children that asked for harts go before our own contexts.
            if let Some(child) = s.children.iter_mut().find(|c| c.requested_harts > 0) {
                child.requested_harts -= 1;
                return HartAction::Grant(child.scheduler.clone());
            }
            match s.queue.pop_front() {
                Some(context) => HartAction::Run(context),
                None => HartAction::Yield,
            }
        });
        trace!("scheduler {:?}: hart enter -> {:?}", self.id, action);
        action
    }

    fn hart_exit(&self, hart: HartId) {
        match &self.upstream {
            Upstream::Allocator(allocator) => allocator.yield_hart(hart),
            // The parent is gone; nobody is left to take the hart.
            Upstream::Parent(_) => log::warn!(
                "scheduler {:?}: hart {} left an orphaned node",
                self.id,
                hart.0
            ),
        }
    }

    fn child_enter(&self, child: SchedRef) {
        let id = child.id();
        let me = self.id;
        self.state.with(|s| {
            assert!(
                s.children.iter().all(|c| c.id != id),
                "SchedulerNode::child_enter: {:?} is already a child of {:?}",
                id,
                me
            );
            s.children.push(ChildRef {
                id,
                scheduler: child,
                requested_harts: 0,
            });
        });
        debug!("scheduler {:?}: child {:?} entered", me, id);
    }

    fn child_exit(&self, child: SchedulerId) {
        let me = self.id;
        let removed = self.state.with(|s| {
            let index = match s.children.iter().position(|c| c.id == child) {
                Some(i) => i,
                None => panic!(
                    "SchedulerNode::child_exit: {:?} is not a child of {:?}",
                    child, me
                ),
            };
            let requested = s.children[index].requested_harts;
            if requested != 0 {
                log::error!(
                    "scheduler {:?}: child {:?} exited with {} outstanding hart requests",
                    me,
                    child,
                    requested
                );
                panic!(
                    "SchedulerNode::child_exit: {:?} exits {:?} with {} outstanding hart requests",
                    child, me, requested
                );
            }
            s.children.remove(index)
        });
        // The child may drop here; keep that out of the critical section.
        drop(removed);
        debug!("scheduler {:?}: child {:?} exited", me, child);
    }

    fn context_unblock(&self, mut context: Box<Context>) {
        self.check_owner(&context, "context_unblock");
        context.set_status(Status::Queued);
        self.schedule(context);
    }

    fn context_yield(&self, mut context: Box<Context>) {
        self.check_owner(&context, "context_yield");
        context.set_status(Status::Queued);
        self.schedule(context);
    }

    fn context_exit(&self, mut context: Box<Context>) {
        self.check_owner(&context, "context_exit");
        let id = context.id();
        context.set_status(Status::Exited);
        let me = self.id;
        let remaining = self.state.with(|s| {
            if !s.live.remove(&id) {
                panic!(
                    "SchedulerNode::context_exit: {:?} of {:?} exited twice",
                    id, me
                );
            }
            s.live.len()
        });
        self.tree.release(context);
        trace!("scheduler {:?}: {:?} exited, {} live", me, id, remaining);
        if remaining == 0 {
            self.done.notify_all(self.tree.parker());
        }
    }
}

impl SchedulerNode {
    fn check_owner(&self, context: &Context, caller: &str) {
        assert!(
            context.scheduler() == self.id,
            "SchedulerNode::{}: {:?} belongs to {:?}, not {:?}",
            caller,
            context.id(),
            context.scheduler(),
            self.id
        );
    }
}

impl Drop for SchedulerNode {
    fn drop(&mut self) {
        let live = self.state.with(|s| s.live.len());
        if live != 0 {
            log::warn!(
                "scheduler {:?}: dropped with {} live contexts",
                self.id,
                live
            );
        }
    }
}
