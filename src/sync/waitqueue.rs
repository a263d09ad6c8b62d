use crate::context::{Context, ContextId};
use crate::scheduler::{SchedRef, SchedulerId};
use crate::tls::TlsHooks;
use arraydeque::ArrayDeque;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use spin::Mutex as SpinMutex;
use std::collections::btree_map::BTreeMap;
use std::collections::vec_deque::VecDeque;

/// Address of a watched word.
///
/// Only dereferenced while the context waiting on it is suspended inside
/// `Parker::wait`, which keeps the borrow alive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Watched(*const AtomicU32);

unsafe impl Send for Watched {}

impl Watched {
    pub(crate) fn new(word: &AtomicU32) -> Watched {
        Watched(word as *const AtomicU32)
    }

    pub(crate) fn addr(self) -> usize {
        self.0 as usize
    }

    fn load(self) -> u32 {
        unsafe { (*self.0).load(Ordering::Acquire) }
    }
}

/// A context parked on a watched word.
pub struct BlockedWaitEntry {
    context: Box<Context>,
    scheduler: SchedRef,
    watched: Watched,
    expected: u32,
}

impl BlockedWaitEntry {
    pub fn scheduler(&self) -> SchedulerId {
        self.scheduler.id()
    }

    pub fn context(&self) -> ContextId {
        self.context.id()
    }

    fn resolved(&self) -> bool {
        self.watched.load() != self.expected
    }

    fn resume(self) {
        self.scheduler.context_unblock(self.context);
    }
}

type Batch = ArrayDeque<[BlockedWaitEntry; 16]>;

/// Contexts blocked in the cooperative wait path, keyed by watched address.
pub struct WaitQueue {
    wakeup_sets: SpinMutex<BTreeMap<usize, VecDeque<BlockedWaitEntry>>>,
    len: AtomicUsize,
}

impl WaitQueue {
    pub fn new() -> WaitQueue {
        WaitQueue {
            wakeup_sets: SpinMutex::new(BTreeMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parks `context` on `watched` unless the word already moved.
    ///
    /// The check and the insertion happen under the list lock, and `wake`
    /// scans under the same lock, so a write that lands after the caller's
    /// spin phase is seen by one side or the other. The park hook runs under
    /// the list lock, only when the context is actually enqueued.
    pub(crate) fn park(
        &self,
        context: Box<Context>,
        scheduler: &SchedRef,
        watched: Watched,
        expected: u32,
        tls: &dyn TlsHooks,
    ) -> Option<Box<Context>> {
        let mut wakeup_sets = self.wakeup_sets.lock();
        if watched.load() != expected {
            return Some(context);
        }
        tls.park(context.scheduler(), context.id());
        wakeup_sets
            .entry(watched.addr())
            .or_insert_with(VecDeque::new)
            .push_back(BlockedWaitEntry {
                context,
                scheduler: scheduler.clone(),
                watched,
                expected,
            });
        self.len.fetch_add(1, Ordering::AcqRel);
        None
    }

    /// Unblocks every context on `addr` whose word no longer holds the value
    /// it waited on. Returns the number of contexts unblocked.
    pub fn wake(&self, addr: usize) -> usize {
        self.drain_resolved(Some(addr))
    }

    /// Re-examines every parked context.
    pub fn poll(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.drain_resolved(None)
    }

    fn drain_resolved(&self, only: Option<usize>) -> usize {
        let mut woken = 0;
        loop {
            let mut batch = Batch::new();
            let full = self.collect_batch(only, &mut batch);
            // Unblocking takes node locks; never do that under the list lock.
            for entry in batch {
                entry.resume();
                woken += 1;
            }
            if !full {
                break woken;
            }
        }
    }

    /// Moves resolved entries into `batch`. Returns whether the batch filled
    /// up before the scan finished.
    fn collect_batch(&self, only: Option<usize>, batch: &mut Batch) -> bool {
        let mut wakeup_sets = self.wakeup_sets.lock();
        let keys: Vec<usize> = match only {
            Some(addr) => vec![addr],
            None => wakeup_sets.keys().copied().collect(),
        };
        let mut full = false;
        for addr in keys {
            let set = match wakeup_sets.get_mut(&addr) {
                Some(s) => s,
                None => continue,
            };
            let mut i = 0;
            while i < set.len() {
                if !set[i].resolved() {
                    i += 1;
                    continue;
                }
                let entry = set
                    .remove(i)
                    .expect("WaitQueue::collect_batch: index out of range");
                match batch.push_back(entry) {
                    Ok(()) => {
                        self.len.fetch_sub(1, Ordering::AcqRel);
                    }
                    Err(e) => {
                        // Batch is full.
                        set.insert(i, e.element);
                        full = true;
                        break;
                    }
                }
            }
            if set.is_empty() {
                wakeup_sets.remove(&addr);
            }
            if full {
                break;
            }
        }
        full
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        WaitQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Status;
    use crate::scheduler::{HartAction, HartAllocator, Scheduler, SchedulerNode, Tree};
    use crate::tls::NoTls;
    use std::sync::Arc;

    struct NoHarts;

    impl HartAllocator for NoHarts {
        fn request_harts(&self, _: isize) {}
    }

    #[derive(Default)]
    struct CountParks(AtomicUsize);

    impl TlsHooks for CountParks {
        fn park(&self, _: SchedulerId, _: ContextId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn root() -> Arc<SchedulerNode> {
        let config = Config::default().with_harts(1).with_stack_size(64 << 10);
        let tree = Tree::new(config, Arc::new(NoTls)).unwrap();
        SchedulerNode::new_root(tree, Arc::new(NoHarts))
    }

    /// A context in the state the hart leaves it in after `context::block`.
    fn blocked_context(root: &Arc<SchedulerNode>) -> Box<Context> {
        root.create(|| {});
        match root.hart_enter() {
            HartAction::Run(mut context) => {
                context.set_status(Status::Running);
                context.set_status(Status::Blocked);
                context
            }
            other => panic!("expected a context, got {:?}", other),
        }
    }

    #[test]
    fn park_hook_runs_only_on_enqueue() {
        let root = root();
        let scheduler: SchedRef = root.clone();
        let queue = WaitQueue::new();
        let hooks = CountParks::default();
        let word = AtomicU32::new(1);

        let context = queue
            .park(blocked_context(&root), &scheduler, Watched::new(&word), 0, &hooks)
            .expect("word already moved");
        assert_eq!(hooks.0.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());

        word.store(0, Ordering::Release);
        assert!(queue
            .park(context, &scheduler, Watched::new(&word), 0, &hooks)
            .is_none());
        assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);

        word.store(2, Ordering::Release);
        assert_eq!(queue.wake(Watched::new(&word).addr()), 1);
        assert!(queue.is_empty());
        assert_eq!(root.queued_contexts(), 1);
    }

    #[test]
    fn wake_drains_more_than_one_batch() {
        let root = root();
        let scheduler: SchedRef = root.clone();
        let queue = WaitQueue::new();
        let word = AtomicU32::new(0);
        let other = AtomicU32::new(0);
        for _ in 0..40 {
            let context = blocked_context(&root);
            assert!(queue
                .park(context, &scheduler, Watched::new(&word), 0, &NoTls)
                .is_none());
        }
        let context = blocked_context(&root);
        assert!(queue
            .park(context, &scheduler, Watched::new(&other), 0, &NoTls)
            .is_none());

        // Nothing moved yet.
        assert_eq!(queue.poll(), 0);
        word.store(1, Ordering::Release);
        assert_eq!(queue.wake(Watched::new(&word).addr()), 40);
        assert_eq!(queue.len(), 1);
        assert_eq!(root.queued_contexts(), 40);

        other.store(1, Ordering::Release);
        assert_eq!(queue.poll(), 1);
        assert!(queue.is_empty());
    }
}
