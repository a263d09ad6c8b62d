use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// A fair, queue-based (MCS) lock.
///
/// Waiters are served in arrival order. Each waiter spins on a flag inside
/// its own queue node, so contention does not bounce a shared cache line.
///
/// Critical sections are closures. A queue node lives on the locking
/// thread's stack for the duration of `with`, so no guard can outlive it.
/// The lock is not reentrant.
pub struct McsLock<T> {
    tail: AtomicPtr<QNode>,
    inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for McsLock<T> {}
unsafe impl<T: Send> Sync for McsLock<T> {}

struct QNode {
    next: AtomicPtr<QNode>,
    locked: AtomicBool,
}

impl<T> McsLock<T> {
    pub const fn new(inner: T) -> Self {
        McsLock {
            tail: AtomicPtr::new(ptr::null_mut()),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Runs `f` with exclusive access to the protected value.
    pub fn with<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let node = QNode {
            next: AtomicPtr::new(ptr::null_mut()),
            locked: AtomicBool::new(true),
        };
        let me = &node as *const QNode as *mut QNode;

        let pred = self.tail.swap(me, Ordering::AcqRel);
        if !pred.is_null() {
            // The predecessor hands the lock over by clearing our flag.
            unsafe {
                (*pred).next.store(me, Ordering::Release);
            }
            while node.locked.load(Ordering::Acquire) {
                spin_loop();
            }
        }

        let _release = Release { lock: self, node: &node };
        f(unsafe { &mut *self.inner.get() })
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn unlock(&self, node: &QNode) {
        let me = node as *const QNode as *mut QNode;
        let mut next = node.next.load(Ordering::Acquire);
        if next.is_null() {
            if self
                .tail
                .compare_exchange(me, ptr::null_mut(), Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            // A successor swapped itself in but has not linked yet.
            loop {
                next = node.next.load(Ordering::Acquire);
                if !next.is_null() {
                    break;
                }
                spin_loop();
            }
        }
        unsafe {
            (*next).locked.store(false, Ordering::Release);
        }
    }
}

struct Release<'a, T> {
    lock: &'a McsLock<T>,
    node: &'a QNode,
}

impl<'a, T> Drop for Release<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock(self.node);
    }
}

impl<T: Default> Default for McsLock<T> {
    fn default() -> Self {
        McsLock::new(T::default())
    }
}
