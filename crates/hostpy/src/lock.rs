//! The interpreter lock guard and the process-wide operation queue.
//!
//! CPython is a single shared resource: every context of every [`Runtime`](crate::Runtime) lives in
//! the same interpreter. Two locks coordinate access to it:
//!
//! | Lock | Scope | Taken by |
//! |------|-------|----------|
//! | [`OperationQueue`] | one runtime operation in flight, process-wide | every public runtime operation |
//! | [`InterpreterLock`] | attachment to the interpreter (the GIL) | anything touching Python objects |
//!
//! The queue is entered *before* the interpreter lock. A thread that holds the GIL while waiting
//! for the queue would starve the queue holder, which needs the GIL back to finish, so a thread
//! that is already attached (a host callback, say) detaches while it waits. Interrupt delivery is the one exception: it only attaches, so it can reach a thread that sits
//! inside a long evaluation.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, const_reentrant_mutex};
use pyo3::{Python, ffi};

static OPERATION_QUEUE: ReentrantMutex<()> = const_reentrant_mutex(());

/// Scope-bound proof that the current thread is attached to the interpreter.
///
/// Only [`InterpreterLock::acquire`] hands these out, so holding one means every Python call made
/// through [`LockToken::py`] happens under the lock.
#[derive(Clone, Copy)]
pub struct LockToken<'py> {
    py: Python<'py>,
}

impl std::fmt::Debug for LockToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockToken").finish_non_exhaustive()
    }
}

impl<'py> LockToken<'py> {
    /// The interpreter handle tied to this token's scope.
    #[must_use]
    pub fn py(self) -> Python<'py> {
        self.py
    }
}

/// Reentrant mutual exclusion around interpreter-touching code.
///
/// `acquire` attaches the calling thread for the duration of the closure and detaches on every
/// exit path, including unwinding. Nested calls on the same thread are free.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterLock;

impl InterpreterLock {
    /// Runs `f` while attached to the interpreter.
    pub fn acquire<F, R>(self, f: F) -> R
    where
        F: for<'py> FnOnce(LockToken<'py>) -> R,
    {
        Python::attach(|py| f(LockToken { py }))
    }
}

/// Serializes runtime operations across all threads and all runtimes in the process.
///
/// Only one evaluation (or registry change, or completion probe) is in flight at a time. The
/// queue is reentrant, so a host callback running inside an evaluation may call back into the
/// runtime on the same thread.
#[derive(Debug)]
pub struct OperationQueue;

/// Held while a runtime operation runs; dropping it lets the next queued operation proceed.
#[must_use = "the queue is released as soon as the ticket is dropped"]
pub struct QueueTicket {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl OperationQueue {
    /// Blocks until the calling thread owns the queue.
    ///
    /// Should be called before [`InterpreterLock::acquire`]. A caller that is attached anyway is
    /// detached for as long as another thread owns the queue.
    pub fn enter() -> QueueTicket {
        loop {
            if let Some(guard) = OPERATION_QUEUE.try_lock() {
                return QueueTicket { _guard: guard };
            }
            if !is_attached() {
                return QueueTicket {
                    _guard: OPERATION_QUEUE.lock(),
                };
            }
            tracing::trace!("waiting for the operation queue with the interpreter released");
            Python::attach(|py| py.detach(|| drop(OPERATION_QUEUE.lock())));
        }
    }

    /// Whether some thread currently owns the queue.
    #[must_use]
    pub fn is_busy() -> bool {
        OPERATION_QUEUE.is_locked()
    }
}

/// Whether the calling thread currently holds the GIL.
fn is_attached() -> bool {
    // SAFETY: only inspects the calling thread's own thread state.
    unsafe { ffi::PyGILState_Check() == 1 }
}

impl std::fmt::Debug for QueueTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QueueTicket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_reentrant_on_one_thread() {
        let outer = OperationQueue::enter();
        let inner = OperationQueue::enter();
        assert!(OperationQueue::is_busy());
        drop(inner);
        assert!(OperationQueue::is_busy());
        drop(outer);
    }

    #[test]
    fn nested_acquire_reuses_the_attachment() {
        let lock = InterpreterLock;
        let value = lock.acquire(|outer| {
            let outer_version = outer.py().version_info().major;
            lock.acquire(|inner| inner.py().version_info().major + outer_version)
        });
        assert_eq!(value, 6);
    }
}
