//! Cooperative cancellation of running evaluations.
//!
//! A cancellation request names the interpreter thread id of the evaluation to stop. Delivery
//! happens on a pooled worker: it attaches to the interpreter (the running evaluation yields the
//! GIL at its next switch interval), confirms that the thread is still evaluating and schedules a
//! `KeyboardInterrupt` for it with `PyThreadState_SetAsyncExc`. The evaluation raises it at its
//! next safepoint and fails with [`EvalError::Interrupted`](crate::EvalError::Interrupted).
//! Inside a long native call the interrupt waits until control returns to the interpreter.

use std::{
    collections::HashMap,
    fmt,
    os::raw::{c_long, c_ulong},
    sync::{Arc, mpsc},
    thread::JoinHandle,
};

use parking_lot::Mutex;
use pyo3::{exceptions::PyKeyboardInterrupt, ffi, prelude::*, sync::PyOnceLock};

use crate::{context::ContextId, lock::InterpreterLock};

/// Interpreter-level identifier of an OS thread, as reported by `threading.get_ident()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PyThreadId(u64);

impl PyThreadId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Id of the calling thread.
    pub fn current(py: Python<'_>) -> PyResult<Self> {
        static GET_IDENT: PyOnceLock<Py<PyAny>> = PyOnceLock::new();

        GET_IDENT.import(py, "threading", "get_ident")?.call0()?.extract().map(Self)
    }
}

impl fmt::Display for PyThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Threads currently running an evaluation, and the context each one is evaluating.
pub(crate) type RunningEvaluations = Arc<Mutex<HashMap<PyThreadId, ContextId>>>;

/// Schedules a `KeyboardInterrupt` in `thread`. Returns whether a thread state was found.
pub(crate) fn raise_in(py: Python<'_>, thread: PyThreadId) -> bool {
    let Ok(id) = c_ulong::try_from(thread.raw()) else {
        return false;
    };
    let exc = py.get_type::<PyKeyboardInterrupt>();
    // SAFETY: we are attached to the interpreter and `exc` is a live type object for the whole call.
    let affected = unsafe { ffi::PyThreadState_SetAsyncExc(id as c_long, exc.as_ptr()) };
    affected > 0
}

/// Drops an interrupt that was scheduled for `thread` but not raised yet.
pub(crate) fn clear_pending(_py: Python<'_>, thread: PyThreadId) {
    let Ok(id) = c_ulong::try_from(thread.raw()) else {
        return;
    };
    // SAFETY: we are attached to the interpreter; a null exception clears the pending one.
    unsafe {
        ffi::PyThreadState_SetAsyncExc(id as c_long, std::ptr::null_mut());
    }
}

/// Builds the delivery task for one cancellation request.
pub(crate) fn delivery_task(running: RunningEvaluations, thread: PyThreadId) -> Task {
    Box::new(move || {
        InterpreterLock.acquire(|token| {
            // the evaluation clears its entry while attached, so this check cannot race it
            let Some(context) = running.lock().get(&thread).copied() else {
                tracing::debug!(%thread, "no evaluation running on thread, interrupt dropped");
                return;
            };
            if raise_in(token.py(), thread) {
                tracing::info!(%thread, %context, "interrupt delivered");
            } else {
                tracing::warn!(%thread, %context, "interrupt target has no thread state");
            }
        });
    })
}

/// A unit of work for a [`TaskPool`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where interrupt delivery runs. Hosts with their own thread pool can plug it in here.
pub trait TaskPool: Send + Sync {
    fn submit(&self, task: Task);
}

/// A small fixed pool of named worker threads.
pub struct InterruptPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Vec<JoinHandle<()>>,
}

impl InterruptPool {
    /// Starts `workers` threads (at least one).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..workers.max(1))
            .filter_map(|index| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("hostpy-interrupt-{index}"))
                    .spawn(move || {
                        loop {
                            let task = receiver.lock().recv();
                            match task {
                                Ok(task) => task(),
                                Err(_) => break,
                            }
                        }
                    })
                    .inspect_err(|err| tracing::error!(error = %err, "could not start interrupt worker"))
                    .ok()
            })
            .collect();
        Self {
            sender: Mutex::new(Some(sender)),
            workers,
        }
    }
}

impl TaskPool for InterruptPool {
    fn submit(&self, task: Task) {
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) if !self.workers.is_empty() => sender.send(task).err().map(|err| err.0),
            _ => Some(task),
        };
        // no worker could take it: deliver on the calling thread
        if let Some(task) = rejected {
            task();
        }
    }
}

impl Drop for InterruptPool {
    fn drop(&mut self) {
        self.sender.lock().take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for InterruptPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}
