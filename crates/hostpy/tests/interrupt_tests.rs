//! Cancelling evaluations from other threads.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use hostpy::{ContextId, ContextKind, EvalError, EvalOptions, PyThreadId, Runtime, RuntimeConfig, Task, TaskPool};
use pretty_assertions::assert_eq;
use pyo3::Python;
use serde_json::json;

/// Runs every task on the submitting thread.
struct InlinePool;

impl TaskPool for InlinePool {
    fn submit(&self, task: Task) {
        task();
    }
}

fn wait_for_thread(runtime: &Runtime, context: ContextId) -> PyThreadId {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(thread) = runtime.running_thread(context) {
            return thread;
        }
        assert!(Instant::now() < deadline, "evaluation in {context} never started");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn endless_loops_can_be_interrupted() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let a = runtime.create_context(ContextKind::TaskRun, false).unwrap();
    let b = runtime.create_context(ContextKind::TaskRun, false).unwrap();

    thread::scope(|scope| {
        let runtime = &runtime;
        let looping = scope.spawn(move || {
            runtime.evaluate(a, "counter = 0\nwhile True:\n    counter += 1\n", EvalOptions::quiet())
        });
        let thread_id = wait_for_thread(runtime, a);

        // queued behind the loop
        let queued = scope.spawn(move || runtime.evaluate(b, "y = 42", EvalOptions::quiet()));

        thread::sleep(Duration::from_millis(100));
        runtime.interrupt_thread(thread_id);
        let result = looping.join().unwrap();
        assert_eq!(result, Err(EvalError::Interrupted));
        assert!(result.unwrap_err().is_interrupt());

        assert_eq!(queued.join().unwrap(), Ok(()));
    });

    assert_eq!(runtime.get_variable(b, "y").unwrap(), Some(json!(42)));
    assert_eq!(runtime.running_thread(a), None);

    // the interrupted context keeps its state and stays usable
    runtime
        .evaluate(a, "assert counter > 0\ncounter = -1", EvalOptions::quiet())
        .unwrap();
    assert_eq!(runtime.get_variable(a, "counter").unwrap(), Some(json!(-1)));
}

#[test]
fn interrupts_report_through_events() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let recorder = Arc::new(hostpy::RecordingListener::new());
    runtime.subscribe(recorder.clone());
    let a = runtime.create_context(ContextKind::ScriptEditor, false).unwrap();

    thread::scope(|scope| {
        let runtime = &runtime;
        let looping =
            scope.spawn(move || runtime.evaluate(a, "while True:\n    pass\n", EvalOptions::default()));
        runtime.interrupt_thread(wait_for_thread(runtime, a));
        assert_eq!(looping.join().unwrap(), Err(EvalError::Interrupted));
    });

    assert!(recorder.error_text(a).contains("KeyboardInterrupt"));
    assert_eq!(
        recorder.events_for(a).last(),
        Some(&hostpy::RuntimeEvent::EvaluationFinished { context: a })
    );
}

#[test]
fn idle_threads_ignore_interrupts() {
    let runtime = Runtime::builder(RuntimeConfig::default())
        .task_pool(Arc::new(InlinePool))
        .build()
        .unwrap();
    let id = ContextKind::ScriptEditor.fixed_id();
    let me = runtime.current_thread_id().unwrap();

    assert_eq!(runtime.running_thread(id), None);
    runtime.interrupt_thread(me);

    runtime
        .evaluate(id, "total = sum(range(100000))", EvalOptions::quiet())
        .unwrap();
    assert_eq!(runtime.get_variable(id, "total").unwrap(), Some(json!(4_999_950_000_u64)));
}

#[test]
fn thread_ids_are_stable_per_thread() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let here = runtime.current_thread_id().unwrap();
    assert_eq!(runtime.current_thread_id().unwrap(), here);
    let there = thread::scope(|scope| scope.spawn(|| runtime.current_thread_id().unwrap()).join().unwrap());
    assert_ne!(here, there);
}

#[test]
fn attached_callers_queue_up_without_holding_the_interpreter() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let a = runtime.create_context(ContextKind::TaskRun, false).unwrap();
    let b = runtime.create_context(ContextKind::TaskRun, false).unwrap();

    thread::scope(|scope| {
        let runtime = &runtime;
        let slow = scope.spawn(move || {
            runtime.evaluate(
                a,
                "import time\nfor _ in range(30):\n    time.sleep(0.01)\ndone = True",
                EvalOptions::quiet(),
            )
        });
        wait_for_thread(runtime, a);

        // a host callback that is already attached when it asks for an evaluation
        let attached = scope.spawn(move || Python::attach(|_py| runtime.evaluate(b, "y = 7", EvalOptions::quiet())));

        assert_eq!(slow.join().unwrap(), Ok(()));
        assert_eq!(attached.join().unwrap(), Ok(()));
    });

    assert_eq!(runtime.get_variable(a, "done").unwrap(), Some(json!(true)));
    assert_eq!(runtime.get_variable(b, "y").unwrap(), Some(json!(7)));
}
