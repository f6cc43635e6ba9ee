//! Embedded CPython scripting for a host application's object graph.
//!
//! A [`Runtime`] manages isolated script contexts inside the one process-wide interpreter:
//! a fixed context per [`ContextKind`] plus dynamic contexts created per run. Scripts see host
//! objects through [`HostProxy`] values (properties as attributes, children by name, `create<Type>`
//! helpers), write to `sys.stdout`/`sys.stderr` sinks that attribute output to the context that
//! produced it, and can be cancelled from other threads. [`Runtime::complete`] powers
//! autocompletion by reflecting over live values.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hostpy::{ContextKind, EvalOptions, HostObject, ObjectNode, RecordingListener, Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let console = Arc::new(RecordingListener::new());
//! runtime.subscribe(console.clone());
//!
//! let part: Arc<dyn HostObject> = ObjectNode::new("Part", "wing");
//! let context = ContextKind::ScriptEditor.fixed_id();
//! runtime.add_host_object(context, "part", &part, true)?;
//! runtime.evaluate(context, "print(part.object_name())", EvalOptions::default())?;
//! assert_eq!(console.output_text(context), "wing\n");
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
#![expect(clippy::cast_possible_truncation, reason = "context ids and kind counts fit in u32")]

mod batch;
mod bindings;
mod completion;
mod config;
mod configure;
mod context;
mod convert;
mod error;
mod eval;
mod events;
pub mod host;
mod interrupt;
mod lock;
mod metadata;
mod proxy;
mod redirect;
mod registry;
mod runtime;
mod script_log;

pub use crate::{
    batch::{BatchError, run_batch},
    bindings::{AppHandle, CalculatorConstructor, ProjectPath, SharedFunctionHandle, SharedFunctions, TASK_VARIABLE},
    completion::{CandidateKind, CompletionCandidate},
    config::{ConfigError, RuntimeConfig},
    context::{ContextId, ContextInfo, ContextKind, KindProfile},
    convert::{json_to_py, py_to_json},
    error::RuntimeError,
    eval::{EvalError, EvalMode, EvalOptions},
    events::{ContextFollower, EventHub, RecordingListener, RuntimeEvent, RuntimeListener, SubscriptionId},
    host::{
        CalculatorFactory, CalculatorInfo, HostApplication, HostError, HostObject, ObjectNode, PropertyDescriptor,
        PropertyKind, PropertyValue, SharedFunction, SharedFunctionId, StaticCalculatorCatalog,
    },
    interrupt::{InterruptPool, PyThreadId, Task, TaskPool},
    lock::{InterpreterLock, LockToken, OperationQueue, QueueTicket},
    metadata::{ExecutionMetadata, MetadataScope},
    proxy::{CreateHelper, HostProxy, PropertySetter, normalize_property_id},
    redirect::{CollectMirror, NoMirror, OutputSink, SCRIPT_FILENAME, StdMirror, Stream, StreamMirror, error_line},
    runtime::{Runtime, RuntimeBuilder},
    script_log::{HOST_LOGGING_FLAG, LogLevel, ScriptLogger},
};
