//! The [`Runtime`] aggregate: contexts, evaluation, completion and cancellation.
//!
//! ```rust,no_run
//! use hostpy::{ContextKind, EvalOptions, Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let context = runtime.create_context(ContextKind::TaskRun, true)?;
//! runtime.evaluate(context, "x = 1 + 1", EvalOptions::default())?;
//! assert_eq!(runtime.get_variable(context, "x")?, Some(serde_json::json!(2)));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! Every operation enters the process-wide [`OperationQueue`] before it attaches to the
//! interpreter. The registry mutex is only held for bookkeeping, never across Python calls or
//! event delivery.

use std::{path::Path, sync::Arc};

use parking_lot::Mutex;
use pyo3::{prelude::*, types::PyModule};
use serde_json::Value;
use strum::IntoEnumIterator;

use crate::{
    bindings::{self, TASK_VARIABLE},
    completion::{self, CompletionCandidate, CompletionScope},
    config::RuntimeConfig,
    configure::{self, HostBindings},
    context::{ContextId, ContextInfo, ContextKind},
    convert::{json_to_py, py_to_json},
    error::RuntimeError,
    eval::{self, EvalError, EvalMode, EvalOptions, Failure},
    events::{EventHub, RuntimeEvent, RuntimeListener, SubscriptionId},
    host::{CalculatorFactory, HostApplication, HostObject},
    interrupt::{self, InterruptPool, PyThreadId, RunningEvaluations, TaskPool},
    lock::{InterpreterLock, OperationQueue},
    metadata::{ExecutionMetadata, MetadataScope},
    proxy::HostProxy,
    redirect::{self, RedirectChannel, StdMirror, Stream, StreamMirror},
    registry::{ContextEntry, ContextRegistry},
};

/// Builder for a [`Runtime`] with host capabilities plugged in.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    app: Option<Arc<dyn HostApplication>>,
    calculators: Option<Arc<dyn CalculatorFactory>>,
    mirror: Option<Arc<dyn StreamMirror>>,
    pool: Option<Arc<dyn TaskPool>>,
}

impl RuntimeBuilder {
    /// The host application bound as `app` in the batch and global contexts.
    #[must_use]
    pub fn application(mut self, app: Arc<dyn HostApplication>) -> Self {
        self.app = Some(app);
        self
    }

    /// The source of calculator constructors in task contexts.
    #[must_use]
    pub fn calculators(mut self, factory: Arc<dyn CalculatorFactory>) -> Self {
        self.calculators = Some(factory);
        self
    }

    /// Where batch-context output goes. Defaults to the process's own streams.
    #[must_use]
    pub fn mirror(mut self, mirror: Arc<dyn StreamMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Where interrupt delivery runs. Defaults to an [`InterruptPool`] sized by the config.
    #[must_use]
    pub fn task_pool(mut self, pool: Arc<dyn TaskPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Installs the interpreter-wide bindings and extends `sys.path`.
    ///
    /// Contexts are created lazily by the first operation that needs them, or explicitly with
    /// [`Runtime::init_contexts`].
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let events = Arc::new(EventHub::new());
        let mirror = self.mirror.unwrap_or_else(|| Arc::new(StdMirror));
        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(InterruptPool::new(self.config.interrupt_workers)));
        let runtime = Runtime {
            bindings: HostBindings {
                app: self.app,
                calculators: self.calculators,
                dev_mode: self.config.dev_mode,
            },
            channel: Arc::new(RedirectChannel::new(Arc::clone(&events), mirror)),
            events,
            registry: Mutex::new(ContextRegistry::default()),
            running: RunningEvaluations::default(),
            pool,
            lock: InterpreterLock,
            config: self.config,
        };

        let _ticket = OperationQueue::enter();
        runtime.lock.acquire(|token| -> Result<(), RuntimeError> {
            let py = token.py();
            bindings::install(py)?;
            for path in runtime.config.search_paths() {
                add_sys_path(py, &path)?;
            }
            Ok(())
        })?;
        Ok(runtime)
    }
}

/// One scripting runtime: a set of contexts in the shared interpreter.
///
/// Several runtimes may exist in one process; they share the interpreter and the operation queue
/// but have separate contexts, events and host bindings.
pub struct Runtime {
    config: RuntimeConfig,
    lock: InterpreterLock,
    registry: Mutex<ContextRegistry>,
    bindings: HostBindings,
    events: Arc<EventHub>,
    channel: Arc<RedirectChannel>,
    running: RunningEvaluations,
    pool: Arc<dyn TaskPool>,
}

impl Runtime {
    #[must_use]
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            app: None,
            calculators: None,
            mirror: None,
            pool: None,
        }
    }

    /// A runtime without host application or calculators.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The hub every event of this runtime goes through.
    #[must_use]
    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn subscribe(&self, listener: Arc<dyn RuntimeListener>) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    // =========================================================================
    // Contexts
    // =========================================================================

    /// Creates the fixed contexts. Later calls do nothing.
    pub fn init_contexts(&self) -> Result<(), RuntimeError> {
        let _ticket = OperationQueue::enter();
        if self.registry.lock().is_initialized() {
            return Ok(());
        }
        self.lock.acquire(|token| -> Result<(), RuntimeError> {
            let py = token.py();
            let mut built = Vec::new();
            for kind in ContextKind::iter() {
                let name = kind.fixed_name();
                let namespace = configure::build_namespace(py, &name, kind, &self.bindings)?;
                let info = ContextInfo {
                    id: kind.fixed_id(),
                    kind,
                    name,
                };
                built.push(ContextEntry::new(info, namespace.unbind()));
            }

            let mut registry = self.registry.lock();
            for entry in built {
                registry.insert(entry);
            }
            registry.mark_initialized();
            tracing::debug!("initialized fixed contexts");
            Ok(())
        })
    }

    /// Creates a dynamic context named `<Kind>_<id>`.
    pub fn create_context(&self, kind: ContextKind, emit_event: bool) -> Result<ContextId, RuntimeError> {
        self.init_contexts()?;
        let _ticket = OperationQueue::enter();
        let id = self.registry.lock().allocate_id();
        let name = kind.dynamic_name(id);
        self.lock.acquire(|token| -> Result<(), RuntimeError> {
            let namespace = configure::build_namespace(token.py(), &name, kind, &self.bindings)?;
            let info = ContextInfo {
                id,
                kind,
                name: name.clone(),
            };
            self.registry.lock().insert(ContextEntry::new(info, namespace.unbind()));
            Ok(())
        })?;
        tracing::debug!(context = %name, "created context");
        if emit_event {
            self.events.emit(&RuntimeEvent::ContextCreated { context: id });
        }
        Ok(id)
    }

    /// Deletes a dynamic context. Returns `false` (and changes nothing) for fixed or unknown ids.
    pub fn delete_context(&self, id: ContextId, emit_event: bool) -> bool {
        if id.is_fixed() {
            tracing::debug!(context = %id, "fixed contexts cannot be deleted");
            return false;
        }
        let _ticket = OperationQueue::enter();
        let Some(entry) = self.registry.lock().remove(id) else {
            return false;
        };
        self.lock.acquire(|token| {
            configure::unregister_namespace(token.py(), &entry.info.name);
            drop(entry);
        });
        if emit_event {
            self.events.emit(&RuntimeEvent::ContextDeleted { context: id });
        }
        true
    }

    /// Rebuilds the namespace of an existing context with the defaults of `kind`, keeping its id
    /// and name. `id` defaults to the fixed context of `kind`.
    pub fn reset_context(&self, kind: ContextKind, id: Option<ContextId>) -> Result<(), RuntimeError> {
        self.init_contexts()?;
        let id = id.unwrap_or_else(|| kind.fixed_id());
        let _ticket = OperationQueue::enter();
        let name = self
            .registry
            .lock()
            .info(id)
            .map(|info| info.name)
            .ok_or(RuntimeError::UnknownContext(id))?;
        self.lock.acquire(|token| -> Result<(), RuntimeError> {
            let namespace = configure::build_namespace(token.py(), &name, kind, &self.bindings)?;
            let info = ContextInfo {
                id,
                kind,
                name: name.clone(),
            };
            let previous = self.registry.lock().insert(ContextEntry::new(info, namespace.unbind()));
            drop(previous);
            Ok(())
        })?;
        tracing::debug!(context = %name, %kind, "reset context");
        Ok(())
    }

    #[must_use]
    pub fn context_info(&self, id: ContextId) -> Option<ContextInfo> {
        self.registry.lock().info(id)
    }

    #[must_use]
    pub fn context_id_by_name(&self, name: &str) -> Option<ContextId> {
        self.registry.lock().id_by_name(name)
    }

    /// Ids of all live contexts, ascending.
    #[must_use]
    pub fn context_ids(&self) -> Vec<ContextId> {
        self.registry.lock().ids()
    }

    /// Runs `f` with the namespace of `id`, inside the queue and the interpreter lock.
    fn with_namespace<F, R>(&self, id: ContextId, f: F) -> Result<R, RuntimeError>
    where
        F: for<'py> FnOnce(Python<'py>, &Bound<'py, PyModule>) -> Result<R, RuntimeError>,
    {
        self.init_contexts()?;
        let _ticket = OperationQueue::enter();
        self.lock.acquire(|token| -> Result<R, RuntimeError> {
            let py = token.py();
            let namespace = self
                .registry
                .lock()
                .namespace(py, id)
                .ok_or(RuntimeError::UnknownContext(id))?;
            f(py, namespace.bind(py))
        })
    }

    // =========================================================================
    // Objects and variables
    // =========================================================================

    /// Binds `value` as `name`. Tracked names can be removed again with
    /// [`remove_object`](Self::remove_object).
    pub fn add_object(&self, id: ContextId, name: &str, value: Py<PyAny>, track: bool) -> Result<(), RuntimeError> {
        self.check_new_name(id, name)?;
        self.with_namespace(id, |py, namespace| {
            namespace.add(name, value.bind(py))?;
            Ok(())
        })?;
        self.track(id, name, track);
        Ok(())
    }

    /// Binds a proxy over `obj` as `name`. The proxy does not keep `obj` alive.
    pub fn add_host_object(
        &self,
        id: ContextId,
        name: &str,
        obj: &Arc<dyn HostObject>,
        track: bool,
    ) -> Result<(), RuntimeError> {
        self.check_new_name(id, name)?;
        self.with_namespace(id, |py, namespace| {
            namespace.add(name, HostProxy::wrap(py, obj)?)?;
            Ok(())
        })?;
        self.track(id, name, track);
        Ok(())
    }

    fn check_new_name(&self, id: ContextId, name: &str) -> Result<(), RuntimeError> {
        if name.trim().is_empty() {
            return Err(RuntimeError::InvalidName(name.to_owned()));
        }
        self.init_contexts()?;
        let registry = self.registry.lock();
        let entry = registry.get(id).ok_or(RuntimeError::UnknownContext(id))?;
        if entry.added.contains(name) {
            return Err(RuntimeError::NameInUse {
                context: id,
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn track(&self, id: ContextId, name: &str, track: bool) {
        if track && let Some(entry) = self.registry.lock().get_mut(id) {
            entry.added.insert(name.to_owned());
        }
    }

    /// Unbinds a name added with tracking.
    pub fn remove_object(&self, id: ContextId, name: &str) -> Result<(), RuntimeError> {
        let tracked = self.registry.lock().get(id).map(|entry| entry.added.contains(name));
        match tracked {
            None => return Err(RuntimeError::UnknownContext(id)),
            Some(false) => {
                return Err(RuntimeError::NotTracked {
                    context: id,
                    name: name.to_owned(),
                });
            }
            Some(true) => {}
        }
        self.with_namespace(id, |_py, namespace| {
            let globals = namespace.dict();
            if globals.contains(name)? {
                globals.del_item(name)?;
            }
            Ok(())
        })?;
        if let Some(entry) = self.registry.lock().get_mut(id) {
            entry.added.shift_remove(name);
        }
        Ok(())
    }

    /// Unbinds every tracked name of the context.
    pub fn remove_all_added_objects(&self, id: ContextId) -> Result<(), RuntimeError> {
        let names: Vec<String> = self
            .registry
            .lock()
            .get(id)
            .map(|entry| entry.added.iter().cloned().collect())
            .ok_or(RuntimeError::UnknownContext(id))?;
        self.with_namespace(id, |_py, namespace| {
            let globals = namespace.dict();
            for name in &names {
                if globals.contains(name)? {
                    globals.del_item(name)?;
                }
            }
            Ok(())
        })?;
        if let Some(entry) = self.registry.lock().get_mut(id) {
            entry.added.clear();
        }
        Ok(())
    }

    /// Binds a plain value, converted from JSON.
    pub fn add_variable(&self, id: ContextId, name: &str, value: &Value) -> Result<(), RuntimeError> {
        if name.trim().is_empty() {
            return Err(RuntimeError::InvalidName(name.to_owned()));
        }
        self.with_namespace(id, |py, namespace| {
            namespace.add(name, json_to_py(py, value)?)?;
            Ok(())
        })
    }

    /// Reads a variable as JSON. `None` if the name is unbound.
    pub fn get_variable(&self, id: ContextId, name: &str) -> Result<Option<Value>, RuntimeError> {
        self.with_namespace(id, |_py, namespace| {
            match namespace.dict().get_item(name)? {
                Some(value) => Ok(Some(py_to_json(&value)?)),
                None => Ok(None),
            }
        })
    }

    /// Binds (or with `None` unbinds) the task calculator constructors append to.
    pub fn set_task(&self, id: ContextId, task: Option<&Arc<dyn HostObject>>) -> Result<(), RuntimeError> {
        self.init_contexts()?;
        let accessible = self
            .registry
            .lock()
            .get(id)
            .map(ContextEntry::calculator_accessible)
            .ok_or(RuntimeError::UnknownContext(id))?;
        if !accessible {
            return Err(RuntimeError::NoCalculators(id));
        }
        self.with_namespace(id, |py, namespace| {
            match task {
                Some(task) => namespace.add(TASK_VARIABLE, HostProxy::wrap(py, task)?)?,
                None => namespace.add(TASK_VARIABLE, py.None())?,
            }
            Ok(())
        })
    }

    /// Removes every calculator from the task bound as `__task`, so a re-run starts without the
    /// calculators of earlier runs.
    ///
    /// Returns `false` for contexts that cannot construct calculators and when no live task is
    /// bound.
    pub fn delete_calcs_from_task(&self, id: ContextId) -> bool {
        if self.init_contexts().is_err() {
            return false;
        }
        let accessible = self
            .registry
            .lock()
            .get(id)
            .is_some_and(ContextEntry::calculator_accessible);
        if !accessible {
            return false;
        }
        let task = self.with_namespace(id, |_py, namespace| {
            let Some(bound) = namespace.dict().get_item(TASK_VARIABLE)? else {
                return Ok(None);
            };
            Ok(bound.cast::<HostProxy>().ok().and_then(|proxy| proxy.get().target()))
        });
        let task = match task {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(context = %id, error = %err, "could not read the task");
                return false;
            }
        };

        let classes: Vec<String> = self
            .bindings
            .calculators
            .as_ref()
            .map(|factory| factory.calculators().into_iter().map(|info| info.class_name).collect())
            .unwrap_or_default();
        let calculators: Vec<Arc<dyn HostObject>> = task
            .children()
            .into_iter()
            .filter(|child| classes.contains(&child.class_name()))
            .collect();
        // last first
        for calculator in calculators.iter().rev() {
            if let Err(err) = task.take_child(&calculator.uuid()) {
                tracing::warn!(context = %id, task = %task.object_name(), error = %err, "could not remove calculator");
                return false;
            }
        }
        tracing::debug!(context = %id, removed = calculators.len(), "deleted calculators from task");
        true
    }

    /// Appends `path` to `sys.path` unless it is already there. Returns whether it was added.
    pub fn add_module_path(&self, path: impl AsRef<Path>) -> Result<bool, RuntimeError> {
        let _ticket = OperationQueue::enter();
        self.lock
            .acquire(|token| add_sys_path(token.py(), path.as_ref()).map_err(RuntimeError::from))
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Runs `source` in a context.
    ///
    /// Publishes [`RuntimeEvent::EvaluationStarted`] when `options.output` is set and
    /// [`RuntimeEvent::EvaluationFinished`] when output is set or the evaluation failed with
    /// `options.error_message` set. Error reports go to the context's error stream.
    pub fn evaluate(&self, id: ContextId, source: &str, options: EvalOptions) -> Result<(), EvalError> {
        if let Err(err) = self.init_contexts() {
            tracing::error!(error = %err, "could not initialize contexts");
        }
        let _ticket = OperationQueue::enter();
        self.lock.acquire(|token| {
            let py = token.py();
            let (namespace, info) = {
                let registry = self.registry.lock();
                (registry.namespace(py, id), registry.info(id))
            };
            let (Some(namespace), Some(info)) = (namespace, info) else {
                return Err(EvalError::UnknownContext(id));
            };

            let thread = PyThreadId::current(py)
                .inspect_err(|err| tracing::warn!(error = %err, "could not read the interpreter thread id"))
                .ok();
            let outer = thread.and_then(|thread| self.running.lock().insert(thread, id));

            let _scope = MetadataScope::enter(ExecutionMetadata {
                context: id,
                context_name: info.name.clone(),
                kind: info.kind,
                output_enabled: options.output,
                error_enabled: options.error_message,
                channel: Arc::clone(&self.channel),
            });
            if options.output {
                self.events.emit(&RuntimeEvent::EvaluationStarted { context: id });
            }

            let result = self.run(py, namespace.bind(py), source, options.mode);

            if let Some(thread) = thread {
                let mut running = self.running.lock();
                match outer {
                    Some(outer) => {
                        running.insert(thread, outer);
                    }
                    None => {
                        running.remove(&thread);
                        interrupt::clear_pending(py, thread);
                    }
                }
            }

            if let Err(err) = &result {
                tracing::debug!(context = %info.name, error = %err, "evaluation failed");
            }
            if options.output || (result.is_err() && options.error_message) {
                self.events.emit(&RuntimeEvent::EvaluationFinished { context: id });
            }
            result
        })
    }

    fn run(&self, py: Python<'_>, namespace: &Bound<'_, PyModule>, source: &str, mode: EvalMode) -> Result<(), EvalError> {
        if source.trim().is_empty() {
            return Ok(());
        }
        let Err(err) = eval::run_source(py, namespace, source, mode) else {
            return Ok(());
        };
        match eval::classify(py, &err) {
            Failure::CleanExit => Ok(()),
            Failure::Failed { error, report } => {
                if let Some(report) = report {
                    redirect::dispatch_current(Stream::Err, &report);
                }
                Err(error)
            }
        }
    }

    /// [`evaluate`](Self::evaluate) reduced to success or failure.
    pub fn eval_script(&self, id: ContextId, source: &str, output: bool, error_message: bool, mode: EvalMode) -> bool {
        let options = EvalOptions {
            output,
            error_message,
            mode,
        };
        self.evaluate(id, source, options).is_ok()
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Completion candidates for `prefix` in a context, sorted by case-insensitive name.
    ///
    /// Unknown contexts yield no candidates.
    pub fn complete(&self, id: ContextId, prefix: &str, include_modules: bool) -> Vec<CompletionCandidate> {
        let calculators = match self.registry.lock().get(id) {
            Some(entry) if entry.calculator_accessible() => self.bindings.visible_calculators(),
            Some(_) => Vec::new(),
            None => return Vec::new(),
        };
        let scope = CompletionScope {
            calculators,
            include_modules,
        };
        self.with_namespace(id, |py, namespace| Ok(completion::complete(py, namespace, prefix, &scope)))
            .unwrap_or_else(|err| {
                tracing::debug!(context = %id, error = %err, "completion failed");
                Vec::new()
            })
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Asks the evaluation running on `thread` to stop.
    ///
    /// Delivery is asynchronous: the evaluation fails with [`EvalError::Interrupted`] at its next
    /// safepoint. Requests for threads that are not evaluating anything are dropped.
    pub fn interrupt_thread(&self, thread: PyThreadId) {
        tracing::debug!(%thread, "interrupt requested");
        self.pool
            .submit(interrupt::delivery_task(Arc::clone(&self.running), thread));
    }

    /// The thread currently evaluating in context `id`.
    #[must_use]
    pub fn running_thread(&self, id: ContextId) -> Option<PyThreadId> {
        self.running
            .lock()
            .iter()
            .find(|(_, context)| **context == id)
            .map(|(thread, _)| *thread)
    }

    /// Interpreter id of the calling thread.
    pub fn current_thread_id(&self) -> Result<PyThreadId, RuntimeError> {
        self.lock
            .acquire(|token| PyThreadId::current(token.py()).map_err(RuntimeError::from))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("contexts", &self.registry.lock().ids())
            .finish_non_exhaustive()
    }
}

fn add_sys_path(py: Python<'_>, path: &Path) -> PyResult<bool> {
    let entry = path.display().to_string();
    let sys_path = py.import("sys")?.getattr("path")?;
    if sys_path.contains(entry.as_str())? {
        return Ok(false);
    }
    sys_path.call_method1("append", (entry.as_str(),))?;
    tracing::debug!(path = %entry, "added module path");
    Ok(true)
}
