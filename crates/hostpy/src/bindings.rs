//! Python-visible bindings: the `hostpy` module and the callables bound into context namespaces.

use std::sync::Arc;

use pyo3::{
    exceptions::{PyNameError, PyRuntimeError, PyTypeError, PyValueError},
    prelude::*,
    sync::PyOnceLock,
    types::{PyDict, PyModule, PyTuple},
};

use crate::{
    convert::{json_to_py, py_to_json},
    host::{CalculatorFactory, HostApplication, HostObject, SharedFunction},
    proxy::{CreateHelper, HostProxy, PropertySetter},
    redirect::{OutputSink, Stream},
    script_log,
};

/// Name of the namespace variable holding the task calculators are appended to.
pub const TASK_VARIABLE: &str = "__task";

/// Registers `hostpy` and `hostlog` in `sys.modules` and redirects `sys.stdout`/`sys.stderr`.
///
/// Runs once per process; later calls are no-ops.
pub(crate) fn install(py: Python<'_>) -> PyResult<()> {
    static INSTALLED: PyOnceLock<()> = PyOnceLock::new();

    INSTALLED
        .get_or_try_init(py, || {
            let sys = py.import("sys")?;
            let modules = sys.getattr("modules")?;

            let hostpy = PyModule::new(py, "hostpy")?;
            hostpy.add_class::<HostProxy>()?;
            hostpy.add_class::<PropertySetter>()?;
            hostpy.add_class::<CreateHelper>()?;
            hostpy.add_class::<OutputSink>()?;
            hostpy.add_class::<AppHandle>()?;
            hostpy.add_class::<ProjectPath>()?;
            hostpy.add_class::<CalculatorConstructor>()?;
            hostpy.add_class::<SharedFunctions>()?;
            hostpy.add_class::<SharedFunctionHandle>()?;
            modules.set_item("hostpy", &hostpy)?;
            modules.set_item("hostlog", script_log::build_module(py)?)?;

            sys.setattr("stdout", Bound::new(py, OutputSink::new(Stream::Out))?)?;
            sys.setattr("stderr", Bound::new(py, OutputSink::new(Stream::Err))?)?;
            tracing::debug!("installed hostpy modules and output redirection");
            Ok::<_, PyErr>(())
        })
        .map(|_| ())
}

/// Handle to the host application, bound as `app` in the batch and global contexts.
#[pyclass(name = "Application", module = "hostpy", frozen)]
pub struct AppHandle {
    app: Arc<dyn HostApplication>,
}

impl AppHandle {
    pub(crate) fn new(app: Arc<dyn HostApplication>) -> Self {
        Self { app }
    }
}

fn wrap_optional<'py>(py: Python<'py>, obj: Option<Arc<dyn HostObject>>) -> PyResult<Option<Bound<'py, HostProxy>>> {
    obj.map(|obj| HostProxy::wrap(py, &obj)).transpose()
}

#[pymethods]
impl AppHandle {
    fn current_project<'py>(&self, py: Python<'py>) -> PyResult<Option<Bound<'py, HostProxy>>> {
        wrap_optional(py, self.app.current_project())
    }

    fn open_project<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Option<Bound<'py, HostProxy>>> {
        wrap_optional(py, self.app.open_project(name))
    }

    fn project_path(&self) -> Option<String> {
        self.app.project_path().map(|path| path.display().to_string())
    }

    fn modules(&self) -> Vec<String> {
        self.app.modules()
    }

    fn __repr__(&self) -> &'static str {
        "<hostpy Application>"
    }
}

/// `project_path()`: directory of the current project, or `None`.
#[pyclass(name = "ProjectPath", module = "hostpy", frozen)]
pub struct ProjectPath {
    app: Option<Arc<dyn HostApplication>>,
}

impl ProjectPath {
    pub(crate) fn new(app: Option<Arc<dyn HostApplication>>) -> Self {
        Self { app }
    }
}

#[pymethods]
impl ProjectPath {
    fn __call__(&self) -> Option<String> {
        self.app
            .as_ref()
            .and_then(|app| app.project_path())
            .map(|path| path.display().to_string())
    }
}

/// Constructor for one calculator class, bound under the class name in task contexts.
///
/// The new calculator is appended to the `__task` found in the calling frames.
#[pyclass(name = "CalculatorConstructor", module = "hostpy", frozen)]
pub struct CalculatorConstructor {
    class_name: String,
    factory: Arc<dyn CalculatorFactory>,
}

impl CalculatorConstructor {
    pub(crate) fn new(class_name: String, factory: Arc<dyn CalculatorFactory>) -> Self {
        Self { class_name, factory }
    }
}

/// Walks the calling frames outwards until one has a live `__task` proxy in its globals.
fn running_task(py: Python<'_>) -> PyResult<Option<Arc<dyn HostObject>>> {
    let mut frame = py.import("sys")?.call_method1("_getframe", (0,))?;
    while !frame.is_none() {
        let globals = frame.getattr("f_globals")?;
        if let Ok(globals) = globals.cast::<PyDict>()
            && let Some(task) = globals.get_item(TASK_VARIABLE)?
            && let Ok(proxy) = task.cast::<HostProxy>()
            && let Some(task) = proxy.get().target()
        {
            return Ok(Some(task));
        }
        frame = frame.getattr("f_back")?;
    }
    Ok(None)
}

#[pymethods]
impl CalculatorConstructor {
    #[pyo3(signature = (name=None))]
    fn __call__<'py>(&self, py: Python<'py>, name: Option<String>) -> PyResult<Bound<'py, HostProxy>> {
        let Some(task) = running_task(py)? else {
            return Err(PyRuntimeError::new_err(format!(
                "{}(name) --> can not find a running parent task!",
                self.class_name
            )));
        };
        let name = name.unwrap_or_else(|| self.class_name.clone());
        let calculator = self.factory.create(&self.class_name, &name)?;
        task.append_child(Arc::clone(&calculator))?;
        HostProxy::wrap(py, &calculator)
    }

    fn __repr__(&self) -> String {
        format!("<calculator constructor {}>", self.class_name)
    }
}

// =============================================================================
// Shared functions
// =============================================================================

/// Access to the functions host modules share, bound into every context as
/// `call_shared_function`, `shared_function` and `shared_function_ids`.
#[pyclass(name = "SharedFunctions", module = "hostpy", frozen)]
pub struct SharedFunctions {
    app: Option<Arc<dyn HostApplication>>,
}

impl SharedFunctions {
    pub(crate) fn new(app: Option<Arc<dyn HostApplication>>) -> Self {
        Self { app }
    }

    fn lookup(&self, module_id: &str, function_id: &str) -> PyResult<SharedFunction> {
        self.app
            .as_ref()
            .and_then(|app| app.shared_function(module_id, function_id))
            .ok_or_else(|| PyNameError::new_err(format!("{module_id} has no shared function named {function_id}")))
    }
}

/// Converts the arguments, calls `function` and converts its result back.
fn call_shared<'py>(
    py: Python<'py>,
    function_id: &str,
    function: &SharedFunction,
    args: &Bound<'py, PyTuple>,
) -> PyResult<Bound<'py, PyAny>> {
    let converted = args
        .iter()
        .map(|arg| py_to_json(&arg))
        .collect::<PyResult<Vec<_>>>()
        .map_err(|_| {
            PyTypeError::new_err(format!(
                "Error occurred while calling {function_id}. Check the type and number of the passed arguments."
            ))
        })?;
    let result = function(&converted).map_err(|err| PyTypeError::new_err(err.to_string()))?;
    json_to_py(py, &result)
}

#[pymethods]
impl SharedFunctions {
    /// `call_shared_function(module_id, function_id, args)`
    #[pyo3(signature = (*args))]
    fn call_shared_function<'py>(&self, py: Python<'py>, args: &Bound<'py, PyTuple>) -> PyResult<Bound<'py, PyAny>> {
        if args.len() != 3 {
            return Err(PyValueError::new_err(format!(
                "call_shared_function(module_id: str, function_id: str, args: tuple) takes 3 positional arguments \
                 but {} were given",
                args.len()
            )));
        }
        let module_id: String = args.get_item(0)?.extract()?;
        let function_id: String = args.get_item(1)?.extract()?;
        let function = self.lookup(&module_id, &function_id)?;
        let call_args = args.get_item(2)?;
        let call_args = call_args
            .cast::<PyTuple>()
            .map_err(|_| PyTypeError::new_err("call_shared_function expects the arguments as a tuple"))?;
        call_shared(py, &function_id, &function, call_args)
    }

    /// `shared_function(module_id, function_id)`: a callable taking the function's arguments.
    fn shared_function(&self, module_id: String, function_id: String) -> PyResult<SharedFunctionHandle> {
        let function = self.lookup(&module_id, &function_id)?;
        Ok(SharedFunctionHandle {
            module_id,
            function_id,
            function,
        })
    }

    /// `shared_function_ids()`: one `{"module_id": .., "function_id": ..}` dict per function.
    fn shared_function_ids<'py>(&self, py: Python<'py>) -> PyResult<Vec<Bound<'py, PyDict>>> {
        let ids = self.app.as_ref().map(|app| app.shared_function_ids()).unwrap_or_default();
        ids.into_iter()
            .map(|id| {
                let dict = PyDict::new(py);
                dict.set_item("module_id", id.module_id)?;
                dict.set_item("function_id", id.function_id)?;
                Ok(dict)
            })
            .collect()
    }
}

/// One shared function, as returned by `shared_function`.
#[pyclass(name = "SharedFunction", module = "hostpy", frozen)]
pub struct SharedFunctionHandle {
    module_id: String,
    function_id: String,
    function: SharedFunction,
}

#[pymethods]
impl SharedFunctionHandle {
    #[pyo3(signature = (*args))]
    fn __call__<'py>(&self, py: Python<'py>, args: &Bound<'py, PyTuple>) -> PyResult<Bound<'py, PyAny>> {
        call_shared(py, &self.function_id, &self.function, args)
    }

    fn __repr__(&self) -> String {
        format!("<shared function {}.{}>", self.module_id, self.function_id)
    }
}
