//! The `hostlog` module: logging functions for scripts.
//!
//! `info("text")` prints `[INFO]    text` to the context's console. When the calling namespace has
//! a truthy `__output_to_app__`, the message also goes to the host log through `tracing`. Called
//! without an argument each function returns a [`ScriptLogger`] that accepts values with `<<`:
//!
//! ```python
//! warning() << "mesh has " << 3 << " open edges"
//! ```

use pyo3::{prelude::*, types::PyModule};

use crate::metadata;

/// Namespace flag that mirrors script logging to the host log.
pub const HOST_LOGGING_FLAG: &str = "__output_to_app__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Console prefix, padded so messages line up.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Debug => "[DEBUG]   ",
            Self::Info => "[INFO]    ",
            Self::Warning => "[WARNING] ",
            Self::Error => "[ERROR]   ",
            Self::Fatal => "[FATAL]   ",
        }
    }
}

fn host_logging_enabled(py: Python<'_>) -> bool {
    let flag = || -> PyResult<bool> {
        let frame = py.import("sys")?.call_method1("_getframe", (0,))?;
        match frame.getattr("f_globals")?.get_item(HOST_LOGGING_FLAG) {
            Ok(value) => value.is_truthy(),
            Err(_) => Ok(false),
        }
    };
    flag().unwrap_or(false)
}

fn emit(py: Python<'_>, level: LogLevel, message: &str) -> PyResult<()> {
    let line = format!("{}{message}", level.prefix());
    py.import("builtins")?.call_method1("print", (line,))?;

    if host_logging_enabled(py) {
        let context = metadata::current().map(|m| m.context_name).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(target: "hostpy::script", %context, "{message}"),
            LogLevel::Info => tracing::info!(target: "hostpy::script", %context, "{message}"),
            LogLevel::Warning => tracing::warn!(target: "hostpy::script", %context, "{message}"),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(target: "hostpy::script", %context, "{message}"),
        }
    }
    Ok(())
}

fn log_or_logger(py: Python<'_>, level: LogLevel, message: Option<&Bound<'_, PyAny>>) -> PyResult<Py<PyAny>> {
    match message {
        Some(message) => {
            emit(py, level, &message.str()?.to_string())?;
            Ok(py.None())
        }
        None => Ok(Py::new(py, ScriptLogger { level })?.into_any()),
    }
}

/// Stream-style logger returned by the logging functions when called without a message.
#[pyclass(name = "Logger", module = "hostlog", frozen)]
#[derive(Debug)]
pub struct ScriptLogger {
    level: LogLevel,
}

#[pymethods]
impl ScriptLogger {
    fn __lshift__<'py>(slf: &Bound<'py, Self>, value: &Bound<'py, PyAny>) -> PyResult<Bound<'py, Self>> {
        emit(slf.py(), slf.get().level, &value.str()?.to_string())?;
        Ok(slf.clone())
    }

    fn __repr__(&self) -> String {
        format!("<Logger {}>", self.level.prefix().trim())
    }
}

#[pyfunction]
#[pyo3(signature = (message=None))]
fn debug(py: Python<'_>, message: Option<&Bound<'_, PyAny>>) -> PyResult<Py<PyAny>> {
    log_or_logger(py, LogLevel::Debug, message)
}

#[pyfunction]
#[pyo3(signature = (message=None))]
fn info(py: Python<'_>, message: Option<&Bound<'_, PyAny>>) -> PyResult<Py<PyAny>> {
    log_or_logger(py, LogLevel::Info, message)
}

#[pyfunction]
#[pyo3(signature = (message=None))]
fn warning(py: Python<'_>, message: Option<&Bound<'_, PyAny>>) -> PyResult<Py<PyAny>> {
    log_or_logger(py, LogLevel::Warning, message)
}

#[pyfunction]
#[pyo3(signature = (message=None))]
fn error(py: Python<'_>, message: Option<&Bound<'_, PyAny>>) -> PyResult<Py<PyAny>> {
    log_or_logger(py, LogLevel::Error, message)
}

#[pyfunction]
#[pyo3(signature = (message=None))]
fn fatal(py: Python<'_>, message: Option<&Bound<'_, PyAny>>) -> PyResult<Py<PyAny>> {
    log_or_logger(py, LogLevel::Fatal, message)
}

/// Builds the `hostlog` module.
pub(crate) fn build_module(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let module = PyModule::new(py, "hostlog")?;
    module.add_class::<ScriptLogger>()?;
    module.add_function(wrap_pyfunction!(debug, &module)?)?;
    module.add_function(wrap_pyfunction!(info, &module)?)?;
    module.add_function(wrap_pyfunction!(warning, &module)?)?;
    module.add_function(wrap_pyfunction!(error, &module)?)?;
    module.add_function(wrap_pyfunction!(fatal, &module)?)?;
    Ok(module)
}
