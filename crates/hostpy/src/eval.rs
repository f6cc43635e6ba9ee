//! Compiling and running source text in a namespace, and classifying failures.

use pyo3::{
    exceptions::{PyKeyboardInterrupt, PySystemExit},
    prelude::*,
    types::PyModule,
};

use crate::{context::ContextId, redirect::SCRIPT_FILENAME};

/// How source text is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalMode {
    /// Any number of statements (`exec` mode).
    #[default]
    Statements,
    /// A single interactive statement; expression values are echoed (`single` mode).
    SingleExpr,
}

impl EvalMode {
    fn compile_mode(self) -> &'static str {
        match self {
            Self::Statements => "exec",
            Self::SingleExpr => "single",
        }
    }
}

/// Options of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Publish stdout and the started/finished events.
    pub output: bool,
    /// Publish error reports.
    pub error_message: bool,
    pub mode: EvalMode,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            output: true,
            error_message: true,
            mode: EvalMode::Statements,
        }
    }
}

impl EvalOptions {
    /// Options that publish nothing.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            output: false,
            error_message: false,
            mode: EvalMode::Statements,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: bool) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_error_message(mut self, error_message: bool) -> Self {
        self.error_message = error_message;
        self
    }
}

/// Why an evaluation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("no context with id {0}")]
    UnknownContext(ContextId),
    /// The source raised an exception (including syntax errors).
    #[error("{type_name}: {message}")]
    Exception {
        type_name: String,
        message: String,
        /// Line of the evaluated source the innermost traceback entry points at.
        line: Option<u32>,
    },
    /// The evaluation was cancelled with an interrupt.
    #[error("evaluation interrupted")]
    Interrupted,
    /// The source called `sys.exit` with a non-zero status.
    #[error("script exited with status {code}")]
    Exit { code: i32 },
}

impl EvalError {
    /// Whether the failure was a cancellation rather than an error in the script.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Compiles `source` as `<string>` and executes it with the namespace's dict as globals.
pub(crate) fn run_source(py: Python<'_>, namespace: &Bound<'_, PyModule>, source: &str, mode: EvalMode) -> PyResult<()> {
    let builtins = py.import("builtins")?;
    let code = builtins
        .getattr("compile")?
        .call1((source, SCRIPT_FILENAME, mode.compile_mode()))?;
    builtins.getattr("exec")?.call1((code, namespace.dict()))?;
    Ok(())
}

/// What the evaluator should do with a raised exception.
pub(crate) enum Failure {
    /// `sys.exit(0)` / `sys.exit()`: not a failure at all.
    CleanExit,
    /// A failure, with the report to write to the error stream (if any).
    Failed { error: EvalError, report: Option<String> },
}

/// Classifies an exception raised by [`run_source`].
pub(crate) fn classify(py: Python<'_>, err: &PyErr) -> Failure {
    if err.is_instance_of::<PySystemExit>(py) {
        let code = err.value(py).getattr("code").ok();
        return match code {
            None => Failure::CleanExit,
            Some(code) if code.is_none() => Failure::CleanExit,
            Some(code) => match code.extract::<i32>() {
                Ok(0) => Failure::CleanExit,
                Ok(code) => Failure::Failed {
                    error: EvalError::Exit { code },
                    report: None,
                },
                // `sys.exit("message")` prints the message and exits with 1
                Err(_) => Failure::Failed {
                    error: EvalError::Exit { code: 1 },
                    report: code.str().ok().map(|text| format!("{text}\n")),
                },
            },
        };
    }

    let report = format_exception(py, err);
    if err.is_instance_of::<PyKeyboardInterrupt>(py) {
        return Failure::Failed {
            error: EvalError::Interrupted,
            report,
        };
    }
    let type_name = err
        .get_type(py)
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "Exception".to_owned());
    let message = err
        .value(py)
        .str()
        .map(|text| text.to_string())
        .unwrap_or_default();
    let line = report.as_deref().and_then(crate::redirect::error_line);
    Failure::Failed {
        error: EvalError::Exception {
            type_name,
            message,
            line,
        },
        report,
    }
}

/// The usual `Traceback (most recent call last): ...` text.
fn format_exception(py: Python<'_>, err: &PyErr) -> Option<String> {
    let format = || -> PyResult<String> {
        let value = err.value(py);
        let lines = py.import("traceback")?.getattr("format_exception")?.call1((
            value.get_type(),
            value,
            value.getattr("__traceback__")?,
        ))?;
        let mut text = String::new();
        for line in lines.try_iter()? {
            text.push_str(&line?.extract::<String>()?);
        }
        Ok(text)
    };
    match format() {
        Ok(text) => Some(text),
        Err(format_err) => {
            tracing::warn!(error = %format_err, "could not format a script exception");
            Some(format!("{err}\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_point_at_their_line() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "eval_test_syntax").unwrap();
            let err = run_source(py, &namespace, "a = 1\nb = (\n", EvalMode::Statements).unwrap_err();
            let Failure::Failed { error, report } = classify(py, &err) else {
                panic!("syntax error must fail");
            };
            assert!(matches!(error, EvalError::Exception { ref type_name, .. } if type_name == "SyntaxError"));
            assert!(report.unwrap().contains("SyntaxError"));
        });
    }

    #[test]
    fn runtime_errors_carry_the_innermost_line() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "eval_test_runtime").unwrap();
            let source = "def f():\n    return 1 / 0\n\nf()\n";
            let err = run_source(py, &namespace, source, EvalMode::Statements).unwrap_err();
            let Failure::Failed { error, .. } = classify(py, &err) else {
                panic!("division by zero must fail");
            };
            assert_eq!(
                error,
                EvalError::Exception {
                    type_name: "ZeroDivisionError".to_owned(),
                    message: "division by zero".to_owned(),
                    line: Some(2),
                }
            );
        });
    }

    #[test]
    fn exit_codes() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "eval_test_exit").unwrap();
            let clean = run_source(py, &namespace, "import sys\nsys.exit(0)", EvalMode::Statements).unwrap_err();
            assert!(matches!(classify(py, &clean), Failure::CleanExit));
            let failed = run_source(py, &namespace, "import sys\nsys.exit(3)", EvalMode::Statements).unwrap_err();
            assert!(matches!(
                classify(py, &failed),
                Failure::Failed {
                    error: EvalError::Exit { code: 3 },
                    ..
                }
            ));
        });
    }
}
