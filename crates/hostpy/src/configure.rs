//! Building a context namespace from its kind's configuration row.
//!
//! Configuration problems (a missing host application, a calculator class that cannot be bound)
//! are logged and the step is skipped; the namespace stays usable.

use std::sync::Arc;

use pyo3::{prelude::*, types::PyModule};

use crate::{
    bindings::{AppHandle, CalculatorConstructor, ProjectPath, SharedFunctions},
    context::{ContextKind, KindProfile},
    host::{CalculatorFactory, CalculatorInfo, HostApplication},
    proxy::HostProxy,
    script_log::{self, HOST_LOGGING_FLAG},
};

/// Host capabilities bound into namespaces.
#[derive(Clone, Default)]
pub(crate) struct HostBindings {
    pub app: Option<Arc<dyn HostApplication>>,
    pub calculators: Option<Arc<dyn CalculatorFactory>>,
    /// Expose unreleased calculators as well.
    pub dev_mode: bool,
}

impl HostBindings {
    /// Calculators scripts may construct and complete.
    pub fn visible_calculators(&self) -> Vec<CalculatorInfo> {
        let Some(factory) = &self.calculators else {
            return Vec::new();
        };
        factory
            .calculators()
            .into_iter()
            .filter(|info| info.released || self.dev_mode)
            .collect()
    }
}

/// Creates the namespace of a context and applies its kind's configuration.
///
/// The module is registered in `sys.modules` as `None`, so `import <name>` cannot reach it.
pub(crate) fn build_namespace<'py>(
    py: Python<'py>,
    name: &str,
    kind: ContextKind,
    bindings: &HostBindings,
) -> PyResult<Bound<'py, PyModule>> {
    let namespace = PyModule::new(py, name)?;
    py.import("sys")?.getattr("modules")?.set_item(name, py.None())?;
    apply_profile(py, &namespace, kind, bindings);
    tracing::debug!(context = name, %kind, "built context namespace");
    Ok(namespace)
}

/// Removes the `sys.modules` placeholder of a deleted context.
pub(crate) fn unregister_namespace(py: Python<'_>, name: &str) {
    let result = py
        .import("sys")
        .and_then(|sys| sys.getattr("modules"))
        .and_then(|modules| modules.del_item(name));
    if let Err(err) = result {
        tracing::debug!(context = name, error = %err, "namespace was not registered in sys.modules");
    }
}

fn apply_profile(py: Python<'_>, namespace: &Bound<'_, PyModule>, kind: ContextKind, bindings: &HostBindings) {
    let profile = kind.profile();
    let steps: [(&str, fn(Python<'_>, &Bound<'_, PyModule>, &KindProfile, &HostBindings) -> PyResult<()>); 6] = [
        ("shared functions", bind_shared_functions),
        ("path helpers", bind_path_helpers),
        ("base imports", bind_base_imports),
        ("app bindings", bind_application),
        ("argv placeholder", ensure_argv),
        ("calculators", bind_calculators),
    ];
    for (step, apply) in steps {
        if let Err(err) = apply(py, namespace, profile, bindings) {
            tracing::warn!(%kind, step, error = %err, "context configuration step failed");
        }
    }
}

/// Bound in every context, with or without a host application.
fn bind_shared_functions(
    py: Python<'_>,
    namespace: &Bound<'_, PyModule>,
    _profile: &KindProfile,
    bindings: &HostBindings,
) -> PyResult<()> {
    let shared = Bound::new(py, SharedFunctions::new(bindings.app.clone()))?;
    for function in ["call_shared_function", "shared_function", "shared_function_ids"] {
        namespace.add(function, shared.getattr(function)?)?;
    }
    Ok(())
}

fn bind_path_helpers(
    py: Python<'_>,
    namespace: &Bound<'_, PyModule>,
    profile: &KindProfile,
    bindings: &HostBindings,
) -> PyResult<()> {
    if profile.path_helpers {
        namespace.add("project_path", Bound::new(py, ProjectPath::new(bindings.app.clone()))?)?;
    }
    Ok(())
}

fn bind_base_imports(
    py: Python<'_>,
    namespace: &Bound<'_, PyModule>,
    profile: &KindProfile,
    _bindings: &HostBindings,
) -> PyResult<()> {
    namespace.add(HOST_LOGGING_FLAG, profile.host_logging)?;
    if !profile.base_imports {
        return Ok(());
    }
    namespace.add("HostObject", py.get_type::<HostProxy>())?;
    let hostlog = py.import("hostlog").or_else(|_| script_log::build_module(py))?;
    for function in ["debug", "info", "warning", "error", "fatal"] {
        namespace.add(function, hostlog.getattr(function)?)?;
    }
    Ok(())
}

fn bind_application(
    py: Python<'_>,
    namespace: &Bound<'_, PyModule>,
    profile: &KindProfile,
    bindings: &HostBindings,
) -> PyResult<()> {
    if !profile.app_bindings {
        return Ok(());
    }
    let Some(app) = &bindings.app else {
        tracing::warn!(context = %namespace.name()?, "no host application, skipping app bindings");
        return Ok(());
    };
    let handle = Bound::new(py, AppHandle::new(Arc::clone(app)))?;
    namespace.add("current_project", handle.getattr("current_project")?)?;
    namespace.add("open_project", handle.getattr("open_project")?)?;
    namespace.add("app", handle)?;
    Ok(())
}

fn ensure_argv(
    py: Python<'_>,
    _namespace: &Bound<'_, PyModule>,
    profile: &KindProfile,
    _bindings: &HostBindings,
) -> PyResult<()> {
    if !profile.argv_placeholder {
        return Ok(());
    }
    let sys = py.import("sys")?;
    let has_argv = sys.hasattr("argv")? && sys.getattr("argv")?.len()? > 0;
    if !has_argv {
        sys.setattr("argv", vec![""])?;
    }
    Ok(())
}

fn bind_calculators(
    py: Python<'_>,
    namespace: &Bound<'_, PyModule>,
    profile: &KindProfile,
    bindings: &HostBindings,
) -> PyResult<()> {
    if !profile.calculators {
        return Ok(());
    }
    let Some(factory) = &bindings.calculators else {
        tracing::debug!(context = %namespace.name()?, "no calculator factory, no constructors bound");
        return Ok(());
    };
    for info in bindings.visible_calculators() {
        let constructor = CalculatorConstructor::new(info.class_name.clone(), Arc::clone(factory));
        namespace.add(info.class_name.as_str(), Bound::new(py, constructor)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticCalculatorCatalog;

    fn bindings() -> HostBindings {
        HostBindings {
            app: None,
            calculators: Some(Arc::new(
                StaticCalculatorCatalog::new()
                    .with("mesh", "MeshCalculator", true)
                    .with("beta", "BetaCalculator", false),
            )),
            dev_mode: false,
        }
    }

    #[test]
    fn namespaces_are_not_importable() {
        Python::attach(|py| {
            crate::bindings::install(py).unwrap();
            build_namespace(py, "ConfigureTest_1", ContextKind::ScriptEditor, &bindings()).unwrap();
            let imported = py.import("ConfigureTest_1");
            assert!(imported.is_err());
            unregister_namespace(py, "ConfigureTest_1");
        });
    }

    #[test]
    fn rows_decide_the_bindings() {
        Python::attach(|py| {
            crate::bindings::install(py).unwrap();
            let task = build_namespace(py, "ConfigureTest_2", ContextKind::TaskRun, &bindings()).unwrap();
            assert!(task.hasattr("MeshCalculator").unwrap());
            assert!(!task.hasattr("BetaCalculator").unwrap());
            assert!(task.hasattr("info").unwrap());
            assert!(task.getattr(HOST_LOGGING_FLAG).unwrap().is_truthy().unwrap());

            let collection = build_namespace(py, "ConfigureTest_3", ContextKind::Collection, &bindings()).unwrap();
            assert!(!collection.hasattr("info").unwrap());
            assert!(collection.hasattr("call_shared_function").unwrap());
            assert!(!collection.hasattr("MeshCalculator").unwrap());

            // the batch row asks for app bindings, which are skipped without an application
            let batch = build_namespace(py, "ConfigureTest_4", ContextKind::Batch, &bindings()).unwrap();
            assert!(!batch.hasattr("app").unwrap());
            assert!(batch.hasattr("project_path").unwrap());
        });
    }

    #[test]
    fn dev_mode_shows_unreleased_calculators() {
        let mut dev = bindings();
        dev.dev_mode = true;
        let ids: Vec<String> = dev.visible_calculators().into_iter().map(|info| info.id).collect();
        assert_eq!(ids, vec!["mesh", "beta"]);
    }
}
