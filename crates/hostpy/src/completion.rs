//! Completion candidates from live reflection over a context's values.
//!
//! [`complete`] resolves the input against the context namespace and lists what can follow it.
//! Host-object proxies get a richer listing than plain Python values: one candidate per live
//! child and three per property (lookup, value, setter template).

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use pyo3::{
    prelude::*,
    sync::PyOnceLock,
    types::{PyDict, PyModule},
};
use regex::Regex;
use serde::Serialize;

use crate::{
    eval::{EvalMode, run_source},
    host::{CalculatorInfo, HostObject},
    proxy::HostProxy,
};

/// Throwaway variable the speculative evaluation assigns to.
const PROBE_VARIABLE: &str = "__completion_probe__";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// What a candidate stands for; lets editors pick an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CandidateKind {
    Keyword,
    Builtin,
    Module,
    Callable,
    Attribute,
    Calculator,
    Child,
    Property,
    Helper,
}

/// One suggested insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionCandidate {
    /// Display name, also the (case-insensitive) deduplication key.
    pub name: String,
    pub insertion_text: String,
    pub tooltip: String,
    /// How many characters from the end of `insertion_text` the cursor lands.
    pub cursor_offset: usize,
    pub kind: CandidateKind,
}

impl CompletionCandidate {
    fn new(kind: CandidateKind, name: impl Into<String>, insertion_text: impl Into<String>) -> Self {
        let name = name.into();
        let insertion_text = insertion_text.into();
        Self {
            tooltip: name.clone(),
            name,
            insertion_text,
            cursor_offset: 0,
            kind,
        }
    }

    fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = tooltip.into();
        self
    }

    fn with_cursor_offset(mut self, offset: usize) -> Self {
        self.cursor_offset = offset;
        self
    }

    fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Candidates keyed case-insensitively; a later insert replaces an earlier one.
#[derive(Debug, Default)]
struct CandidateSet(IndexMap<String, CompletionCandidate>);

impl CandidateSet {
    fn insert(&mut self, candidate: CompletionCandidate) {
        self.0.insert(candidate.key(), candidate);
    }

    /// Inserts without displacing a candidate of another kind that has the same key.
    fn insert_beside(&mut self, candidate: CompletionCandidate) {
        let key = candidate.key();
        match self.0.get(&key) {
            Some(existing) if existing.kind != candidate.kind => {
                self.0.insert(format!("{key}\u{0}{}", candidate.kind), candidate);
            }
            _ => {
                self.0.insert(key, candidate);
            }
        }
    }

    fn extend(&mut self, candidates: impl IntoIterator<Item = CompletionCandidate>) {
        for candidate in candidates {
            self.insert(candidate);
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_lowercase())
    }

    fn retain_prefix(&mut self, prefix: &str) {
        let prefix = prefix.to_lowercase();
        self.0.retain(|key, _| key.starts_with(&prefix));
    }

    fn into_sorted(mut self) -> Vec<CompletionCandidate> {
        self.0.sort_unstable_keys();
        self.0.into_values().collect()
    }
}

/// Context-dependent inputs of a completion request.
#[derive(Debug, Default)]
pub(crate) struct CompletionScope {
    /// Calculator shortcuts; empty unless the context is calculator-accessible.
    pub calculators: Vec<CalculatorInfo>,
    pub include_modules: bool,
}

/// Lists completions for `input` in `namespace`.
pub(crate) fn complete(
    py: Python<'_>,
    namespace: &Bound<'_, PyModule>,
    input: &str,
    scope: &CompletionScope,
) -> Vec<CompletionCandidate> {
    let input = input.trim();
    if input.is_empty() {
        return top_level(py, namespace, scope).into_sorted();
    }

    if let Some(value) = resolve(py, namespace, input) {
        return introspect(&value).into_sorted();
    }

    let candidates = match input.rsplit_once('.') {
        Some((base, rest)) => {
            let Some(value) = resolve(py, namespace, base) else {
                return Vec::new();
            };
            let mut members = introspect(&value);
            members.retain_prefix(rest);
            members
        }
        None => {
            let mut all = top_level(py, namespace, scope);
            all.retain_prefix(input);
            all
        }
    };
    if candidates.0.is_empty() {
        tracing::trace!(input, "no completions");
    }
    candidates.into_sorted()
}

/// Everything visible without a prefix: namespace members, calculator shortcuts, built-ins and
/// keywords, and optionally importable modules.
fn top_level(py: Python<'_>, namespace: &Bound<'_, PyModule>, scope: &CompletionScope) -> CandidateSet {
    let mut candidates = introspect(namespace.dict().as_any());
    candidates.extend(scope.calculators.iter().map(calculator_candidate));
    candidates.extend(builtin_candidates(py).iter().cloned());
    candidates.extend(keyword_candidates());
    if scope.include_modules {
        candidates.extend(module_candidates(py).iter().cloned());
    }
    candidates
}

/// Looks `expr` up directly, then by assigning it to a throwaway variable.
fn resolve<'py>(py: Python<'py>, namespace: &Bound<'py, PyModule>, expr: &str) -> Option<Bound<'py, PyAny>> {
    let globals = namespace.dict();
    if IDENTIFIER.is_match(expr)
        && let Ok(Some(value)) = globals.get_item(expr)
    {
        return Some(value);
    }
    if expr.contains('\n') {
        return None;
    }

    let probe = format!("{PROBE_VARIABLE} = {expr}");
    let value = match run_source(py, namespace, &probe, EvalMode::SingleExpr) {
        Ok(()) => globals.get_item(PROBE_VARIABLE).ok().flatten(),
        Err(err) => {
            tracing::trace!(expr, error = %err, "completion probe did not resolve");
            None
        }
    };
    let _ = globals.del_item(PROBE_VARIABLE);
    value
}

/// Members of `value`, skipping `_`-prefixed names. Proxies are expanded into children and
/// properties.
fn introspect(value: &Bound<'_, PyAny>) -> CandidateSet {
    if let Ok(proxy) = value.cast::<HostProxy>() {
        return match proxy.get().target() {
            Some(obj) => introspect_host_object(proxy, &obj),
            None => CandidateSet::default(),
        };
    }

    let mut candidates = CandidateSet::default();
    if let Ok(dict) = value.cast::<PyDict>() {
        for (key, member) in dict.iter() {
            if let Ok(name) = key.extract::<String>() {
                candidates.extend(member_candidate(&name, &member));
            }
        }
        return candidates;
    }

    let Ok(names) = value.dir() else {
        return candidates;
    };
    for name in names.iter().filter_map(|name| name.extract::<String>().ok()) {
        if name.starts_with('_') {
            continue;
        }
        if let Ok(member) = value.getattr(name.as_str()) {
            candidates.extend(member_candidate(&name, &member));
        }
    }
    candidates
}

fn member_candidate(name: &str, member: &Bound<'_, PyAny>) -> Option<CompletionCandidate> {
    if name.starts_with('_') {
        return None;
    }
    let candidate = if member.is_instance_of::<PyModule>() {
        CompletionCandidate::new(CandidateKind::Module, name, name).with_tooltip(format!("{name} [module]"))
    } else if member.is_callable() {
        let call = format!("{name}()");
        CompletionCandidate::new(CandidateKind::Callable, call.clone(), call)
    } else {
        CompletionCandidate::new(CandidateKind::Attribute, name, name)
    };
    Some(candidate)
}

fn introspect_host_object(proxy: &Bound<'_, HostProxy>, obj: &Arc<dyn HostObject>) -> CandidateSet {
    let mut candidates = CandidateSet::default();

    if let Ok(names) = proxy.get_type().dir() {
        for name in names.iter().filter_map(|name| name.extract::<String>().ok()) {
            if name.starts_with('_') || name == "children" {
                continue;
            }
            let call = format!("{name}()");
            candidates.insert(CompletionCandidate::new(CandidateKind::Callable, &name, call.clone()).with_tooltip(call));
        }
    }
    for helper in obj.helper_types() {
        let call = format!("create{helper}()");
        candidates.insert(
            CompletionCandidate::new(CandidateKind::Helper, format!("create{helper}"), call.clone())
                .with_tooltip(format!("{helper} {call}")),
        );
    }

    let children = obj.children();
    let mut seen = IndexMap::<String, usize>::new();
    for child in &children {
        *seen.entry(child.object_name().to_lowercase()).or_default() += 1;
    }
    for child in &children {
        let name = child.object_name();
        if name.is_empty() {
            continue;
        }
        let shared = candidates.contains(&name) || seen.get(&name.to_lowercase()).copied().unwrap_or(0) > 1;
        let class = child.class_name();
        let candidate = if shared {
            let insertion = format!("find_children(\"{name}\")");
            CompletionCandidate::new(CandidateKind::Child, &name, insertion.clone())
                .with_tooltip(format!("list[{class}] {insertion}"))
        } else if IDENTIFIER.is_match(&name) {
            CompletionCandidate::new(CandidateKind::Child, &name, &name).with_tooltip(format!("{class} {name}"))
        } else {
            let insertion = format!("find_child(\"{name}\")");
            CompletionCandidate::new(CandidateKind::Child, &name, insertion.clone())
                .with_tooltip(format!("{class} {insertion}"))
        };
        candidates.insert(candidate);
    }

    for descriptor in obj.properties() {
        let id = &descriptor.id;
        let name = &descriptor.name;
        let type_name = descriptor.kind.type_name();

        let find = format!("find_property(\"{id}\")");
        candidates.insert_beside(
            CompletionCandidate::new(CandidateKind::Property, name, find.clone()).with_tooltip(format!("dict {find}")),
        );
        let value = format!("property_value(\"{id}\")");
        candidates.insert_beside(
            CompletionCandidate::new(CandidateKind::Property, format!("{name} value"), value.clone())
                .with_tooltip(format!("{type_name} {value}")),
        );
        let setter = format!("set_property_value(\"{id}\", )");
        candidates.insert_beside(
            CompletionCandidate::new(CandidateKind::Property, format!("{name} set_value"), setter)
                .with_tooltip(format!("None set_property_value(\"{id}\", {type_name})"))
                .with_cursor_offset(1),
        );
    }

    tracing::trace!(object = %obj.object_name(), count = candidates.0.len(), "introspected host object");
    candidates
}

fn calculator_candidate(info: &CalculatorInfo) -> CompletionCandidate {
    let call = format!("{}(\"{}\")", info.class_name, info.id);
    CompletionCandidate::new(CandidateKind::Calculator, &info.id, call.clone()).with_tooltip(call)
}

fn keyword_candidates() -> Vec<CompletionCandidate> {
    vec![
        CompletionCandidate::new(CandidateKind::Keyword, "import", "import ").with_tooltip("import [keyword]"),
        CompletionCandidate::new(CandidateKind::Keyword, "from", "from ").with_tooltip("from [keyword]"),
        CompletionCandidate::new(CandidateKind::Keyword, "print()", "print()")
            .with_tooltip("print() [built-in]")
            .with_cursor_offset(1),
        CompletionCandidate::new(CandidateKind::Keyword, "for i in range():", "for i in range():").with_cursor_offset(2),
        CompletionCandidate::new(CandidateKind::Keyword, "for x in :", "for x in :").with_cursor_offset(1),
    ]
}

fn version_supported(py: Python<'_>) -> bool {
    py.version_info() >= (3, 7)
}

/// Built-in callables, computed once per process.
fn builtin_candidates(py: Python<'_>) -> &[CompletionCandidate] {
    static BUILTINS: PyOnceLock<Vec<CompletionCandidate>> = PyOnceLock::new();

    BUILTINS.get_or_init(py, || {
        if !version_supported(py) {
            tracing::warn!(version = %py.version(), "interpreter too old for built-in completions");
            return Vec::new();
        }
        let names = || -> PyResult<Vec<String>> { py.import("builtins")?.dir()?.extract() };
        names()
            .inspect_err(|err| tracing::warn!(error = %err, "could not list built-ins"))
            .unwrap_or_default()
            .into_iter()
            .filter(|name| !name.starts_with('_') && !name.starts_with(|c: char| c.is_uppercase()))
            .map(|name| {
                let call = format!("{name}()");
                CompletionCandidate::new(CandidateKind::Builtin, call.clone(), call.clone())
                    .with_tooltip(format!("{call} [built-in]"))
            })
            .collect()
    })
}

/// `import X` / `from X import ` for every importable module, computed once per process.
fn module_candidates(py: Python<'_>) -> &[CompletionCandidate] {
    static MODULES: PyOnceLock<Vec<CompletionCandidate>> = PyOnceLock::new();

    MODULES.get_or_init(py, || {
        if !version_supported(py) {
            return Vec::new();
        }
        let names = || -> PyResult<Vec<String>> {
            let mut names: Vec<String> = py.import("sys")?.getattr("builtin_module_names")?.extract()?;
            for info in py.import("pkgutil")?.call_method0("iter_modules")?.try_iter()? {
                names.push(info?.getattr("name")?.extract()?);
            }
            Ok(names)
        };
        let mut names = names()
            .inspect_err(|err| tracing::warn!(error = %err, "could not list importable modules"))
            .unwrap_or_default();
        names.retain(|name| !name.starts_with('_'));
        names.sort();
        names.dedup();
        names
            .into_iter()
            .flat_map(|name| {
                let import = format!("import {name}");
                let from = format!("from {name} import");
                let tooltip = format!("{name} [package]");
                [
                    CompletionCandidate::new(CandidateKind::Module, import.clone(), import)
                        .with_tooltip(tooltip.clone()),
                    CompletionCandidate::new(CandidateKind::Module, from.clone(), format!("{from} "))
                        .with_tooltip(tooltip),
                ]
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(candidates: &[CompletionCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn keywords_override_builtins() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "completion_test_keywords").unwrap();
            let all = complete(py, &namespace, "", &CompletionScope::default());
            let print = all.iter().find(|c| c.name == "print()").unwrap();
            assert_eq!(print.kind, CandidateKind::Keyword);
            assert_eq!(print.cursor_offset, 1);
            assert!(!names(&all).iter().any(|n| n.starts_with("ValueError")));
        });
    }

    #[test]
    fn bare_word_filters_case_insensitively() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "completion_test_filter").unwrap();
            namespace.add("Alpha", 1).unwrap();
            namespace.add("alphabet", 2).unwrap();
            namespace.add("beta", 3).unwrap();
            let found = complete(py, &namespace, "ALP", &CompletionScope::default());
            assert_eq!(names(&found), vec!["Alpha", "alphabet"]);
        });
    }

    #[test]
    fn dotted_input_filters_members() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "completion_test_dotted").unwrap();
            run_source(py, &namespace, "import math", EvalMode::Statements).unwrap();
            let found = complete(py, &namespace, "math.fl", &CompletionScope::default());
            assert_eq!(names(&found), vec!["floor()"]);
            assert!(namespace.dict().get_item(PROBE_VARIABLE).unwrap().is_none());
        });
    }

    #[test]
    fn resolved_expression_lists_members() {
        Python::attach(|py| {
            let namespace = PyModule::new(py, "completion_test_probe").unwrap();
            namespace.add("items", vec![1, 2]).unwrap();
            let found = complete(py, &namespace, "items[0:1]", &CompletionScope::default());
            assert!(names(&found).contains(&"append()"));
            assert!(namespace.dict().get_item(PROBE_VARIABLE).unwrap().is_none());
        });
    }
}
