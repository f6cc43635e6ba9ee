//! Context identity and the per-kind configuration table.

use std::fmt;

use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

/// Identifier of a script context.
///
/// Ids `0..ContextKind::COUNT` belong to the fixed contexts (the id equals the kind's position);
/// dynamic contexts get ids above that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    /// Creates a context id from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this id belongs to one of the fixed contexts.
    #[must_use]
    pub const fn is_fixed(self) -> bool {
        (self.0 as usize) < ContextKind::COUNT
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kinds of script context. Declaration order is the fixed-context id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, IntoStaticStr)]
pub enum ContextKind {
    Batch,
    Global,
    ScriptEditor,
    CalculatorRun,
    TaskEditor,
    TaskRun,
    Collection,
}

impl ContextKind {
    /// Id of the fixed context of this kind.
    #[must_use]
    pub const fn fixed_id(self) -> ContextId {
        ContextId(self as u32)
    }

    /// Kind of the fixed context with the given id, if `id` is a fixed id.
    #[must_use]
    pub fn of_fixed(id: ContextId) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|kind| kind.fixed_id() == id)
    }

    /// Namespace name of the fixed context of this kind, e.g. `BatchContext`.
    #[must_use]
    pub fn fixed_name(self) -> String {
        format!("{self}Context")
    }

    /// Namespace name of a dynamic context of this kind, e.g. `TaskRun_9`.
    #[must_use]
    pub fn dynamic_name(self, id: ContextId) -> String {
        format!("{self}_{id}")
    }

    /// The configuration row applied to every context of this kind.
    #[must_use]
    pub fn profile(self) -> &'static KindProfile {
        &PROFILES[self as usize]
    }
}

/// Declarative configuration of one context kind.
///
/// Adding a kind means adding a variant to [`ContextKind`] and a row to the table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    /// Bind `HostObject` and the `hostlog` functions.
    pub base_imports: bool,
    /// Initial value of the namespace flag that mirrors script logging to the host log.
    pub host_logging: bool,
    /// Expose calculator constructors and calculator completions.
    pub calculators: bool,
    /// Bind `app`, `current_project()` and `open_project()`.
    pub app_bindings: bool,
    /// Make sure `sys.argv[0]` exists.
    pub argv_placeholder: bool,
    /// Bind the `project_path()` helper.
    pub path_helpers: bool,
}

const fn row(base_imports: bool, host_logging: bool, calculators: bool, app_bindings: bool) -> KindProfile {
    KindProfile {
        base_imports,
        host_logging,
        calculators,
        app_bindings,
        argv_placeholder: false,
        path_helpers: true,
    }
}

const PROFILES: [KindProfile; ContextKind::COUNT] = [
    // Batch
    row(true, true, false, true),
    // Global
    KindProfile {
        argv_placeholder: true,
        ..row(true, true, false, true)
    },
    // ScriptEditor
    row(true, false, false, false),
    // CalculatorRun
    row(true, true, false, false),
    // TaskEditor
    row(true, false, true, false),
    // TaskRun
    row(true, true, true, false),
    // Collection
    row(false, false, false, false),
];

/// Snapshot of a registered context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub id: ContextId,
    pub kind: ContextKind,
    pub name: String,
}
