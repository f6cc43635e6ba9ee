//! Bookkeeping of the contexts of one runtime.
//!
//! The registry only stores handles; it never calls into Python. The runtime builds namespaces
//! outside the registry lock and inserts them afterwards.

use std::collections::BTreeMap;

use indexmap::IndexSet;
use pyo3::{prelude::*, types::PyModule};
use strum::EnumCount;

use crate::context::{ContextId, ContextInfo, ContextKind};

#[derive(Debug)]
pub(crate) struct ContextEntry {
    pub info: ContextInfo,
    pub namespace: Py<PyModule>,
    /// Names bound through `add_object` with tracking, removable with `remove_object`.
    pub added: IndexSet<String>,
}

impl ContextEntry {
    pub fn new(info: ContextInfo, namespace: Py<PyModule>) -> Self {
        Self {
            info,
            namespace,
            added: IndexSet::new(),
        }
    }

    /// Whether scripts in this context can construct calculators.
    pub fn calculator_accessible(&self) -> bool {
        self.info.kind.profile().calculators
    }
}

#[derive(Debug)]
pub(crate) struct ContextRegistry {
    entries: BTreeMap<ContextId, ContextEntry>,
    initialized: bool,
    /// Lowest id the next dynamic context may get. Never decreases.
    next_dynamic: u32,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            initialized: false,
            next_dynamic: ContextKind::COUNT as u32,
        }
    }
}

impl ContextRegistry {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Reserves the id for a new dynamic context: above every id ever handed out.
    pub fn allocate_id(&mut self) -> ContextId {
        let above_existing = self.entries.keys().next_back().map_or(0, |id| id.raw() + 1);
        let raw = self.next_dynamic.max(above_existing);
        self.next_dynamic = raw + 1;
        ContextId::new(raw)
    }

    /// Stores `entry`, replacing (and returning) any context with the same id.
    pub fn insert(&mut self, entry: ContextEntry) -> Option<ContextEntry> {
        self.entries.insert(entry.info.id, entry)
    }

    /// Removes a dynamic context. Fixed contexts are never removed.
    pub fn remove(&mut self, id: ContextId) -> Option<ContextEntry> {
        if id.is_fixed() {
            return None;
        }
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ContextId) -> Option<&ContextEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut ContextEntry> {
        self.entries.get_mut(&id)
    }

    /// A new reference to the namespace of `id`.
    pub fn namespace(&self, py: Python<'_>, id: ContextId) -> Option<Py<PyModule>> {
        self.entries.get(&id).map(|entry| entry.namespace.clone_ref(py))
    }

    pub fn info(&self, id: ContextId) -> Option<ContextInfo> {
        self.entries.get(&id).map(|entry| entry.info.clone())
    }

    pub fn id_by_name(&self, name: &str) -> Option<ContextId> {
        self.entries.values().find(|entry| entry.info.name == name).map(|entry| entry.info.id)
    }

    pub fn ids(&self) -> Vec<ContextId> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(py: Python<'_>, id: u32, kind: ContextKind) -> ContextEntry {
        let id = ContextId::new(id);
        let name = kind.dynamic_name(id);
        let namespace = PyModule::new(py, &name).unwrap().unbind();
        ContextEntry::new(ContextInfo { id, kind, name }, namespace)
    }

    #[test]
    fn dynamic_ids_start_after_fixed_ids() {
        let mut registry = ContextRegistry::default();
        assert_eq!(registry.allocate_id(), ContextId::new(7));
        assert_eq!(registry.allocate_id(), ContextId::new(8));
    }

    #[test]
    fn ids_are_not_reused_after_deleting_the_highest() {
        Python::attach(|py| {
            let mut registry = ContextRegistry::default();
            let first = registry.allocate_id();
            registry.insert(entry(py, first.raw(), ContextKind::TaskRun));
            assert!(registry.remove(first).is_some());
            let second = registry.allocate_id();
            assert!(second > first);
        });
    }

    #[test]
    fn ids_stay_above_inserted_entries() {
        Python::attach(|py| {
            let mut registry = ContextRegistry::default();
            registry.insert(entry(py, 20, ContextKind::CalculatorRun));
            assert_eq!(registry.allocate_id(), ContextId::new(21));
        });
    }

    #[test]
    fn fixed_contexts_cannot_be_removed() {
        Python::attach(|py| {
            let mut registry = ContextRegistry::default();
            registry.insert(entry(py, 1, ContextKind::Global));
            assert!(registry.remove(ContextId::new(1)).is_none());
            assert!(registry.get(ContextId::new(1)).is_some());
        });
    }

    #[test]
    fn lookup_by_name() {
        Python::attach(|py| {
            let mut registry = ContextRegistry::default();
            registry.insert(entry(py, 9, ContextKind::TaskEditor));
            assert_eq!(registry.id_by_name("TaskEditor_9"), Some(ContextId::new(9)));
            assert_eq!(registry.id_by_name("TaskEditor_10"), None);
            assert_eq!(registry.ids(), vec![ContextId::new(9)]);
            assert!(registry.get(ContextId::new(9)).unwrap().calculator_accessible());
        });
    }
}
