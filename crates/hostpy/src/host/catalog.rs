use std::sync::Arc;

use super::{CalculatorFactory, CalculatorInfo, HostError, HostObject, ObjectNode};

/// A fixed list of calculators, each created as a bare [`ObjectNode`] of its class.
#[derive(Debug, Clone, Default)]
pub struct StaticCalculatorCatalog {
    entries: Vec<CalculatorInfo>,
}

impl StaticCalculatorCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, id: impl Into<String>, class_name: impl Into<String>, released: bool) -> Self {
        self.entries.push(CalculatorInfo {
            id: id.into(),
            class_name: class_name.into(),
            released,
        });
        self
    }
}

impl CalculatorFactory for StaticCalculatorCatalog {
    fn calculators(&self) -> Vec<CalculatorInfo> {
        self.entries.clone()
    }

    fn create(&self, class_name: &str, name: &str) -> Result<Arc<dyn HostObject>, HostError> {
        if !self.entries.iter().any(|entry| entry.class_name == class_name) {
            return Err(HostError::UnsupportedChild {
                class: "calculator catalog".to_owned(),
                type_id: class_name.to_owned(),
            });
        }
        Ok(ObjectNode::new(class_name, name))
    }
}
