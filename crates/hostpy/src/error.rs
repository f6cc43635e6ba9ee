use pyo3::PyErr;

use crate::{config::ConfigError, context::ContextId};

/// Failures of registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no context with id {0}")]
    UnknownContext(ContextId),
    #[error("invalid object name {0:?}")]
    InvalidName(String),
    #[error("the name {name:?} is already in use in context {context}")]
    NameInUse { context: ContextId, name: String },
    #[error("{name:?} was not added to context {context}")]
    NotTracked { context: ContextId, name: String },
    #[error("context {0} cannot construct calculators")]
    NoCalculators(ContextId),
    #[error(transparent)]
    Python(#[from] PyErr),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
