//! Running a script file in the batch context.

use std::{fs, io, path::Path};

use crate::{
    context::ContextKind,
    eval::{EvalError, EvalOptions},
    runtime::Runtime,
};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("ERROR: script file not found!")]
    NotFound,
    #[error("ERROR: could not open script file!")]
    Unreadable(#[source] io::Error),
    #[error("ERROR: empty script file!")]
    Empty,
    #[error("ERROR: script failed: {0}")]
    Failed(#[from] EvalError),
}

impl BatchError {
    /// Process exit status for this failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Failed(EvalError::Exit { code }) => u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1),
            _ => 1,
        }
    }
}

/// Reads `path` and evaluates it in the batch context, output mirrored to the runtime's
/// [`StreamMirror`](crate::StreamMirror).
pub fn run_batch(runtime: &Runtime, path: impl AsRef<Path>) -> Result<(), BatchError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(BatchError::NotFound);
    }
    let source = fs::read_to_string(path).map_err(BatchError::Unreadable)?;
    if source.trim().is_empty() {
        return Err(BatchError::Empty);
    }

    tracing::info!(script = %path.display(), "running batch script");
    runtime.evaluate(ContextKind::Batch.fixed_id(), &source, EvalOptions::default())?;
    Ok(())
}
