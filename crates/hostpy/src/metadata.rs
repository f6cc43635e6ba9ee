//! Per-thread execution metadata.
//!
//! The interpreter's `sys.stdout`/`sys.stderr` are process-wide, so a write cannot tell by itself
//! which context produced it. The evaluator therefore records who is running on the current
//! thread in a thread-local slot before it executes anything, and the redirection sinks read it
//! back on every write. The slot only holds a value inside a [`MetadataScope`].

use std::{cell::RefCell, marker::PhantomData, sync::Arc};

use crate::{
    context::{ContextId, ContextKind},
    redirect::RedirectChannel,
};

thread_local! {
    static CURRENT: RefCell<Option<ExecutionMetadata>> = const { RefCell::new(None) };
}

/// Who is executing on this thread, and where its output should go.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub context: ContextId,
    pub context_name: String,
    pub kind: ContextKind,
    pub output_enabled: bool,
    pub error_enabled: bool,
    pub(crate) channel: Arc<RedirectChannel>,
}

/// Installs metadata for the current thread and restores the previous value on drop.
///
/// Scopes nest: an evaluation started from inside another evaluation on the same thread shadows
/// the outer metadata until it finishes.
#[must_use = "the metadata is removed again when the scope is dropped"]
pub struct MetadataScope {
    previous: Option<ExecutionMetadata>,
    // tied to the thread whose slot it restores
    _not_send: PhantomData<*const ()>,
}

impl MetadataScope {
    pub fn enter(metadata: ExecutionMetadata) -> Self {
        let previous = CURRENT.with(|slot| slot.replace(Some(metadata)));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for MetadataScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// The metadata of the current thread, if an evaluation is running on it.
#[must_use]
pub fn current() -> Option<ExecutionMetadata> {
    CURRENT.with(|slot| slot.borrow().clone())
}
