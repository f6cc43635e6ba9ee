//! Runtime events and their subscribers.
//!
//! Every observable thing the runtime does (evaluation start/finish, context lifecycle, console
//! output, errors) is published as a [`RuntimeEvent`] through the runtime's [`EventHub`]. Any number
//! of [`RuntimeListener`]s can subscribe:
//!
//! | Listener | Purpose |
//! |----------|---------|
//! | closures | `Fn(&RuntimeEvent) + Send + Sync` implements the trait directly |
//! | [`RecordingListener`] | Collects every event, for tests and post-mortem inspection |
//! | [`ContextFollower`] | Forwards only events of followed contexts to an inner listener |

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};

use crate::context::ContextId;

/// Something observable happened in a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    EvaluationStarted { context: ContextId },
    EvaluationFinished { context: ContextId },
    ContextCreated { context: ContextId },
    ContextDeleted { context: ContextId },
    /// Text the script wrote to `sys.stdout`.
    OutputMessage { text: String, context: ContextId },
    /// Text the script (or the evaluator's error report) wrote to `sys.stderr`.
    ErrorMessage { text: String, context: ContextId },
    /// An error report referenced this line of the evaluated source.
    ErrorAtLine { line: u32, context: ContextId },
}

impl RuntimeEvent {
    /// The context the event belongs to.
    #[must_use]
    pub fn context(&self) -> ContextId {
        match self {
            Self::EvaluationStarted { context }
            | Self::EvaluationFinished { context }
            | Self::ContextCreated { context }
            | Self::ContextDeleted { context }
            | Self::OutputMessage { context, .. }
            | Self::ErrorMessage { context, .. }
            | Self::ErrorAtLine { context, .. } => *context,
        }
    }
}

/// Receives runtime events.
///
/// Called synchronously on the thread that produced the event, usually while an evaluation is
/// running. Implementations should hand heavy work off to another thread.
pub trait RuntimeListener: Send + Sync {
    fn on_event(&self, event: &RuntimeEvent);
}

impl<F> RuntimeListener for F
where
    F: Fn(&RuntimeEvent) + Send + Sync,
{
    fn on_event(&self, event: &RuntimeEvent) {
        self(event);
    }
}

/// Handle returned by [`EventHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out point for runtime events.
#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn RuntimeListener>)>>,
    next_id: AtomicU64,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; it sees every event emitted from now on.
    pub fn subscribe(&self, listener: Arc<dyn RuntimeListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers `event` to every listener.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or unsubscribe from
    /// inside `on_event`.
    pub fn emit(&self, event: &RuntimeEvent) {
        let listeners: Vec<Arc<dyn RuntimeListener>> =
            self.listeners.read().iter().map(|(_, listener)| Arc::clone(listener)).collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RecordingListener
// =============================================================================

/// Collects every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }

    /// Events recorded for one context.
    #[must_use]
    pub fn events_for(&self, context: ContextId) -> Vec<RuntimeEvent> {
        self.events.lock().iter().filter(|e| e.context() == context).cloned().collect()
    }

    /// Concatenated stdout text of one context.
    #[must_use]
    pub fn output_text(&self, context: ContextId) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::OutputMessage { text, context: c } if *c == context => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated stderr text of one context.
    #[must_use]
    pub fn error_text(&self, context: ContextId) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::ErrorMessage { text, context: c } if *c == context => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Drains the recorded events.
    pub fn take(&self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl RuntimeListener for RecordingListener {
    fn on_event(&self, event: &RuntimeEvent) {
        self.events.lock().push(event.clone());
    }
}

// =============================================================================
// ContextFollower
// =============================================================================

/// Forwards the events of a chosen set of contexts to an inner listener.
///
/// A console that should also show the output of, say, a running calculator context follows that
/// context in addition to its own.
pub struct ContextFollower {
    followed: RwLock<HashSet<ContextId>>,
    inner: Arc<dyn RuntimeListener>,
}

impl ContextFollower {
    pub fn new(inner: Arc<dyn RuntimeListener>, contexts: impl IntoIterator<Item = ContextId>) -> Self {
        Self {
            followed: RwLock::new(contexts.into_iter().collect()),
            inner,
        }
    }

    /// Starts forwarding events of `context`. Returns `false` if it was already followed.
    pub fn follow(&self, context: ContextId) -> bool {
        self.followed.write().insert(context)
    }

    /// Stops forwarding events of `context`. Returns `false` if it was not followed.
    pub fn unfollow(&self, context: ContextId) -> bool {
        self.followed.write().remove(&context)
    }

    #[must_use]
    pub fn is_following(&self, context: ContextId) -> bool {
        self.followed.read().contains(&context)
    }
}

impl RuntimeListener for ContextFollower {
    fn on_event(&self, event: &RuntimeEvent) {
        if self.is_following(event.context()) {
            self.inner.on_event(event);
        }
    }
}
