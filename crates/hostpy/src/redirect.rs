//! Capture of interpreter stdout/stderr.
//!
//! Two [`OutputSink`] objects replace `sys.stdout` and `sys.stderr` once per process. They carry no
//! state of their own: each write looks up the current thread's
//! [`ExecutionMetadata`](crate::metadata::ExecutionMetadata) and hands the text to the
//! [`RedirectChannel`] of the runtime that started the evaluation. The channel then either mirrors
//! the text to the process's own streams (batch contexts) or publishes it as an event.

use std::{
    io::Write as _,
    sync::{Arc, LazyLock},
};

use parking_lot::Mutex;
use pyo3::prelude::*;
use regex::Regex;

use crate::{
    context::ContextKind,
    events::{EventHub, RuntimeEvent},
    metadata::{self, ExecutionMetadata},
};

/// Marker the evaluator's compiled code carries in tracebacks.
pub const SCRIPT_FILENAME: &str = "<string>";

static LINE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""<string>", line (\d+)"#).expect("line marker pattern is valid"));

/// Which interpreter stream a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

/// Destination for text written by batch contexts.
pub trait StreamMirror: Send + Sync {
    fn write_out(&self, text: &str);
    fn write_err(&self, text: &str);
}

/// Mirrors to the process's own stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdMirror;

impl StreamMirror for StdMirror {
    fn write_out(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        // a closed pipe must not take the evaluation down with it
        let _ = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush());
    }

    fn write_err(&self, text: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes()).and_then(|()| stderr.flush());
    }
}

/// Collects mirrored text in memory.
#[derive(Debug, Default)]
pub struct CollectMirror {
    out: Mutex<String>,
    err: Mutex<String>,
}

impl CollectMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn out(&self) -> String {
        self.out.lock().clone()
    }

    #[must_use]
    pub fn err(&self) -> String {
        self.err.lock().clone()
    }
}

impl StreamMirror for CollectMirror {
    fn write_out(&self, text: &str) {
        self.out.lock().push_str(text);
    }

    fn write_err(&self, text: &str) {
        self.err.lock().push_str(text);
    }
}

/// Discards mirrored text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMirror;

impl StreamMirror for NoMirror {
    fn write_out(&self, _text: &str) {}

    fn write_err(&self, _text: &str) {}
}

/// Routes captured writes of one runtime.
pub struct RedirectChannel {
    events: Arc<EventHub>,
    mirror: Arc<dyn StreamMirror>,
}

impl RedirectChannel {
    pub fn new(events: Arc<EventHub>, mirror: Arc<dyn StreamMirror>) -> Self {
        Self { events, mirror }
    }

    /// Routes one write made on behalf of `metadata`.
    pub(crate) fn dispatch(&self, metadata: &ExecutionMetadata, stream: Stream, text: &str) {
        if text.is_empty() || metadata.context_name.is_empty() {
            return;
        }
        let context = metadata.context;
        let batch = metadata.kind == ContextKind::Batch;
        match stream {
            Stream::Out => {
                if !metadata.output_enabled {
                    return;
                }
                if batch {
                    self.mirror.write_out(text);
                } else {
                    self.events.emit(&RuntimeEvent::OutputMessage {
                        text: text.to_owned(),
                        context,
                    });
                }
            }
            Stream::Err => {
                if !metadata.error_enabled {
                    return;
                }
                if batch {
                    self.mirror.write_err(text);
                } else {
                    self.events.emit(&RuntimeEvent::ErrorMessage {
                        text: text.to_owned(),
                        context,
                    });
                }
                if let Some(line) = error_line(text) {
                    self.events.emit(&RuntimeEvent::ErrorAtLine { line, context });
                }
            }
        }
    }
}

impl std::fmt::Debug for RedirectChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectChannel")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Routes a write through the metadata of the current thread.
///
/// Writes made outside any evaluation (for instance from threads a script spawned) have no owner
/// and are dropped.
pub(crate) fn dispatch_current(stream: Stream, text: &str) {
    match metadata::current() {
        Some(metadata) => metadata.channel.dispatch(&metadata, stream, text),
        None => tracing::trace!(?stream, len = text.len(), "dropping write without execution metadata"),
    }
}

/// Extracts the source line an error report refers to.
///
/// A message that is just a number is taken as the line itself; otherwise the innermost
/// `"<string>", line N` traceback entry wins.
#[must_use]
pub fn error_line(text: &str) -> Option<u32> {
    if let Ok(line) = text.trim().parse::<u32>() {
        return Some(line);
    }
    LINE_MARKER
        .captures_iter(text)
        .last()
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// File-like object installed as `sys.stdout` / `sys.stderr`.
#[pyclass(name = "OutputSink", module = "hostpy", frozen)]
#[derive(Debug)]
pub struct OutputSink {
    stream: Stream,
}

impl OutputSink {
    #[must_use]
    pub fn new(stream: Stream) -> Self {
        Self { stream }
    }
}

#[pymethods]
impl OutputSink {
    fn write(&self, text: &str) -> usize {
        dispatch_current(self.stream, text);
        text.chars().count()
    }

    fn flush(&self) {}

    fn isatty(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        true
    }

    #[getter]
    fn encoding(&self) -> &'static str {
        "utf-8"
    }

    #[getter]
    fn errors(&self) -> &'static str {
        "strict"
    }

    fn __repr__(&self) -> String {
        match self.stream {
            Stream::Out => "<hostpy stdout>".to_owned(),
            Stream::Err => "<hostpy stderr>".to_owned(),
        }
    }
}
