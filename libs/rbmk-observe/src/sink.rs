use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::Event;

/// Accepts structured [`Event`]s, one measurement at a time.
///
/// Implementations must serialize concurrent writers: the spec requires that
/// emission order on the sink is preserved even when multiple tasks belonging to
/// the same measurement (e.g. the duplicate collector's background reader)
/// write concurrently.
pub trait Sink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards every event. Used when no `--logs`/`+logs` destination was requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Serializes each [`Event`] as one JSON object per line and appends it to `W`.
///
/// A single [`Mutex`] around the writer is the serialization point: whichever
/// task's `emit` call wins the lock writes its line (and flushes) before the
/// next one is allowed to start, which is what guarantees the "after a
/// successful write, the corresponding event is observable by any goroutine
/// that then reads from the same connection" ordering property from §4.C.
pub struct JsonlSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonlSink<W>
where
    W: Write + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W> Sink for JsonlSink<W>
where
    W: Write + Send,
{
    fn emit(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event, dropping it");
                return;
            }
        };

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(writer, "{line}") {
            tracing::warn!(error = %e, "Failed to write event to log sink");
            return;
        }
        let _ = writer.flush();
    }
}

/// Fans a single [`Event`] out to two sinks.
///
/// Used to implement `+logs` (mirror the structured log to stdout in addition to
/// whatever `--logs FILE` destination was configured).
pub struct TeeSink<A, B> {
    a: A,
    b: B,
}

impl<A, B> TeeSink<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A, B> Sink for TeeSink<A, B>
where
    A: Sink,
    B: Sink,
{
    fn emit(&self, event: Event) {
        self.a.emit(event.clone());
        self.b.emit(event);
    }
}

/// Captures every emitted event in memory, in emission order.
///
/// Grounds the scenario registry's (§4.H) `expectedSeq` assertions: a scenario
/// run attaches one of these as the measurement's sink and inspects the
/// resulting `Vec<Event>` afterwards.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Sink for MemorySink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

/// Type-erased handle to a [`Sink`], cheap to clone and share between tasks.
pub type SharedSink = Arc<dyn Sink>;

pub fn null() -> SharedSink {
    Arc::new(NullSink)
}
