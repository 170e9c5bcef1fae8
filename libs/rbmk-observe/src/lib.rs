//! The measurement event log: a closed, typed vocabulary of structured events
//! (Component C of the spec) emitted by every dial, read, write, and DNS
//! exchange the engine performs.
//!
//! This is deliberately not built on top of `tracing` directly even though the
//! rest of the crate uses `tracing` for ambient diagnostics (see `rbmk-logging`):
//! the spec requires a *closed*, forward-compatible schema that downstream
//! tooling parses structurally, which a generic subscriber does not guarantee.
//! Instead this crate defines its own [`Event`]/[`Msg`] types and a small
//! [`Sink`] trait, and `rbmk-net`/`rbmk-measure` emit directly into it.

mod clock;
mod event;
mod sink;

pub use clock::{system, Clock, SteppingClock, SystemClock};
pub use event::{Event, Msg, WireProtocol};
pub use sink::{null, JsonlSink, MemorySink, NullSink, SharedSink, Sink, TeeSink};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::macros::datetime;

    #[test]
    fn jsonl_sink_omits_unset_optional_fields() {
        let mut buf = Vec::new();
        {
            let sink = JsonlSink::new(&mut buf);
            sink.emit(Event::new(Msg::ConnectStart, datetime!(2024-01-01 00:00:00 UTC)));
        }

        let line = String::from_utf8(buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();

        assert_eq!(value["msg"], "connectStart");
        assert!(value.get("err").is_none());
        assert!(value.get("t0").is_none());
    }

    #[test]
    fn memory_sink_preserves_emission_order() {
        let sink = MemorySink::new();
        let shared: Arc<dyn Sink> = Arc::new(sink.clone());

        shared.emit(Event::new(Msg::ConnectStart, datetime!(2024-01-01 00:00:00 UTC)));
        shared.emit(Event::new(Msg::ConnectDone, datetime!(2024-01-01 00:00:01 UTC)));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].msg, Msg::ConnectStart);
        assert_eq!(events[1].msg, Msg::ConnectDone);
    }

    #[test]
    fn stepping_clock_is_monotonic() {
        let clock = SteppingClock::new(datetime!(2024-01-01 00:00:00 UTC), std::time::Duration::from_millis(1));

        let a = clock.now();
        let b = clock.now();

        assert!(b > a);
    }

    #[test]
    fn dns_raw_fields_are_base64() {
        let event = Event::new(Msg::DnsQuery, datetime!(2024-01-01 00:00:00 UTC))
            .with_dns_raw_query(b"hello");

        assert_eq!(event.dns_raw_query.as_deref(), Some("aGVsbG8="));
    }
}
