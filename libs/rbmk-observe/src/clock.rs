use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use time::OffsetDateTime;

/// A source of emission timestamps for the event log.
///
/// Injected rather than read from `OffsetDateTime::now_utc()` directly so tests
/// can assert on exact timestamps and so the log can be driven by a simulated
/// clock when running scenarios in accelerated time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The real wall clock, used by every measurement outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that advances by a fixed step every time it is read.
///
/// Gives scenario tests a deterministic, strictly increasing sequence of
/// timestamps without depending on wall-clock granularity.
#[derive(Clone)]
pub struct SteppingClock {
    start: OffsetDateTime,
    step_nanos: i64,
    ticks: Arc<AtomicI64>,
}

impl SteppingClock {
    pub fn new(start: OffsetDateTime, step: std::time::Duration) -> Self {
        Self {
            start,
            step_nanos: step.as_nanos() as i64,
            ticks: Arc::new(AtomicI64::new(0)),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> OffsetDateTime {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);

        self.start + time::Duration::nanoseconds(tick * self.step_nanos)
    }
}

pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
