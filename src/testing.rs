//! Fixtures for exercising the recovery engine without a live flaky
//! dependency: an operation that fails a fixed number of times before
//! succeeding, and an observability sink that just counts events. Available
//! to downstream crates under the `test-support` feature, the way a small
//! service publishes its own test doubles instead of asking integrators to
//! hand-roll them.

use crate::observability::{EventSink, RecoveryEvent};
use crate::wrapper::Sleeper;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// An operation that fails its first `fail_times` invocations with a
/// caller-supplied error and succeeds with a fixed value afterward.
pub struct FlakyOperation<T, E, EF> {
    fail_times: u32,
    calls: AtomicU32,
    error_fn: EF,
    success: T,
    _marker: std::marker::PhantomData<E>,
}

impl<T, E, EF> FlakyOperation<T, E, EF>
where
    T: Clone,
    EF: Fn() -> E,
{
    pub fn new(fail_times: u32, error_fn: EF, success: T) -> Self {
        Self {
            fail_times,
            calls: AtomicU32::new(0),
            error_fn,
            success,
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn invoke(&self) -> Result<T, E> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call_number <= self.fail_times {
            Err((self.error_fn)())
        } else {
            Ok(self.success.clone())
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Sink that records how many events it has seen, for tests asserting that
/// observability fired without caring about the event payloads.
#[derive(Default)]
pub struct CountingSink {
    count: AtomicU32,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl EventSink for CountingSink {
    fn emit(&self, _event: RecoveryEvent) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A `Sleeper` that records requested durations instead of waiting on them,
/// so a backoff test can assert on the delay schedule without the test
/// taking as long to run as the schedule it's checking.
#[derive(Default)]
pub struct ManualClock {
    recorded: parking_lot::Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations passed to `sleep`, in call order.
    pub fn recorded_delays(&self) -> Vec<Duration> {
        self.recorded.lock().clone()
    }
}

#[async_trait]
impl Sleeper for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.recorded.lock().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    #[tokio::test]
    async fn manual_clock_records_without_waiting() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_secs(30)).await;
        clock.sleep(Duration::from_millis(5)).await;
        assert_eq!(
            clock.recorded_delays(),
            vec![Duration::from_secs(30), Duration::from_millis(5)]
        );
    }

    #[tokio::test]
    async fn flaky_operation_fails_then_succeeds() {
        let flaky = FlakyOperation::new(2, || Boom, "ok");
        assert!(flaky.invoke().await.is_err());
        assert!(flaky.invoke().await.is_err());
        assert_eq!(flaky.invoke().await.unwrap(), "ok");
        assert_eq!(flaky.call_count(), 3);
    }

    #[test]
    fn counting_sink_counts_every_emit() {
        let sink = CountingSink::new();
        sink.emit(RecoveryEvent {
            operation_id: "op".into(),
            function_name: "f".into(),
            attempt: 0,
            state: crate::types::OperationState::InProgress,
            category: None,
            delay: None,
            strategy: "fixed".into(),
        });
        assert_eq!(sink.count(), 1);
    }
}
