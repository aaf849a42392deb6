// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Monotonic event counters and rate computation.
//!
//! Counters are incremented from many concurrent call sites (any code path
//! that completes a request or dependency) and read by exactly one sampler
//! tick at a time, so plain atomic increments suffice; no lock is taken on
//! the hot path.
//!
//! Rate computation is a pure function over two snapshots: given the counter
//! state at two points in time it produces per-second rates and an average
//! duration for the interval, guarding against zero-length intervals and
//! counter resets.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A duration reported alongside a counted event.
///
/// Auto-collectors report durations either as numeric milliseconds or as a
/// textual timespan (`"HH:MM:SS.mmm"`, optionally with a leading day count
/// as `"D.HH:MM:SS.mmm"`).
#[derive(Debug, Clone, PartialEq)]
pub enum EventDuration {
    Millis(f64),
    Timespan(String),
}

impl EventDuration {
    /// Resolve to milliseconds. `None` if the timespan cannot be parsed.
    pub fn as_millis(&self) -> Option<f64> {
        match self {
            Self::Millis(ms) if ms.is_finite() => Some(ms.max(0.0)),
            Self::Millis(_) => None,
            Self::Timespan(s) => parse_timespan(s),
        }
    }
}

impl From<f64> for EventDuration {
    fn from(ms: f64) -> Self {
        Self::Millis(ms)
    }
}

impl From<&str> for EventDuration {
    fn from(s: &str) -> Self {
        Self::Timespan(s.to_string())
    }
}

impl From<String> for EventDuration {
    fn from(s: String) -> Self {
        Self::Timespan(s)
    }
}

/// Parse a `"HH:MM:SS[.fff]"` or `"D.HH:MM:SS[.fff]"` timespan into
/// milliseconds. Returns `None` for anything malformed.
pub(crate) fn parse_timespan(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (d.parse::<u64>().ok()?, h.parse::<u64>().ok()?),
        None => (0, parts[0].parse::<u64>().ok()?),
    };
    let minutes: u64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    if hours >= 24 || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let whole_minutes = ((days * 24 + hours) * 60 + minutes) as f64;
    Some(whole_minutes * 60_000.0 + seconds * 1000.0)
}

/// Point-in-time view of one counter, captured once per collection interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSnapshot {
    /// Total events counted since process start.
    pub count: u64,

    /// Subset of `count` that failed. Invariant: `failed_count <= count`.
    pub failed_count: u64,

    /// Sum of event durations since process start, in milliseconds.
    pub interval_duration_sum_ms: f64,

    /// Wall-clock capture time, epoch milliseconds.
    pub captured_at_ms: i64,
}

/// Normalized rates derived from two snapshots of the same counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub rate_per_second: f64,
    pub failure_rate_per_second: f64,
    pub average_duration_ms: f64,
}

/// Convert two monotonically non-decreasing snapshots into normalized rates.
///
/// Returns `None` when no time has elapsed between the snapshots (no rate
/// can be derived from a zero-length interval). A counter reset between
/// snapshots saturates the delta to 0 rather than producing a negative rate,
/// and an interval with no events yields an average duration of 0.
pub fn compute_rate(previous: &CounterSnapshot, current: &CounterSnapshot) -> Option<RateSample> {
    let elapsed_ms = current.captured_at_ms - previous.captured_at_ms;
    if elapsed_ms <= 0 {
        return None;
    }
    let elapsed_seconds = elapsed_ms as f64 / 1000.0;

    let interval_count = current.count.saturating_sub(previous.count);
    let interval_failed = current.failed_count.saturating_sub(previous.failed_count);
    let duration_delta =
        (current.interval_duration_sum_ms - previous.interval_duration_sum_ms).max(0.0);

    let average_duration_ms = if interval_count == 0 {
        0.0
    } else {
        duration_delta / interval_count as f64
    };

    Some(RateSample {
        rate_per_second: interval_count as f64 / elapsed_seconds,
        failure_rate_per_second: interval_failed as f64 / elapsed_seconds,
        average_duration_ms,
    })
}

/// One monotonic counter: total events, failed events, summed duration.
///
/// Durations are accumulated in integer microseconds so concurrent adds stay
/// a single atomic operation.
#[derive(Debug, Default)]
pub struct EventCounter {
    count: AtomicU64,
    failed_count: AtomicU64,
    duration_sum_micros: AtomicU64,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event. An unparseable duration makes the whole call a no-op.
    pub fn record(&self, duration: EventDuration, success: bool) {
        let Some(duration_ms) = duration.as_millis() else {
            return;
        };

        self.duration_sum_micros
            .fetch_add((duration_ms * 1000.0) as u64, Ordering::Relaxed);
        if !success {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one event with no duration (exceptions).
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture the counter state at the given wall-clock time.
    pub fn snapshot(&self, captured_at_ms: i64) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            interval_duration_sum_ms: self.duration_sum_micros.load(Ordering::Relaxed) as f64
                / 1000.0,
            captured_at_ms,
        }
    }
}

/// The process-wide accumulators read by one performance sampler.
///
/// Explicitly constructed and injected into producers and the sampler rather
/// than living in hidden static state; the single-writer-per-field,
/// single-reader contract is carried by ownership of this object.
#[derive(Debug, Default)]
pub struct PerfCounters {
    enabled: AtomicBool,
    requests: EventCounter,
    dependencies: EventCounter,
    exceptions: EventCounter,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the owning sampler is running. Counting is a no-op otherwise.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn recording on or off. The sampler drives this, but hosts that
    /// want counters without the sampler can enable them directly.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn count_request(&self, duration: impl Into<EventDuration>, success: bool) {
        if self.is_enabled() {
            self.requests.record(duration.into(), success);
        }
    }

    pub fn count_dependency(&self, duration: impl Into<EventDuration>, success: bool) {
        if self.is_enabled() {
            self.dependencies.record(duration.into(), success);
        }
    }

    pub fn count_exception(&self) {
        if self.is_enabled() {
            self.exceptions.increment();
        }
    }

    pub fn requests(&self) -> &EventCounter {
        &self.requests
    }

    pub fn dependencies(&self) -> &EventCounter {
        &self.dependencies
    }

    pub fn exceptions(&self) -> &EventCounter {
        &self.exceptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(count: u64, failed: u64, duration_sum: f64, at_ms: i64) -> CounterSnapshot {
        CounterSnapshot {
            count,
            failed_count: failed,
            interval_duration_sum_ms: duration_sum,
            captured_at_ms: at_ms,
        }
    }

    #[test]
    fn test_failed_never_exceeds_count() {
        let counter = EventCounter::new();
        counter.record(EventDuration::Millis(10.0), false);
        counter.record(EventDuration::Millis(20.0), true);
        counter.record(EventDuration::Millis(5.0), false);

        let s = counter.snapshot(0);
        assert_eq!(s.count, 3);
        assert_eq!(s.failed_count, 2);
        assert!(s.failed_count <= s.count);
    }

    #[test]
    fn test_duration_accumulates() {
        let counter = EventCounter::new();
        counter.record(EventDuration::Millis(100.5), true);
        counter.record(EventDuration::Millis(49.5), true);

        let s = counter.snapshot(0);
        assert!((s.interval_duration_sum_ms - 150.0).abs() < 0.001);
    }

    #[test]
    fn test_timespan_equivalent_to_millis() {
        let from_text = EventCounter::new();
        from_text.record(EventDuration::from("00:00:01.500"), true);

        let from_number = EventCounter::new();
        from_number.record(EventDuration::from(1500.0), true);

        assert_eq!(
            from_text.snapshot(0).interval_duration_sum_ms,
            from_number.snapshot(0).interval_duration_sum_ms
        );
        assert!((from_text.snapshot(0).interval_duration_sum_ms - 1500.0).abs() < 0.001);
    }

    #[test]
    fn test_invalid_timespan_is_noop() {
        let counter = EventCounter::new();
        counter.record(EventDuration::from("not a timespan"), false);
        counter.record(EventDuration::from("1:2"), false);
        counter.record(EventDuration::from("00:99:00"), false);
        counter.record(EventDuration::Millis(f64::NAN), false);

        let s = counter.snapshot(0);
        assert_eq!(s.count, 0);
        assert_eq!(s.failed_count, 0);
    }

    #[test]
    fn test_parse_timespan_with_days() {
        // 1 day, 2 hours, 3 minutes, 4.5 seconds
        let ms = parse_timespan("1.02:03:04.500").unwrap();
        let expected = ((24 + 2) * 3600 + 3 * 60) as f64 * 1000.0 + 4500.0;
        assert!((ms - expected).abs() < 0.001);
    }

    #[test]
    fn test_parse_timespan_rejects_negative_seconds() {
        assert!(parse_timespan("00:00:-5").is_none());
    }

    #[test]
    fn test_zero_elapsed_emits_nothing() {
        let previous = snap(10, 0, 100.0, 1000);
        let current = snap(20, 0, 200.0, 1000);
        assert!(compute_rate(&previous, &current).is_none());

        let earlier = snap(20, 0, 200.0, 500);
        assert!(compute_rate(&previous, &earlier).is_none());
    }

    #[test]
    fn test_counter_reset_saturates_to_zero() {
        let previous = snap(100, 50, 5000.0, 0);
        let current = snap(10, 5, 100.0, 1000);

        let sample = compute_rate(&previous, &current).unwrap();
        assert_eq!(sample.rate_per_second, 0.0);
        assert_eq!(sample.failure_rate_per_second, 0.0);
        assert_eq!(sample.average_duration_ms, 0.0);
    }

    #[test]
    fn test_rate_computation() {
        // 30 requests (6 failed) over 10 seconds, 4500ms total duration
        let previous = snap(100, 10, 10_000.0, 0);
        let current = snap(130, 16, 14_500.0, 10_000);

        let sample = compute_rate(&previous, &current).unwrap();
        assert!((sample.rate_per_second - 3.0).abs() < 1e-9);
        assert!((sample.failure_rate_per_second - 0.6).abs() < 1e-9);
        assert!((sample.average_duration_ms - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_interval_average_defaults_to_zero() {
        let previous = snap(50, 5, 1000.0, 0);
        let current = snap(50, 5, 1000.0, 60_000);

        let sample = compute_rate(&previous, &current).unwrap();
        assert_eq!(sample.rate_per_second, 0.0);
        assert_eq!(sample.average_duration_ms, 0.0);
    }

    #[test]
    fn test_counters_noop_when_disabled() {
        let counters = PerfCounters::new();
        counters.count_request(100.0, true);
        counters.count_exception();
        assert_eq!(counters.requests().snapshot(0).count, 0);
        assert_eq!(counters.exceptions().snapshot(0).count, 0);

        counters.set_enabled(true);
        counters.count_request(100.0, true);
        counters.count_exception();
        assert_eq!(counters.requests().snapshot(0).count, 1);
        assert_eq!(counters.exceptions().snapshot(0).count, 1);
    }
}
