// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The recurring performance collection task.
//!
//! The sampler is a two-state machine (stopped / running). Enabling it
//! captures a baseline of CPU times, counter snapshots and process timing,
//! then spawns a background task that wakes on the collection interval,
//! computes deltas against the previous tick, and emits normalized metric
//! records to a [`MetricSink`]. Disabling aborts the task; both transitions
//! are idempotent.
//!
//! A tick never panics and never emits NaN: readings the platform cannot
//! supply are skipped, and degenerate deltas default to zero.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::TelemetryConfig;
use crate::types::MetricRecord;

use super::counters::{compute_rate, CounterSnapshot, PerfCounters};
use super::system::{CpuTimes, ProcessCpuTimes, SystemReader};
use super::{names, PERF_NAMESPACE};

/// Destination for sampler-emitted metric records.
pub trait MetricSink: Send + Sync {
    fn emit(&self, record: MetricRecord);
}

/// Collects OS and event-rate metrics on a recurring interval.
pub struct PerformanceSampler {
    config: Arc<TelemetryConfig>,
    sink: Arc<dyn MetricSink>,
    counters: Arc<PerfCounters>,
    system: Arc<dyn SystemReader>,
    live_metrics: bool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Mutable per-tick state, owned by the collection task.
struct TickState {
    last_cpus: Option<Vec<CpuTimes>>,
    last_process: Option<ProcessCpuTimes>,
    last_process_at_ms: i64,
    last_requests: CounterSnapshot,
    last_dependencies: CounterSnapshot,
    last_exceptions: CounterSnapshot,
}

impl PerformanceSampler {
    /// Create a stopped sampler.
    ///
    /// `live_metrics` additionally enables dependency/exception rates and
    /// committed-memory readings, which are only useful to a live metrics
    /// consumer.
    pub fn new(
        config: Arc<TelemetryConfig>,
        sink: Arc<dyn MetricSink>,
        counters: Arc<PerfCounters>,
        system: Arc<dyn SystemReader>,
    ) -> Self {
        Self {
            config,
            sink,
            counters,
            system,
            live_metrics: false,
            handle: Mutex::new(None),
        }
    }

    pub fn with_live_metrics(mut self, live_metrics: bool) -> Self {
        self.live_metrics = live_metrics;
        self
    }

    /// Whether the collection task is currently running.
    pub fn is_running(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    /// Start or stop collection. Both directions are idempotent.
    ///
    /// When starting, `interval_override` wins over the configured
    /// collection interval; without it the interval is re-read from config
    /// before every sleep, so runtime changes apply on the next tick. Must
    /// be called from within a tokio runtime. The spawned task holds no
    /// runtime resources beyond its own timer and dies with the runtime;
    /// shutdown paths that outlive the runtime should call `enable(false)`
    /// first.
    pub fn enable(&self, enabled: bool, interval_override: Option<Duration>) {
        let mut handle = self.handle.lock().unwrap();

        if !enabled {
            self.counters.set_enabled(false);
            if let Some(task) = handle.take() {
                task.abort();
            }
            return;
        }

        if handle.is_some() {
            return;
        }
        self.counters.set_enabled(true);

        let now_ms = Utc::now().timestamp_millis();
        let mut state = TickState {
            last_cpus: self.system.cpu_times(),
            last_process: self.system.process_cpu_times(),
            last_process_at_ms: now_ms,
            last_requests: self.counters.requests().snapshot(now_ms),
            last_dependencies: self.counters.dependencies().snapshot(now_ms),
            last_exceptions: self.counters.exceptions().snapshot(now_ms),
        };

        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);
        let system = Arc::clone(&self.system);
        let live_metrics = self.live_metrics;

        *handle = Some(tokio::spawn(async move {
            loop {
                let interval = interval_override
                    .unwrap_or_else(|| Duration::from_millis(config.perf_collection_interval_ms()))
                    .max(Duration::from_millis(1));
                tokio::time::sleep(interval).await;
                collect_tick(
                    sink.as_ref(),
                    &counters,
                    system.as_ref(),
                    live_metrics,
                    &mut state,
                    Utc::now().timestamp_millis(),
                );
            }
        }));
    }

    /// Stop collection and release baseline state.
    pub fn dispose(&self) {
        self.enable(false, None);
    }
}

impl Drop for PerformanceSampler {
    fn drop(&mut self) {
        if let Some(task) = self.handle.lock().unwrap().take() {
            task.abort();
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn perf_record(name: &str, value: f64) -> MetricRecord {
    MetricRecord::new(name, finite_or_zero(value)).with_namespace(PERF_NAMESPACE)
}

/// One collection pass. Split out from the task loop so tests can drive it
/// with a controlled clock.
fn collect_tick(
    sink: &dyn MetricSink,
    counters: &PerfCounters,
    system: &dyn SystemReader,
    live_metrics: bool,
    state: &mut TickState,
    now_ms: i64,
) {
    let mut records = Vec::new();

    collect_cpu(&mut records, system, state, now_ms);
    collect_memory(&mut records, system, live_metrics);
    collect_request_rate(&mut records, counters, state, now_ms, live_metrics);
    if live_metrics {
        collect_dependency_rate(&mut records, counters, state, now_ms);
        collect_exception_rate(&mut records, counters, state, now_ms);
    }

    for record in records {
        sink.emit(record);
    }
}

fn collect_cpu(
    records: &mut Vec<MetricRecord>,
    system: &dyn SystemReader,
    state: &mut TickState,
    now_ms: i64,
) {
    let Some(cpus) = system.cpu_times() else {
        return;
    };

    if let Some(last) = &state.last_cpus {
        if last.len() == cpus.len() {
            let mut user = 0.0;
            let mut idle = 0.0;
            let mut combined = 0.0;
            for (current, previous) in cpus.iter().zip(last.iter()) {
                user += finite_or_zero(current.user - previous.user).max(0.0);
                idle += finite_or_zero(current.idle - previous.idle).max(0.0);
                combined += finite_or_zero(current.total() - previous.total()).max(0.0);
            }
            let combined = combined.max(1.0);

            records.push(perf_record(
                names::PROCESSOR_TIME,
                (combined - idle) / combined * 100.0,
            ));

            let process_percent = collect_process_cpu(system, state, now_ms, cpus.len());
            // Fall back to the OS-wide user-time fraction when process-level
            // timing is unavailable.
            records.push(perf_record(
                names::PROCESS_TIME,
                process_percent.unwrap_or(user / combined * 100.0),
            ));
        } else {
            debug!(
                previous = last.len(),
                current = cpus.len(),
                "cpu core count changed between samples, skipping cpu metrics"
            );
        }
    }

    state.last_cpus = Some(cpus);
}

fn collect_process_cpu(
    system: &dyn SystemReader,
    state: &mut TickState,
    now_ms: i64,
    core_count: usize,
) -> Option<f64> {
    let current = system.process_cpu_times();
    let percent = match (&current, &state.last_process) {
        (Some(current), Some(previous)) => {
            let elapsed_ms = (now_ms - state.last_process_at_ms) as f64;
            let delta_ms = (current.total_ms() - previous.total_ms()).max(0.0);
            let percent = 100.0 * delta_ms / (elapsed_ms * core_count as f64);
            percent.is_finite().then_some(percent)
        }
        _ => None,
    };
    state.last_process = current;
    state.last_process_at_ms = now_ms;
    percent
}

fn collect_memory(records: &mut Vec<MetricRecord>, system: &dyn SystemReader, live_metrics: bool) {
    // Instantaneous gauges; no delta needed.
    if let Some(resident) = system.resident_memory_bytes() {
        records.push(perf_record(names::PRIVATE_BYTES, resident as f64));
    }
    let free = system.free_memory_bytes();
    if let Some(free) = free {
        records.push(perf_record(names::AVAILABLE_BYTES, free as f64));
    }
    if live_metrics {
        if let (Some(total), Some(free)) = (system.total_memory_bytes(), free) {
            records.push(perf_record(
                names::COMMITTED_BYTES,
                total.saturating_sub(free) as f64,
            ));
        }
    }
}

fn collect_request_rate(
    records: &mut Vec<MetricRecord>,
    counters: &PerfCounters,
    state: &mut TickState,
    now_ms: i64,
    live_metrics: bool,
) {
    let current = counters.requests().snapshot(now_ms);
    if let Some(sample) = compute_rate(&state.last_requests, &current) {
        records.push(perf_record(names::REQUEST_RATE, sample.rate_per_second));

        // Only send duration to live metrics when it was actually updated.
        let interval_count = current.count.saturating_sub(state.last_requests.count);
        if !live_metrics || interval_count > 0 {
            records.push(perf_record(
                names::REQUEST_DURATION,
                sample.average_duration_ms,
            ));
        }
        if live_metrics {
            records.push(perf_record(
                names::REQUEST_FAILURE_RATE,
                sample.failure_rate_per_second,
            ));
        }
    }
    state.last_requests = current;
}

fn collect_dependency_rate(
    records: &mut Vec<MetricRecord>,
    counters: &PerfCounters,
    state: &mut TickState,
    now_ms: i64,
) {
    let current = counters.dependencies().snapshot(now_ms);
    if let Some(sample) = compute_rate(&state.last_dependencies, &current) {
        records.push(perf_record(names::DEPENDENCY_RATE, sample.rate_per_second));
        records.push(perf_record(
            names::DEPENDENCY_FAILURE_RATE,
            sample.failure_rate_per_second,
        ));
        let interval_count = current.count.saturating_sub(state.last_dependencies.count);
        if interval_count > 0 {
            records.push(perf_record(
                names::DEPENDENCY_DURATION,
                sample.average_duration_ms,
            ));
        }
    }
    state.last_dependencies = current;
}

fn collect_exception_rate(
    records: &mut Vec<MetricRecord>,
    counters: &PerfCounters,
    state: &mut TickState,
    now_ms: i64,
) {
    let current = counters.exceptions().snapshot(now_ms);
    if let Some(sample) = compute_rate(&state.last_exceptions, &current) {
        records.push(perf_record(names::EXCEPTION_RATE, sample.rate_per_second));
    }
    state.last_exceptions = current;
}
