// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Performance counter collection.
//!
//! This module turns raw event counters and OS readings into normalized
//! metric records:
//!
//! - **Counters**: atomic accumulators incremented by request/dependency/
//!   exception call sites, snapshotted once per interval
//! - **Rates**: pure snapshot-pair math with zero-elapsed and reset guards
//! - **Sampler**: the recurring background task that reads OS counters and
//!   emits metric records to a sink
//!
//! The sampler owns the collection timer; counters are shared with whatever
//! instrumentation reports the raw events.

mod counters;
mod sampler;
mod system;

pub use counters::{
    compute_rate, CounterSnapshot, EventCounter, EventDuration, PerfCounters, RateSample,
};
pub use sampler::{MetricSink, PerformanceSampler};
pub use system::{CpuTimes, ProcReader, ProcessCpuTimes, SystemReader};

/// Namespace attached to every sampler-emitted metric record.
pub const PERF_NAMESPACE: &str = "beacon.performance";

/// Metric names emitted by the sampler.
pub mod names {
    /// OS-wide CPU utilization, percent.
    pub const PROCESSOR_TIME: &str = "system.cpu.percent";
    /// This process's share of CPU, percent.
    pub const PROCESS_TIME: &str = "process.cpu.percent";
    /// Resident set size of this process, bytes.
    pub const PRIVATE_BYTES: &str = "process.memory.resident_bytes";
    /// Memory available system-wide, bytes.
    pub const AVAILABLE_BYTES: &str = "system.memory.available_bytes";
    /// Memory committed system-wide (total minus available), bytes.
    pub const COMMITTED_BYTES: &str = "system.memory.committed_bytes";

    pub const REQUEST_RATE: &str = "requests.rate";
    pub const REQUEST_FAILURE_RATE: &str = "requests.failure_rate";
    pub const REQUEST_DURATION: &str = "requests.duration_ms";

    pub const DEPENDENCY_RATE: &str = "dependencies.rate";
    pub const DEPENDENCY_FAILURE_RATE: &str = "dependencies.failure_rate";
    pub const DEPENDENCY_DURATION: &str = "dependencies.duration_ms";

    pub const EXCEPTION_RATE: &str = "exceptions.rate";
}
