// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime configuration for the telemetry pipeline.
//!
//! The SDK expects configuration resolution (connection-string parsing,
//! environment variable precedence) to happen upstream; this module only
//! models the resolved `{instrumentation_key, endpoint_url}` pair plus the
//! tunable knobs for batching, disk retry, and performance collection.
//!
//! Every knob is stored in an atomic and read on demand by the channel and
//! sampler, so a change made at runtime takes effect on the next flush or
//! tick rather than requiring a rebuild of the pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Default number of envelopes per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 250;

/// Default time-based flush trigger.
pub const DEFAULT_MAX_BATCH_INTERVAL_MS: u64 = 15_000;

/// Default cap on total bytes persisted for retry, per instrumentation key.
pub const DEFAULT_DISK_RETRY_CAP_BYTES: u64 = 50 * 1024 * 1024;

/// Default delay before re-scanning the retry directory.
pub const DEFAULT_RESEND_INTERVAL_MS: u64 = 60_000;

/// Default performance counter collection interval.
pub const DEFAULT_PERF_COLLECTION_INTERVAL_MS: u64 = 60_000;

/// Resolved telemetry configuration.
///
/// Shared as `Arc<TelemetryConfig>` between the client, channel, sender and
/// sampler. Identity fields are fixed at construction; everything else can be
/// adjusted while the pipeline is running.
#[derive(Debug)]
pub struct TelemetryConfig {
    instrumentation_key: String,
    endpoint_url: String,

    disabled: AtomicBool,
    max_batch_size: AtomicUsize,
    max_batch_interval_ms: AtomicU64,
    disk_retry_enabled: AtomicBool,
    disk_retry_cap_bytes: AtomicU64,
    resend_interval_ms: AtomicU64,
    perf_collection_interval_ms: AtomicU64,
}

impl TelemetryConfig {
    /// Create a configuration from a resolved key and ingestion endpoint.
    pub fn new(instrumentation_key: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            endpoint_url: endpoint_url.into(),
            disabled: AtomicBool::new(false),
            max_batch_size: AtomicUsize::new(DEFAULT_MAX_BATCH_SIZE),
            max_batch_interval_ms: AtomicU64::new(DEFAULT_MAX_BATCH_INTERVAL_MS),
            disk_retry_enabled: AtomicBool::new(true),
            disk_retry_cap_bytes: AtomicU64::new(DEFAULT_DISK_RETRY_CAP_BYTES),
            resend_interval_ms: AtomicU64::new(DEFAULT_RESEND_INTERVAL_MS),
            perf_collection_interval_ms: AtomicU64::new(DEFAULT_PERF_COLLECTION_INTERVAL_MS),
        }
    }

    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Whether the whole pipeline is disabled. A disabled channel silently
    /// discards everything handed to it.
    pub fn disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.load(Ordering::Relaxed)
    }

    pub fn set_max_batch_size(&self, size: usize) {
        self.max_batch_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn max_batch_interval_ms(&self) -> u64 {
        self.max_batch_interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_max_batch_interval_ms(&self, ms: u64) {
        self.max_batch_interval_ms.store(ms, Ordering::Relaxed);
    }

    pub fn disk_retry_enabled(&self) -> bool {
        self.disk_retry_enabled.load(Ordering::Relaxed)
    }

    pub fn set_disk_retry_enabled(&self, enabled: bool) {
        self.disk_retry_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn disk_retry_cap_bytes(&self) -> u64 {
        self.disk_retry_cap_bytes.load(Ordering::Relaxed)
    }

    pub fn set_disk_retry_cap_bytes(&self, cap: u64) {
        self.disk_retry_cap_bytes.store(cap, Ordering::Relaxed);
    }

    pub fn resend_interval_ms(&self) -> u64 {
        self.resend_interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_resend_interval_ms(&self, ms: u64) {
        self.resend_interval_ms.store(ms, Ordering::Relaxed);
    }

    pub fn perf_collection_interval_ms(&self) -> u64 {
        self.perf_collection_interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_perf_collection_interval_ms(&self, ms: u64) {
        // A zero interval would turn the sampler tick into a spin loop.
        self.perf_collection_interval_ms
            .store(ms.max(1), Ordering::Relaxed);
    }
}
