// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Beacon - application telemetry with batched delivery and disk retry.
//!
//! Beacon collects telemetry items (events, traces, metrics, requests,
//! dependencies, exceptions), batches them in memory, and delivers them to
//! an ingestion endpoint over HTTP. Batches that cannot be delivered are
//! persisted to disk and resubmitted later, so telemetry survives network
//! outages and even process crashes. A built-in performance sampler turns
//! OS readings and rolling event counters into metric telemetry on a
//! recurring interval.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Envelope format, telemetry item types, metric records
//! - [`error`] - Error types and result aliases
//! - [`config`] - Runtime-adjustable delivery and collection settings
//! - [`client`] - The `track_*` API, processors, and flush
//! - [`channel`] - Batching buffer, HTTP sender, and disk retry store
//! - [`perf`] - Event counters, rate math, and the performance sampler
//! - [`diagnostics`] - Optional console logging for the SDK's own events
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon::{EventTelemetry, FlushOptions, TelemetryClient, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::new("my-ikey", "https://ingest.example.com");
//!     let client = TelemetryClient::new(config);
//!
//!     client.track_event(EventTelemetry::new("user_signed_in"));
//!
//!     // Deliver whatever is still buffered before shutdown.
//!     client.flush(FlushOptions::default()).await;
//! }
//! ```
//!
//! To add OS and rate metrics, wire the client into a sampler:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use beacon::{PerformanceSampler, ProcReader};
//!
//! let client = Arc::new(client);
//! let sampler = PerformanceSampler::new(
//!     Arc::clone(client.config()),
//!     Arc::clone(&client) as Arc<dyn beacon::MetricSink>,
//!     Arc::clone(client.counters()),
//!     Arc::new(ProcReader::new()),
//! );
//! sampler.enable(true, None);
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod perf;
pub mod types;

// Re-export commonly used types at crate root
pub use channel::{Channel, SendOutcome, Sender, Transport, TransportResponse};
pub use client::{FlushOptions, TelemetryClient, TelemetryProcessor};
pub use config::TelemetryConfig;
pub use error::{Result, StoreError, TransportError};
pub use perf::{MetricSink, PerfCounters, PerformanceSampler, ProcReader, SystemReader};
pub use types::{
    AvailabilityTelemetry, DependencyTelemetry, Envelope, EventTelemetry, ExceptionTelemetry,
    MetricRecord, MetricTelemetry, PageViewTelemetry, RequestTelemetry, SeverityLevel,
    TelemetryType, TraceTelemetry,
};
