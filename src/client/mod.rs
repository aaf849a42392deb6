// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The public tracking surface.
//!
//! [`TelemetryClient`] turns typed telemetry items into envelopes, applies
//! common properties and telemetry processors, feeds the event counters,
//! and hands the result to the delivery channel. Every `track_*` method is
//! fire and forget: nothing here blocks, returns an error, or panics on
//! bad input.
//!
//! Processors run in registration order and can mutate or veto an
//! envelope. A processor that panics is treated as a no-op for that
//! envelope; telemetry must survive a broken processor.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::channel::{Channel, Sender};
use crate::config::TelemetryConfig;
use crate::perf::{MetricSink, PerfCounters};
use crate::types::{
    AvailabilityTelemetry, DependencyTelemetry, Envelope, EventTelemetry, ExceptionTelemetry,
    MetricRecord, MetricTelemetry, PageViewTelemetry, RequestTelemetry, TelemetryType,
    TraceTelemetry,
};

/// Options for [`TelemetryClient::flush`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOptions {
    /// The process is crashing: skip the network and persist the buffer
    /// synchronously.
    pub is_app_crashing: bool,
}

/// Inspects and optionally rewrites an envelope before buffering.
///
/// Return `false` to drop the envelope.
pub trait TelemetryProcessor: Send + Sync {
    fn process(&self, envelope: &mut Envelope) -> bool;
}

impl<F> TelemetryProcessor for F
where
    F: Fn(&mut Envelope) -> bool + Send + Sync,
{
    fn process(&self, envelope: &mut Envelope) -> bool {
        self(envelope)
    }
}

/// Entry point for producing telemetry.
pub struct TelemetryClient {
    config: Arc<TelemetryConfig>,
    channel: Channel,
    counters: Arc<PerfCounters>,
    common_properties: RwLock<BTreeMap<String, String>>,
    // Copy-on-write so hooks can re-register or clear processors from
    // inside their own invocation without deadlocking.
    processors: RwLock<Arc<Vec<Arc<dyn TelemetryProcessor>>>>,
}

impl TelemetryClient {
    /// Client with the default HTTP transport and a disk store keyed by
    /// the instrumentation key.
    pub fn new(config: TelemetryConfig) -> Self {
        let config = Arc::new(config);
        let sender = Arc::new(Sender::new(Arc::clone(&config)));
        let channel = Channel::new(Arc::clone(&config), sender);
        Self::with_channel(config, channel)
    }

    /// Client over a pre-built channel. Used by tests to inject a
    /// scripted transport.
    pub fn with_channel(config: Arc<TelemetryConfig>, channel: Channel) -> Self {
        Self {
            config,
            channel,
            counters: Arc::new(PerfCounters::new()),
            common_properties: RwLock::new(BTreeMap::new()),
            processors: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &Arc<TelemetryConfig> {
        &self.config
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Rolling event counters, shared with the performance sampler.
    pub fn counters(&self) -> &Arc<PerfCounters> {
        &self.counters
    }

    /// Set a property stamped onto every future envelope. Item-level
    /// properties with the same key win.
    pub fn set_common_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.common_properties
            .write()
            .unwrap()
            .insert(key.into(), value.into());
    }

    pub fn add_telemetry_processor(&self, processor: impl TelemetryProcessor + 'static) {
        let mut slot = self.processors.write().unwrap();
        let mut next: Vec<Arc<dyn TelemetryProcessor>> = slot.iter().cloned().collect();
        next.push(Arc::new(processor));
        *slot = Arc::new(next);
    }

    pub fn clear_telemetry_processors(&self) {
        *self.processors.write().unwrap() = Arc::new(Vec::new());
    }

    pub fn track_event(&self, telemetry: EventTelemetry) {
        let time = telemetry.time;
        self.track(TelemetryType::Event, &telemetry, time);
    }

    pub fn track_trace(&self, telemetry: TraceTelemetry) {
        let time = telemetry.time;
        self.track(TelemetryType::Trace, &telemetry, time);
    }

    pub fn track_metric(&self, telemetry: MetricTelemetry) {
        let time = telemetry.time;
        self.track(TelemetryType::Metric, &telemetry, time);
    }

    pub fn track_exception(&self, telemetry: ExceptionTelemetry) {
        self.counters.count_exception();
        let time = telemetry.time;
        self.track(TelemetryType::Exception, &telemetry, time);
    }

    pub fn track_request(&self, telemetry: RequestTelemetry) {
        self.counters
            .count_request(telemetry.duration_ms, telemetry.success);
        let time = telemetry.time;
        self.track(TelemetryType::Request, &telemetry, time);
    }

    pub fn track_dependency(&self, telemetry: DependencyTelemetry) {
        self.counters
            .count_dependency(telemetry.duration_ms, telemetry.success);
        let time = telemetry.time;
        self.track(TelemetryType::Dependency, &telemetry, time);
    }

    pub fn track_availability(&self, telemetry: AvailabilityTelemetry) {
        let time = telemetry.time;
        self.track(TelemetryType::Availability, &telemetry, time);
    }

    pub fn track_page_view(&self, telemetry: PageViewTelemetry) {
        let time = telemetry.time;
        self.track(TelemetryType::PageView, &telemetry, time);
    }

    /// Flush the channel buffer.
    ///
    /// The crashing variant is synchronous and writes straight to disk;
    /// the normal variant awaits the resulting send.
    pub async fn flush(&self, options: FlushOptions) {
        if options.is_app_crashing {
            self.channel.trigger_send_on_crash();
        } else {
            self.channel.trigger_send().await;
        }
    }

    fn track<T: Serialize>(
        &self,
        telemetry_type: TelemetryType,
        telemetry: &T,
        time: Option<DateTime<Utc>>,
    ) {
        let base_data = match serde_json::to_value(telemetry) {
            Ok(base_data) => base_data,
            Err(err) => {
                warn!(error = %err, "unable to shape telemetry item, dropping");
                return;
            }
        };

        let mut envelope = Envelope::new(
            telemetry_type,
            self.config.instrumentation_key(),
            base_data,
            time,
        );
        self.apply_common_properties(&mut envelope);

        if !self.run_processors(&mut envelope) {
            return;
        }
        self.channel.send(&envelope);
    }

    fn apply_common_properties(&self, envelope: &mut Envelope) {
        let common = self.common_properties.read().unwrap();
        if common.is_empty() {
            return;
        }
        let serde_json::Value::Object(base_data) = &mut envelope.data.base_data else {
            return;
        };
        let properties = base_data
            .entry("properties")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        let Some(properties) = properties.as_object_mut() else {
            return;
        };
        for (key, value) in common.iter() {
            properties
                .entry(key.clone())
                .or_insert_with(|| serde_json::Value::String(value.clone()));
        }
    }

    /// Run each processor in order. A panicking processor neither mutates
    /// nor vetoes; the envelope proceeds as if that processor accepted it.
    ///
    /// Runs against a snapshot taken before the first hook, so a hook that
    /// registers or clears processors affects the next envelope, not this
    /// one.
    fn run_processors(&self, envelope: &mut Envelope) -> bool {
        let processors = Arc::clone(&self.processors.read().unwrap());
        for processor in processors.iter() {
            let verdict = catch_unwind(AssertUnwindSafe(|| processor.process(envelope)));
            match verdict {
                Ok(true) => {}
                Ok(false) => return false,
                Err(_) => {
                    warn!("telemetry processor panicked, keeping envelope");
                }
            }
        }
        true
    }
}

impl MetricSink for TelemetryClient {
    fn emit(&self, record: MetricRecord) {
        self.track_metric(MetricTelemetry {
            name: record.name,
            value: record.value,
            namespace: record.namespace,
            ..Default::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{reset_provisioning_registry, RetryStore, Transport, TransportResponse};
    use crate::error::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingTransport {
        posts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(&self, payload: Vec<u8>) -> Result<TransportResponse, TransportError> {
            self.posts
                .lock()
                .unwrap()
                .push(String::from_utf8(payload).unwrap());
            Ok(TransportResponse {
                status: 200,
                body: "{}".to_owned(),
            })
        }
    }

    fn client_with(tmp: &TempDir) -> (TelemetryClient, Arc<RecordingTransport>) {
        reset_provisioning_registry();
        let config = Arc::new(TelemetryConfig::new("test-key", "https://ingest.example.com"));
        let transport = Arc::new(RecordingTransport {
            posts: Mutex::new(Vec::new()),
        });
        let store = RetryStore::with_dir(Arc::clone(&config), tmp.path().join("retry"));
        let sender = Arc::new(Sender::with_transport(
            Arc::clone(&config),
            Arc::clone(&transport) as Arc<dyn Transport>,
            store,
        ));
        let channel = Channel::new(Arc::clone(&config), sender);
        (TelemetryClient::with_channel(config, channel), transport)
    }

    fn posted_batch(transport: &RecordingTransport) -> Vec<serde_json::Value> {
        let posts = transport.posts.lock().unwrap();
        serde_json::from_str(&posts[0]).unwrap()
    }

    #[tokio::test]
    async fn test_track_event_produces_envelope() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);

        client.track_event(EventTelemetry::new("login"));
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["name"], "beacon.event");
        assert_eq!(batch[0]["i_key"], "test-key");
        assert_eq!(batch[0]["data"]["base_type"], "EventData");
        assert_eq!(batch[0]["data"]["base_data"]["name"], "login");
    }

    #[tokio::test]
    async fn test_common_properties_applied_item_wins() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);
        client.set_common_property("region", "eu-west");
        client.set_common_property("env", "prod");

        let mut event = EventTelemetry::new("login");
        event.properties.insert("env".to_owned(), "dev".to_owned());
        client.track_event(event);
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        let properties = &batch[0]["data"]["base_data"]["properties"];
        assert_eq!(properties["region"], "eu-west");
        assert_eq!(properties["env"], "dev");
    }

    #[tokio::test]
    async fn test_processor_can_veto_envelope() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);
        client.add_telemetry_processor(|envelope: &mut Envelope| {
            envelope.name != "beacon.trace"
        });

        client.track_trace(TraceTelemetry {
            message: "noise".to_owned(),
            ..Default::default()
        });
        client.track_event(EventTelemetry::new("kept"));
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["name"], "beacon.event");
    }

    #[tokio::test]
    async fn test_processor_can_mutate_envelope() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);
        client.add_telemetry_processor(|envelope: &mut Envelope| {
            envelope
                .tags
                .insert("beacon.role".to_owned(), "worker".to_owned());
            true
        });

        client.track_event(EventTelemetry::new("login"));
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        assert_eq!(batch[0]["tags"]["beacon.role"], "worker");
    }

    #[tokio::test]
    async fn test_panicking_processor_keeps_envelope() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);
        client.add_telemetry_processor(|_: &mut Envelope| -> bool {
            panic!("broken processor");
        });

        client.track_event(EventTelemetry::new("survives"));
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_processor_can_modify_registrations_from_inside_hook() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);
        let client = Arc::new(client);

        // A hook that clears the registry mid-run must not deadlock, and
        // the change applies from the next envelope on.
        let hook_client = Arc::clone(&client);
        client.add_telemetry_processor(move |_: &mut Envelope| {
            hook_client.clear_telemetry_processors();
            false
        });

        client.track_event(EventTelemetry::new("vetoed"));
        client.track_event(EventTelemetry::new("kept"));
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["data"]["base_data"]["name"], "kept");
    }

    #[tokio::test]
    async fn test_clear_processors_restores_passthrough() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);
        client.add_telemetry_processor(|_: &mut Envelope| false);
        client.clear_telemetry_processors();

        client.track_event(EventTelemetry::new("login"));
        client.flush(FlushOptions::default()).await;

        assert_eq!(posted_batch(&transport).len(), 1);
    }

    #[tokio::test]
    async fn test_tracking_feeds_counters_when_enabled() {
        let tmp = TempDir::new().unwrap();
        let (client, _) = client_with(&tmp);
        client.counters().set_enabled(true);

        client.track_request(RequestTelemetry {
            name: "GET /".to_owned(),
            duration_ms: 120.0,
            success: true,
            ..Default::default()
        });
        client.track_request(RequestTelemetry {
            name: "GET /missing".to_owned(),
            duration_ms: 5.0,
            success: false,
            ..Default::default()
        });
        client.track_dependency(DependencyTelemetry {
            name: "sql".to_owned(),
            duration_ms: 40.0,
            success: true,
            ..Default::default()
        });
        client.track_exception(ExceptionTelemetry {
            message: "boom".to_owned(),
            ..Default::default()
        });

        let requests = client.counters().requests().snapshot(0);
        assert_eq!(requests.count, 2);
        assert_eq!(requests.failed_count, 1);
        assert_eq!(client.counters().dependencies().snapshot(0).count, 1);
        assert_eq!(client.counters().exceptions().snapshot(0).count, 1);
    }

    #[tokio::test]
    async fn test_metric_sink_goes_through_track_metric() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);

        client.emit(MetricRecord::new("requests.rate", 2.5).with_namespace("beacon.performance"));
        client.flush(FlushOptions::default()).await;

        let batch = posted_batch(&transport);
        assert_eq!(batch[0]["name"], "beacon.metric");
        assert_eq!(batch[0]["data"]["base_data"]["name"], "requests.rate");
        assert_eq!(batch[0]["data"]["base_data"]["value"], 2.5);
        assert_eq!(
            batch[0]["data"]["base_data"]["namespace"],
            "beacon.performance"
        );
    }

    #[test]
    fn test_track_outside_runtime_does_not_panic() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);

        client.track_event(EventTelemetry::new("offline"));
        client.track_trace(TraceTelemetry {
            message: "still offline".to_owned(),
            ..Default::default()
        });

        assert_eq!(client.channel().len(), 2);
        assert!(transport.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crash_flush_does_not_post() {
        let tmp = TempDir::new().unwrap();
        let (client, transport) = client_with(&tmp);

        client.track_event(EventTelemetry::new("last words"));
        client
            .flush(FlushOptions {
                is_app_crashing: true,
            })
            .await;

        assert!(transport.posts.lock().unwrap().is_empty());
        assert!(client.channel().is_empty());
    }
}
