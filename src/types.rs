// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the beacon telemetry SDK.
//!
//! This module defines the envelope format that travels through the delivery
//! channel, the telemetry item types accepted by the client's `track_*`
//! methods, and the normalized metric record emitted by the performance
//! sampler.
//!
//! The envelope is deliberately opaque to the channel: once serialized it is
//! just a string, and the channel never inspects it again.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Envelope
// ============================================================================

/// The kind of telemetry carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryType {
    Event,
    Trace,
    Metric,
    Exception,
    Request,
    Dependency,
    Availability,
    PageView,
}

impl TelemetryType {
    /// The `data.base_type` discriminator carried on the wire.
    pub fn base_type(&self) -> &'static str {
        match self {
            Self::Event => "EventData",
            Self::Trace => "MessageData",
            Self::Metric => "MetricData",
            Self::Exception => "ExceptionData",
            Self::Request => "RequestData",
            Self::Dependency => "RemoteDependencyData",
            Self::Availability => "AvailabilityData",
            Self::PageView => "PageViewData",
        }
    }

    /// The envelope name for this telemetry type.
    pub fn envelope_name(&self) -> &'static str {
        match self {
            Self::Event => "beacon.event",
            Self::Trace => "beacon.trace",
            Self::Metric => "beacon.metric",
            Self::Exception => "beacon.exception",
            Self::Request => "beacon.request",
            Self::Dependency => "beacon.dependency",
            Self::Availability => "beacon.availability",
            Self::PageView => "beacon.page_view",
        }
    }
}

/// The typed payload inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeData {
    /// Discriminator naming the shape of `base_data`.
    pub base_type: String,

    /// The telemetry payload itself, already shaped for the wire.
    pub base_data: serde_json::Value,
}

/// One telemetry item ready for transport.
///
/// Created by the client's envelope construction, serialized exactly once at
/// the point of buffering, and opaque from then on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope name, derived from the telemetry type.
    pub name: String,

    /// Capture time, RFC 3339 with millisecond precision.
    pub time: String,

    /// Instrumentation key identifying the owning resource.
    pub i_key: String,

    /// Context tags (role, SDK version, ...). Sorted for stable output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    pub data: EnvelopeData,
}

impl Envelope {
    /// Build an envelope of the given type around an already-shaped payload.
    pub fn new(
        telemetry_type: TelemetryType,
        i_key: impl Into<String>,
        base_data: serde_json::Value,
        time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name: telemetry_type.envelope_name().to_string(),
            time: time
                .unwrap_or_else(Utc::now)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            i_key: i_key.into(),
            tags: BTreeMap::new(),
            data: EnvelopeData {
                base_type: telemetry_type.base_type().to_string(),
                base_data,
            },
        }
    }
}

// ============================================================================
// Telemetry items
// ============================================================================

/// Trace severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Verbose,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

/// A named occurrence without a duration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventTelemetry {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub measurements: HashMap<String, f64>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

impl EventTelemetry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A free-form log message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraceTelemetry {
    pub message: String,
    pub severity: SeverityLevel,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

/// A numeric measurement, either a single sample or a pre-aggregated one.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricTelemetry {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Sample count when the value is an aggregate; 1 when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

impl MetricTelemetry {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            ..Default::default()
        }
    }
}

/// An error that occurred in the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExceptionTelemetry {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub severity: SeverityLevel,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

/// A completed inbound request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestTelemetry {
    pub name: String,
    pub url: String,
    pub duration_ms: f64,
    pub result_code: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

/// A completed outbound call to another component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DependencyTelemetry {
    pub name: String,
    /// Command or URL issued to the target (connection string, query, ...).
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub dependency_type: String,
    pub duration_ms: f64,
    pub result_code: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

/// Result of an availability test run against the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AvailabilityTelemetry {
    pub name: String,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

/// A page view, for applications with a browsable surface.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PageViewTelemetry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

// ============================================================================
// Metric records
// ============================================================================

/// The normalized output unit of the performance sampler.
///
/// Created fresh per emission and immutable once created; ownership transfers
/// to the delivery buffer immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}
