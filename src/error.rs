// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the beacon telemetry SDK.
//!
//! This module provides strongly-typed errors for the delivery pipeline,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation. Note that the public tracking API (`track_*`, `flush`) never
//! surfaces these errors to callers; they are handled internally and at most
//! produce a warning log line.

use thiserror::Error;

/// Errors that can occur while transmitting a batch to the ingestion endpoint.
///
/// These are transport-level failures only. An HTTP response with a non-2xx
/// status is not a `TransportError`; interpreting status codes is the
/// sender's job.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Check if this error is worth retrying later.
    ///
    /// Everything except a malformed endpoint is assumed to be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidEndpoint(_))
    }
}

/// Errors that can occur in the disk retry store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Retry directory could not be provisioned: {0}")]
    ProvisioningFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Corrupted retry file: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::ProvisioningFailed(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
