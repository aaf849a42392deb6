// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The delivery channel: buffering, transmission, and disk retry.
//!
//! Telemetry flows through three stages:
//!
//! - [`Channel`] batches serialized envelopes in memory and flushes on
//!   size or interval.
//! - [`Sender`] posts batches over a [`Transport`] and interprets the
//!   ingestion response, including partial successes.
//! - [`RetryStore`] keeps undeliverable batches on disk until a later
//!   resend cycle picks them up.
//!
//! Nothing here returns errors to the caller. Telemetry delivery is best
//! effort; failures degrade to disk persistence or a logged drop.

mod buffer;
mod sender;
mod store;

pub use buffer::Channel;
pub use sender::{HttpTransport, SendOutcome, Sender, Transport, TransportResponse};
pub use store::{RetryStore, TEMPDIR_PREFIX};

#[doc(hidden)]
pub use store::reset_provisioning_registry;
