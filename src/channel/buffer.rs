// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory batching in front of the sender.
//!
//! Envelopes accumulate in a buffer until either the batch size limit is
//! reached or the batch interval elapses, whichever comes first. A timer
//! exists only while the buffer is non-empty; a size-triggered flush
//! cancels it, and a timer-triggered flush clears its own handle before
//! sending so it never cancels itself mid-flight.
//!
//! The buffer lock is a plain std mutex and is never held across an await.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TelemetryConfig;
use crate::types::Envelope;

use super::sender::Sender;

#[derive(Default)]
struct BufferState {
    items: Vec<String>,
    timer: Option<JoinHandle<()>>,
}

/// Buffers serialized envelopes and hands full batches to the sender.
#[derive(Clone)]
pub struct Channel {
    config: Arc<TelemetryConfig>,
    sender: Arc<Sender>,
    state: Arc<Mutex<BufferState>>,
}

impl Channel {
    pub fn new(config: Arc<TelemetryConfig>, sender: Arc<Sender>) -> Self {
        Self {
            config,
            sender,
            state: Arc::new(Mutex::new(BufferState::default())),
        }
    }

    /// Number of envelopes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue an envelope for transmission.
    ///
    /// Discards silently when the channel is disabled. An envelope that
    /// fails to serialize is logged and dropped; it never poisons the
    /// batch.
    pub fn send(&self, envelope: &Envelope) {
        self.send_serializable(envelope);
    }

    pub fn send_serializable<T: Serialize>(&self, item: &T) {
        if self.config.disabled() {
            return;
        }

        let serialized = match serde_json::to_string(item) {
            Ok(serialized) if !serialized.is_empty() => serialized,
            Ok(_) => {
                warn!("envelope serialized to an empty string, dropping");
                return;
            }
            Err(err) => {
                warn!(error = %err, "unable to serialize envelope, dropping");
                return;
            }
        };

        let batch = {
            let mut state = self.state.lock().unwrap();
            state.items.push(serialized);

            if state.items.len() >= self.config.max_batch_size() {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                Some(std::mem::take(&mut state.items))
            } else {
                // Without a runtime there is no timer to arm; the buffer
                // still flushes on size or on an explicit flush.
                if state.timer.is_none() {
                    if let Ok(handle) = Handle::try_current() {
                        state.timer = Some(self.spawn_flush_timer(&handle));
                    }
                }
                None
            }
        };

        if let Some(batch) = batch {
            debug!(items = batch.len(), "batch size reached, flushing");
            match Handle::try_current() {
                Ok(handle) => {
                    let sender = Arc::clone(&self.sender);
                    handle.spawn(async move {
                        sender.send(batch).await;
                    });
                }
                // Panic hooks and teardown paths can track after the
                // runtime is gone; spill to disk instead of panicking.
                Err(_) => {
                    warn!(
                        items = batch.len(),
                        "no async runtime, saving batch to disk"
                    );
                    self.sender.save_on_crash(&batch.join("\n"));
                }
            }
        }
    }

    /// Timer task covering the current buffer contents. Restarted only
    /// when a new item arrives into an empty, timerless buffer.
    fn spawn_flush_timer(&self, handle: &Handle) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.max_batch_interval_ms());
        let sender = Arc::clone(&self.sender);
        let state = Arc::clone(&self.state);
        handle.spawn(async move {
            tokio::time::sleep(interval).await;
            let batch = {
                let mut state = state.lock().unwrap();
                // Drop our own handle first so the flush below cannot be
                // aborted by a later size-triggered cancel.
                state.timer = None;
                std::mem::take(&mut state.items)
            };
            if !batch.is_empty() {
                debug!(items = batch.len(), "batch interval elapsed, flushing");
                sender.send(batch).await;
            }
        })
    }

    /// Flush whatever is buffered right now and wait for the send to
    /// resolve. A flush of an empty buffer completes immediately.
    pub async fn trigger_send(&self) {
        let batch = self.take_batch();
        if batch.is_empty() {
            return;
        }
        debug!(items = batch.len(), "manual flush");
        self.sender.send(batch).await;
    }

    /// Crash-path flush: synchronously persist the buffer to disk without
    /// touching the network or the runtime.
    pub fn trigger_send_on_crash(&self) {
        let batch = self.take_batch();
        if batch.is_empty() {
            return;
        }
        warn!(items = batch.len(), "crash flush, saving buffer to disk");
        self.sender.save_on_crash(&batch.join("\n"));
    }

    fn take_batch(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        std::mem::take(&mut state.items)
    }
}
