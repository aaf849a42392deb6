// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Internal diagnostics logging for the SDK.
//!
//! The SDK reports its own problems (failed transmissions, refused disk
//! writes, misbehaving processors) through `tracing`. Host applications
//! that already install a subscriber get those events for free; this
//! module is for standalone tools and tests that want a quick console
//! subscriber scoped to the SDK.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Configuration for the built-in console subscriber.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Whether to use compact log format.
    pub compact: bool,

    /// Custom filter directive (overrides default_level).
    pub filter_directive: Option<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
        }
    }
}

impl DiagnosticsConfig {
    /// Verbose config showing every SDK event, for debugging delivery.
    pub fn verbose() -> Self {
        Self {
            default_level: Level::DEBUG,
            ansi_colors: true,
            compact: false,
            filter_directive: Some("beacon=debug".to_string()),
        }
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }
}

/// Guard returned by [`init`]. Keep it alive for the life of the program.
pub struct DiagnosticsGuard {
    _private: (),
}

/// Install the console subscriber.
///
/// Call at most once per process; a host application with its own
/// subscriber should skip this entirely. `RUST_LOG` takes precedence
/// over the configured level.
pub fn init(config: &DiagnosticsConfig) -> io::Result<DiagnosticsGuard> {
    let filter = match &config.filter_directive {
        Some(directive) => EnvFilter::try_new(directive)
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.default_level))),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.default_level))),
    };

    let fmt_layer = fmt::layer().with_ansi(config.ansi_colors).with_target(true);

    if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))?;
    }

    Ok(DiagnosticsGuard { _private: () })
}
