// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, time::Duration};

/// Settings for a [`TimeWindowReporter`](crate::TimeWindowReporter).
///
/// With the `serde` feature this can be read from a configuration file. The window is given
/// in whole seconds under the `window_seconds` key:
///
/// ```
/// # #[cfg(feature = "serde")] {
/// use std::time::Duration;
/// use tally_reporter::ReporterConfig;
///
/// let config: ReporterConfig = toml::from_str(
///     r#"
///     destination = "http://localhost:8086"
///     database = "metrics"
///     window_seconds = 10
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.window, Duration::from_secs(10));
/// assert_eq!(config.write_target().unwrap(), "http://localhost:8086/write?db=metrics");
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ReporterConfig {
    /// Base location of the time-series database, for example `http://localhost:8086`.
    pub destination: Option<String>,
    /// Database to write to. Used to build the write target unless `endpoint` is set.
    pub database: Option<String>,
    /// Write location relative to `destination`, replacing the default `/write?db=<database>`.
    pub endpoint: Option<String>,
    /// How often aggregators are swept and exported.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "window_seconds", deserialize_with = "seconds")
    )]
    pub window: Duration,
    /// Bytes a sink may stage before writing them out.
    pub buffer_size: usize,
    /// Run one last sweep when the reporter shuts down.
    pub final_sweep_on_shutdown: bool,
}

#[cfg(feature = "serde")]
fn seconds<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    <u64 as serde::Deserialize>::deserialize(deserializer).map(Duration::from_secs)
}

impl ReporterConfig {
    /// Window used unless configured otherwise.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);
    /// Largest accepted window.
    pub const MAX_WINDOW: Duration = Duration::from_secs(60 * 60);
    /// Staging buffer size used unless configured otherwise.
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

    /// A config writing to `database` at `destination`, with default window and buffer size.
    pub fn new(destination: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            database: Some(database.into()),
            ..Self::default()
        }
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_blank(&self.destination) {
            return Err(ConfigError::MissingDestination);
        }
        if is_blank(&self.database) && is_blank(&self.endpoint) {
            return Err(ConfigError::MissingDatabase);
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.window > Self::MAX_WINDOW {
            return Err(ConfigError::WindowTooLarge(self.window));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        Ok(())
    }

    /// The location rows are written to: `endpoint` if set, otherwise `/write?db=<database>`,
    /// appended to `destination`.
    pub fn write_target(&self) -> Result<String, ConfigError> {
        self.validate()?;
        let destination = self.destination.as_deref().unwrap_or_default();
        let path = match self.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_owned(),
            None => format!("/write?db={}", self.database.as_deref().unwrap_or_default()),
        };
        Ok(format!(
            "{}/{}",
            destination.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            destination: None,
            database: None,
            endpoint: None,
            window: Self::DEFAULT_WINDOW,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            final_sweep_on_shutdown: true,
        }
    }
}

/// Returned by [`ReporterConfig::validate`] for an unusable configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No destination was given.
    MissingDestination,
    /// Neither a database nor an explicit endpoint was given.
    MissingDatabase,
    /// The window is zero.
    ZeroWindow,
    /// The window is longer than [`ReporterConfig::MAX_WINDOW`].
    WindowTooLarge(Duration),
    /// The staging buffer has no room.
    ZeroBufferSize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDestination => f.write_str("a destination is required"),
            Self::MissingDatabase => f.write_str("either a database or an endpoint is required"),
            Self::ZeroWindow => f.write_str("window must be longer than zero"),
            Self::WindowTooLarge(window) => write!(
                f,
                "window of {window:?} exceeds the maximum of {:?}",
                ReporterConfig::MAX_WINDOW
            ),
            Self::ZeroBufferSize => f.write_str("buffer size must be at least 1 byte"),
        }
    }
}

impl std::error::Error for ConfigError {}
