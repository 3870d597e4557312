// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Contains the [`MetricSink`] trait, the destination the reporter exports aggregated rows to.

use std::{fmt, io};

use crate::ValidationError;

/// The error cases for a [`MetricSink::write`] call.
#[derive(Debug)]
pub enum SinkError {
    /// The row could not be encoded for this sink.
    Validation(ValidationError),
    /// The transport to the destination failed.
    Io(io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(err) => fmt::Display::fmt(err, f),
            Self::Io(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ValidationError> for SinkError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Accepts exported rows and delivers them to a time-series destination.
///
/// The reporter calls [`MetricSink::write`] once per exported row and [`MetricSink::flush`]
/// once at the end of every window. Retries and backoff, if any, are the sink's concern.
///
/// Rows are not considered delivered until a subsequent `flush` returns `Ok`. If any call
/// fails, the reporter abandons the window and will re-export rows on the next one.
pub trait MetricSink {
    /// Write one row.
    ///
    /// - `metric` is the metric name
    /// - `tags` are the row's `key=value` tags in order
    /// - `fields` alternate field name and formatted value: `[name_0, value_0, name_1, value_1, ...]`
    /// - `timestamp` is milliseconds since the Unix epoch, or `None` to let the destination
    ///   assign the arrival time
    fn write(
        &mut self,
        metric: &str,
        tags: &[String],
        fields: &[String],
        timestamp: Option<u64>,
    ) -> Result<(), SinkError>;

    /// Deliver every row written so far.
    fn flush(&mut self) -> io::Result<()>;
}

impl<S: MetricSink + ?Sized> MetricSink for &mut S {
    fn write(
        &mut self,
        metric: &str,
        tags: &[String],
        fields: &[String],
        timestamp: Option<u64>,
    ) -> Result<(), SinkError> {
        (**self).write(metric, tags, fields, timestamp)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<S: MetricSink + ?Sized> MetricSink for Box<S> {
    fn write(
        &mut self,
        metric: &str,
        tags: &[String],
        fields: &[String],
        timestamp: Option<u64>,
    ) -> Result<(), SinkError> {
        (**self).write(metric, tags, fields, timestamp)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}
