// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{MetricSink, SinkError, ValidationError};

/// One row as received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Metric name
    pub metric: String,
    /// `key=value` tags
    pub tags: Vec<String>,
    /// Alternating field names and values
    pub fields: Vec<String>,
    /// Milliseconds since the epoch, if one was given
    pub timestamp: Option<u64>,
}

impl Row {
    /// Look up the value of field `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .chunks_exact(2)
            .find(|pair| pair[0] == name)
            .map(|pair| pair[1].as_str())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    pending: Vec<Row>,
    flushed: Vec<Row>,
    flushes: u64,
    fail_next_write: bool,
    fail_next_flush: bool,
}

/// A [`MetricSink`] that records rows in memory. Clones share the same storage, so a test
/// can hand one clone to a reporter and inspect the other.
///
/// Rows move from pending to flushed on a successful [`MetricSink::flush`]. A failing flush
/// discards the pending rows, the way a failed batch upload would.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Recorded>>);

impl RecordingSink {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.0.lock().unwrap()
    }

    /// Make the next call to `write` fail with an I/O error.
    pub fn fail_next_write(&self) {
        self.lock().fail_next_write = true;
    }

    /// Make the next call to `flush` fail with an I/O error.
    pub fn fail_next_flush(&self) {
        self.lock().fail_next_flush = true;
    }

    /// Rows that have been delivered by a successful flush.
    pub fn flushed_rows(&self) -> Vec<Row> {
        self.lock().flushed.clone()
    }

    /// Rows written since the last flush.
    pub fn pending_rows(&self) -> Vec<Row> {
        self.lock().pending.clone()
    }

    /// Remove and return the delivered rows.
    pub fn take_flushed(&self) -> Vec<Row> {
        std::mem::take(&mut self.lock().flushed)
    }

    /// Number of successful flushes.
    pub fn flushes(&self) -> u64 {
        self.lock().flushes
    }
}

impl MetricSink for RecordingSink {
    fn write(
        &mut self,
        metric: &str,
        tags: &[String],
        fields: &[String],
        timestamp: Option<u64>,
    ) -> Result<(), SinkError> {
        let mut recorded = self.lock();
        if std::mem::take(&mut recorded.fail_next_write) {
            return Err(io::Error::other("injected write failure").into());
        }
        if fields.len() % 2 != 0 {
            return Err(ValidationError::invalid("fields must alternate name and value").into());
        }
        recorded.pending.push(Row {
            metric: metric.to_owned(),
            tags: tags.to_vec(),
            fields: fields.to_vec(),
            timestamp,
        });
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut recorded = self.lock();
        if std::mem::take(&mut recorded.fail_next_flush) {
            recorded.pending.clear();
            return Err(io::Error::other("injected flush failure"));
        }
        let pending = std::mem::take(&mut recorded.pending);
        recorded.flushed.extend(pending);
        recorded.flushes += 1;
        Ok(())
    }
}

/// A [`MetricSink`] that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricSink for NullSink {
    fn write(
        &mut self,
        _metric: &str,
        _tags: &[String],
        _fields: &[String],
        _timestamp: Option<u64>,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An [`io::Write`] into a shared buffer, for testing sinks that encode to a byte stream.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// The buffer's current contents as a string.
    pub fn dump(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Take the buffer's contents, leaving it empty.
    pub fn take_string(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
