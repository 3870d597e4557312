// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

use std::{fmt::Write as _, io};

use tally_core::{MetricSink, SinkError, ValidationError};

/// A [`MetricSink`] that encodes rows as line protocol and writes them to `W`.
///
/// Lines are staged in memory and written out once the next line would take the stage past
/// `buffer_size` bytes, and on every [`flush`](MetricSink::flush). A line longer than
/// `buffer_size` is written out on its own.
#[derive(Debug)]
pub struct LineProtocol<W> {
    output: W,
    stage: String,
    buffer_size: usize,
}

impl<W: io::Write> LineProtocol<W> {
    /// A sink writing to `output` that stages up to `buffer_size` bytes.
    pub fn new(output: W, buffer_size: usize) -> Self {
        Self {
            output,
            stage: String::with_capacity(buffer_size.min(1024 * 1024)),
            buffer_size,
        }
    }

    /// Bytes staged and not yet written to the output.
    pub fn staged_len(&self) -> usize {
        self.stage.len()
    }

    /// The output writer.
    pub fn get_ref(&self) -> &W {
        &self.output
    }

    /// Drop the sink and return the output. Staged lines are discarded; call
    /// [`flush`](MetricSink::flush) first to keep them.
    pub fn into_inner(self) -> W {
        self.output
    }

    fn write_stage(&mut self) -> io::Result<()> {
        let result = self.output.write_all(self.stage.as_bytes());
        self.stage.clear();
        // don't let one huge window pin many MB of buffer forever
        self.stage.shrink_to(self.buffer_size.min(1024 * 1024));
        result
    }
}

impl<W: io::Write> MetricSink for LineProtocol<W> {
    fn write(
        &mut self,
        metric: &str,
        tags: &[String],
        fields: &[String],
        timestamp: Option<u64>,
    ) -> Result<(), SinkError> {
        validate(metric, tags, fields)?;
        let line = encode(metric, tags, fields, timestamp);
        if !self.stage.is_empty() && self.stage.len() + line.len() > self.buffer_size {
            self.write_stage()?;
        }
        self.stage.push_str(&line);
        if self.stage.len() > self.buffer_size {
            self.write_stage()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.stage.is_empty() {
            self.write_stage()?;
        }
        self.output.flush()
    }
}

fn validate(metric: &str, tags: &[String], fields: &[String]) -> Result<(), ValidationError> {
    let mut errors = ValidationError::builder();
    if metric.is_empty() {
        errors.invalid("metric name is empty");
    }
    if metric.contains('\n') {
        errors.invalid("metric name contains a newline");
    }
    for tag in tags {
        match tag.split_once('=') {
            Some(("", _)) => {
                errors.invalid_for(tag, "tag key is empty");
            }
            None => {
                errors.invalid_for(tag, "tag is not key=value");
            }
            Some(_) => {}
        }
        if tag.contains('\n') {
            errors.invalid_for(tag, "contains a newline");
        }
    }
    if fields.is_empty() || fields.len() % 2 != 0 {
        errors.invalid("fields must be non-empty name, value pairs");
    }
    for name in fields.iter().step_by(2) {
        if name.is_empty() || name.contains('\n') {
            errors.invalid_for(name, "invalid field name");
        }
    }
    errors.build()
}

// measurement[,tag_key=tag_value...] field_key=field_value[,...] [timestamp_ns]\n
fn encode(metric: &str, tags: &[String], fields: &[String], timestamp: Option<u64>) -> String {
    let mut line = String::with_capacity(64);
    escape_into(&mut line, metric, &[',', ' ']);
    for tag in tags {
        let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }
    line.push(' ');
    for (i, pair) in fields.chunks_exact(2).enumerate() {
        if i > 0 {
            line.push(',');
        }
        escape_into(&mut line, &pair[0], &[',', '=', ' ']);
        line.push('=');
        push_field_value(&mut line, &pair[1]);
    }
    if let Some(millis) = timestamp {
        line.push(' ');
        line.push_str(itoa::Buffer::new().format(millis.saturating_mul(1_000_000)));
    }
    line.push('\n');
    line
}

fn escape_into(line: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            line.push('\\');
        }
        line.push(c);
    }
}

// integers get the `i` suffix, other numbers go as floats, anything else as a quoted string
fn push_field_value(line: &mut String, value: &str) {
    if let Ok(integer) = value.parse::<i64>() {
        line.push_str(itoa::Buffer::new().format(integer));
        line.push('i');
    } else if let Ok(float) = value.parse::<f64>()
        && float.is_finite()
    {
        let _ = write!(line, "{float}");
    } else {
        line.push('"');
        escape_into(line, value, &['"']);
        line.push('"');
    }
}
