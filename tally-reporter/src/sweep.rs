// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tally::{AggregatorRegistry, FieldType, Row, UnsupportedOperation};
use tally_core::{MetricSink, SinkError};

/// Exports rows updated since the last successful pass, and owns the watermark that records
/// how far that is.
///
/// The watermark only moves forward, and only after a pass has written and flushed every
/// row. A failed pass leaves it in place, so rows it had not yet reached are exported by the
/// next pass. Rows the failed pass already reset are not recovered.
#[derive(Debug, Clone, Default)]
pub struct Sweeper {
    watermark: Arc<AtomicU64>,
}

/// What a successful [`Sweeper::sweep`] exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Rows written to the sink.
    pub rows: usize,
    /// The watermark after the pass.
    pub watermark: u64,
}

impl Sweeper {
    /// A sweeper that has exported nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the epoch of the newest row the last successful pass exported,
    /// or 0 before the first one.
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Export every row of every registered aggregator updated after the watermark, reading
    /// and resetting each of its fields, then flush `sink`.
    ///
    /// Stops at the first sink error.
    pub fn sweep(
        &self,
        registry: &AggregatorRegistry,
        sink: &mut impl MetricSink,
    ) -> Result<SweepReport, SweepError> {
        let watermark = self.watermark();
        let mut newest = 0;
        let mut rows = 0;
        for aggregator in registry.snapshot() {
            let mut cursor = aggregator.cursor();
            let names = cursor.fields();
            let types = cursor.types();
            let metric = cursor.metric_name();
            while let Some(row) = cursor.next() {
                let last_updated = row.last_updated();
                if last_updated <= watermark {
                    continue;
                }
                let fields = export_fields(names, types, &row)?;
                sink.write(metric, row.tags(), &fields, None)
                    .map_err(|source| SweepError::Write {
                        metric: metric.to_owned(),
                        source,
                    })?;
                newest = newest.max(last_updated);
                rows += 1;
            }
            tracing::trace!(metric, rows, "swept aggregator");
        }
        sink.flush().map_err(SweepError::Flush)?;
        if newest > 0 {
            self.watermark.fetch_max(newest, Ordering::AcqRel);
        }
        Ok(SweepReport {
            rows,
            watermark: self.watermark(),
        })
    }
}

// [name_0, value_0, name_1, value_1, ...]
fn export_fields(
    names: &[String],
    types: &[FieldType],
    row: &Row<'_>,
) -> Result<Vec<String>, SweepError> {
    let mut fields = Vec::with_capacity(names.len() * 2);
    for (i, (name, ty)) in names.iter().zip(types).enumerate() {
        fields.push(name.clone());
        fields.push(ty.read_and_reset(row, i).map_err(SweepError::Read)?);
    }
    Ok(fields)
}

/// Why a [`Sweeper::sweep`] pass was abandoned.
#[derive(Debug)]
pub enum SweepError {
    /// The sink rejected a row.
    Write {
        /// Metric the row belonged to
        metric: String,
        /// The sink's error
        source: SinkError,
    },
    /// The sink failed to flush.
    Flush(io::Error),
    /// A field could not be read as its declared type.
    Read(UnsupportedOperation),
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write { metric, source } => write!(f, "failed to write `{metric}`: {source}"),
            Self::Flush(err) => write!(f, "failed to flush: {err}"),
            Self::Read(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for SweepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write { source, .. } => Some(source),
            Self::Flush(err) => Some(err),
            Self::Read(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert2::check;
    use tally::{Aggregator, AggregatorKind, AggregatorRegistry, DistributionBucket};
    use tally_core::{TagSet, test_util::RecordingSink};

    use super::{SweepError, Sweeper};

    fn registry() -> (AggregatorRegistry, Arc<Aggregator>) {
        let registry = AggregatorRegistry::new();
        let latency = registry.register(Aggregator::new(
            "latency",
            AggregatorKind::BasicHistogram(DistributionBucket::new([10, 50, 200]).unwrap()),
        ));
        (registry, latency)
    }

    #[test]
    fn exports_alternating_fields_and_resets() {
        let (registry, latency) = registry();
        let tags = TagSet::new(["host=a"]);
        for (ts, value) in [5, 10, 11, 60, 500].into_iter().enumerate() {
            latency.apply(&tags, value, 100 + ts as u64);
        }
        let sweeper = Sweeper::new();
        let mut sink = RecordingSink::default();

        let report = sweeper.sweep(&registry, &mut sink).unwrap();
        check!(report.rows == 1);
        check!(report.watermark == 104);
        check!(sweeper.watermark() == 104);
        let rows = sink.take_flushed();
        check!(rows.len() == 1);
        check!(rows[0].metric == "latency");
        check!(rows[0].tags == ["host=a"]);
        check!(rows[0].timestamp == None);
        check!(
            rows[0].fields
                == [
                    "count", "5", "sum", "586", "min", "5", "max", "500", "<=10", "2", "<=50",
                    "1", "<=200", "1", "other", "1"
                ]
        );

        // nothing new: nothing exported and the watermark stays
        let report = sweeper.sweep(&registry, &mut sink).unwrap();
        check!(report.rows == 0);
        check!(sweeper.watermark() == 104);
        check!(sink.take_flushed().is_empty());
    }

    // the failed row was already reset, so only what arrives afterwards is exported
    #[test]
    fn failed_row_is_reset_by_the_failed_pass() {
        let (registry, latency) = registry();
        latency.apply(&TagSet::new(["host=a"]), 1, 10);
        let sweeper = Sweeper::new();
        let mut sink = RecordingSink::default();
        sweeper.sweep(&registry, &mut sink).unwrap();
        check!(sweeper.watermark() == 10);
        sink.take_flushed();

        latency.apply(&TagSet::new(["host=a"]), 2, 20);
        sink.fail_next_write();
        let err = sweeper.sweep(&registry, &mut sink).unwrap_err();
        check!(let SweepError::Write { .. } = err);
        check!(sweeper.watermark() == 10);

        latency.apply(&TagSet::new(["host=a"]), 3, 30);
        sweeper.sweep(&registry, &mut sink).unwrap();
        let rows = sink.take_flushed();
        check!(rows.len() == 1);
        check!(rows[0].field("count") == Some("1"));
        check!(rows[0].field("sum") == Some("3"));
        check!(sweeper.watermark() == 30);
    }

    #[test]
    fn rows_after_a_failed_write_come_back_with_their_totals() {
        let (registry, latency) = registry();
        for host in 0..3 {
            let tags = TagSet::new([format!("h={host}")]);
            latency.apply(&tags, 10 + host, 5);
            latency.apply(&tags, 20 + host, 5);
        }
        let sweeper = Sweeper::new();
        let mut sink = RecordingSink::default();
        sink.fail_next_write();
        let err = sweeper.sweep(&registry, &mut sink).unwrap_err();
        check!(let SweepError::Write { .. } = err);
        check!(sweeper.watermark() == 0);
        check!(sink.pending_rows().is_empty());

        let report = sweeper.sweep(&registry, &mut sink).unwrap();
        check!(report.rows == 3);
        check!(sweeper.watermark() == 5);
        let rows = sink.take_flushed();
        let (failed, unreached): (Vec<_>, Vec<_>) =
            rows.iter().partition(|row| row.field("count") == Some("0"));

        // the row the failed write was for had already been reset
        check!(failed.len() == 1);
        check!(failed[0].field("sum") == Some("0"));
        check!(failed[0].field("min") == Some(i64::MAX.to_string().as_str()));

        check!(unreached.len() == 2);
        for row in unreached {
            let host: i64 = row.tags[0].trim_start_matches("h=").parse().unwrap();
            check!(row.field("count") == Some("2"));
            check!(row.field("sum") == Some((30 + 2 * host).to_string().as_str()));
            check!(row.field("min") == Some((10 + host).to_string().as_str()));
            check!(row.field("max") == Some((20 + host).to_string().as_str()));
        }
    }

    #[test]
    fn flush_failure_keeps_watermark() {
        let (registry, latency) = registry();
        latency.apply(&TagSet::new(["host=a"]), 7, 10);
        let sweeper = Sweeper::new();
        let mut sink = RecordingSink::default();
        sink.fail_next_flush();
        let err = sweeper.sweep(&registry, &mut sink).unwrap_err();
        check!(let SweepError::Flush(_) = err);
        check!(sweeper.watermark() == 0);
        check!(sink.flushed_rows().is_empty());

        // the row is still newer than the watermark and is exported again
        latency.apply(&TagSet::new(["host=a"]), 4, 11);
        let report = sweeper.sweep(&registry, &mut sink).unwrap();
        check!(report.rows == 1);
        check!(report.watermark == 11);
        let rows = sink.take_flushed();
        check!(rows[0].field("count") == Some("1"));
        check!(rows[0].field("max") == Some("4"));
    }

    #[test]
    fn rows_at_or_below_watermark_are_skipped() {
        let (registry, latency) = registry();
        let sweeper = Sweeper::new();
        let mut sink = RecordingSink::default();
        latency.apply(&TagSet::new(["host=a"]), 1, 50);
        sweeper.sweep(&registry, &mut sink).unwrap();

        // a late observation stamped before the watermark stays in its slot
        latency.apply(&TagSet::new(["host=b"]), 1, 40);
        let report = sweeper.sweep(&registry, &mut sink).unwrap();
        check!(report.rows == 0);
        check!(sink.take_flushed().len() == 1);
    }
}
