//! Aggregators: the field layout and combine logic applied to each slot of a table.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tally_core::TagSet;

use crate::{
    AggregationTable, Cursor, DistributionBucket, Row, Slot, TableConfig, TableConfigError,
    UnsupportedOperation,
};

const BASIC_FIELDS: [&str; 4] = ["count", "sum", "min", "max"];
const BASIC_IDENTITY: [i64; 4] = [0, 0, i64::MAX, i64::MIN];

const COUNT: usize = 0;
const SUM: usize = 1;
const MIN: usize = 2;
const MAX: usize = 3;

/// How a field's 64 bits are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A signed integer.
    Long,
    /// An IEEE 754 double stored as its bit pattern.
    Double,
}

impl FieldType {
    /// Read and reset field `i` of `row` as this type, formatted for export.
    pub fn read_and_reset(self, row: &Row<'_>, i: usize) -> Result<String, UnsupportedOperation> {
        match self {
            FieldType::Long => row.read_and_reset_long(i).map(|value| value.to_string()),
            FieldType::Double => row.read_and_reset_double(i).map(|value| value.to_string()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::Long => "long",
            FieldType::Double => "double",
        })
    }
}

/// The closed set of aggregation layouts.
///
/// Each kind defines its field names and types, the identity value every field is reset to,
/// and how an observation is combined into a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorKind {
    /// `count`, `sum`, `min` and `max` of the observed values.
    Basic,
    /// The [`Basic`](AggregatorKind::Basic) fields followed by one counter per bucket.
    BasicHistogram(DistributionBucket),
}

impl AggregatorKind {
    /// Names of the fields, in slot order.
    pub fn field_names(&self) -> Vec<String> {
        let basic = BASIC_FIELDS.iter().map(|name| (*name).to_owned());
        match self {
            AggregatorKind::Basic => basic.collect(),
            AggregatorKind::BasicHistogram(buckets) => {
                basic.chain(buckets.bucket_names().iter().cloned()).collect()
            }
        }
    }

    /// Types of the fields, in slot order.
    pub fn field_types(&self) -> Vec<FieldType> {
        vec![FieldType::Long; self.width()]
    }

    /// Reset value of each field: 0 for counters and sums, the extreme opposite for min/max.
    pub fn identity(&self) -> Vec<i64> {
        let mut identity = BASIC_IDENTITY.to_vec();
        identity.resize(self.width(), 0);
        identity
    }

    /// Fields per slot.
    pub fn width(&self) -> usize {
        match self {
            AggregatorKind::Basic => BASIC_FIELDS.len(),
            AggregatorKind::BasicHistogram(buckets) => BASIC_FIELDS.len() + buckets.count(),
        }
    }

    /// Fold `value` into `slot`.
    pub fn combine(&self, slot: &Slot<'_>, value: i64) {
        slot.add(COUNT, 1);
        slot.add(SUM, value);
        slot.min(MIN, value);
        slot.max(MAX, value);
        if let AggregatorKind::BasicHistogram(buckets) = self {
            slot.add(BASIC_FIELDS.len() + buckets.bucket_index(value), 1);
        }
    }
}

/// Aggregates the observations of one metric, keyed by [`TagSet`].
///
/// Any number of threads may call [`Aggregator::apply`] concurrently; a single reader drains
/// the aggregated values through a [`Cursor`].
///
/// ```
/// use tally::{Aggregator, AggregatorKind};
/// use tally_core::TagSet;
///
/// let latency = Aggregator::new("latency", AggregatorKind::Basic);
/// let tags = TagSet::new(["host=a"]);
/// latency.apply(&tags, 12, 1_000);
/// latency.apply(&tags, 30, 1_001);
///
/// let mut cursor = latency.cursor();
/// let row = cursor.next().unwrap();
/// assert_eq!(row.read_long(1), Ok(42));
/// assert_eq!(row.last_updated(), 1_001);
/// ```
pub struct Aggregator {
    name: String,
    kind: AggregatorKind,
    fields: Box<[String]>,
    types: Box<[FieldType]>,
    table: AggregationTable,
    dropped_observations: AtomicU64,
}

impl Aggregator {
    /// An aggregator for `name` with the default [`TableConfig`].
    pub fn new(name: impl Into<String>, kind: AggregatorKind) -> Self {
        let table = AggregationTable::new(TableConfig::default(), &kind.identity());
        match table {
            Ok(table) => Self::from_parts(name.into(), kind, table),
            Err(err) => unreachable!("default table config is valid: {err}"),
        }
    }

    /// An aggregator for `name` with explicit table capacities.
    pub fn with_config(
        name: impl Into<String>,
        kind: AggregatorKind,
        config: TableConfig,
    ) -> Result<Self, TableConfigError> {
        let table = AggregationTable::new(config, &kind.identity())?;
        Ok(Self::from_parts(name.into(), kind, table))
    }

    fn from_parts(name: String, kind: AggregatorKind, table: AggregationTable) -> Self {
        Self {
            name,
            fields: kind.field_names().into(),
            types: kind.field_types().into(),
            kind,
            table,
            dropped_observations: AtomicU64::new(0),
        }
    }

    /// Combine `value` into the slot for `tags` and mark it updated at `timestamp`
    /// (milliseconds since the Unix epoch).
    ///
    /// If the table is at its maximum capacity and `tags` is new, the observation is dropped
    /// and counted in [`Aggregator::dropped_observations`].
    pub fn apply(&self, tags: &TagSet, value: i64, timestamp: u64) {
        let applied = self
            .table
            .apply(tags, timestamp, |slot| self.kind.combine(slot, value));
        if !applied {
            self.dropped_observations.fetch_add(1, Ordering::Relaxed);
            crate::rate_limited!(
                Duration::from_secs(60),
                |suppressed| tracing::error!(
                    metric = %self.name,
                    %tags,
                    max_capacity = self.table.max_capacity(),
                    suppressed,
                    "aggregation table is full, dropping observations for new tag sets"
                )
            );
        }
    }

    /// [`Aggregator::apply`] stamped with the current time from
    /// [`tally_timesource::time_source`].
    pub fn record(&self, tags: &TagSet, value: i64) {
        let now = tally_timesource::time_source().epoch_millis();
        self.apply(tags, value, now);
    }

    /// A cursor over the tag sets present now, in table order.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self, self.table.tag_sets())
    }

    /// A cursor over the tag sets present now, in [`TagSet::canonical_cmp`] order.
    pub fn sorted_cursor(&self) -> Cursor<'_> {
        let mut tag_sets = self.table.tag_sets();
        tag_sets.sort_unstable_by(TagSet::canonical_cmp);
        Cursor::new(self, tag_sets)
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The aggregation layout.
    pub fn kind(&self) -> &AggregatorKind {
        &self.kind
    }

    /// Field names, in slot order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field types, in slot order.
    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    /// The backing table.
    pub fn table(&self) -> &AggregationTable {
        &self.table
    }

    /// Observations dropped because the table was full.
    pub fn dropped_observations(&self) -> u64 {
        self.dropped_observations.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("table", &self.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use tally_core::TagSet;
    use tally_timesource::{TimeSource, fakes::StaticTimeSource, set_time_source};

    use super::{Aggregator, AggregatorKind};
    use crate::{DistributionBucket, TableConfig};

    fn histogram() -> AggregatorKind {
        AggregatorKind::BasicHistogram(DistributionBucket::new([10, 50, 200]).unwrap())
    }

    fn read_all(aggregator: &Aggregator) -> Vec<i64> {
        let mut cursor = aggregator.cursor();
        let row = cursor.next().unwrap();
        (0..row.width()).map(|i| row.read_long(i).unwrap()).collect()
    }

    #[test]
    fn histogram_layout() {
        let kind = histogram();
        check!(
            kind.field_names() == ["count", "sum", "min", "max", "<=10", "<=50", "<=200", "other"]
        );
        check!(kind.identity() == [0, 0, i64::MAX, i64::MIN, 0, 0, 0, 0]);
        check!(AggregatorKind::Basic.width() == 4);
    }

    #[test]
    fn histogram_scenario() {
        let aggregator = Aggregator::new("latency", histogram());
        let tags = TagSet::new(["host=a"]);
        for (ts, value) in [5, 10, 11, 60, 500].into_iter().enumerate() {
            aggregator.apply(&tags, value, ts as u64 + 1);
        }
        check!(read_all(&aggregator) == [5, 586, 5, 500, 2, 1, 1, 1]);
    }

    #[test]
    fn record_uses_time_source() {
        let _guard = set_time_source(TimeSource::custom(StaticTimeSource::at_time(
            std::time::UNIX_EPOCH + std::time::Duration::from_millis(42_000),
        )));
        let aggregator = Aggregator::new("requests", AggregatorKind::Basic);
        let tags = TagSet::new(["route=/"]);
        aggregator.record(&tags, 1);
        let mut cursor = aggregator.cursor();
        check!(cursor.next().unwrap().last_updated() == 42_000);
    }

    #[test]
    fn full_table_drops_new_tag_sets_only() {
        let aggregator = Aggregator::with_config(
            "requests",
            AggregatorKind::Basic,
            TableConfig {
                initial_capacity: 2,
                max_capacity: 4,
            },
        )
        .unwrap();
        for i in 0..4 {
            aggregator.apply(&TagSet::new([format!("id={i}")]), 10, 1);
        }
        aggregator.apply(&TagSet::new(["id=overflow"]), 10, 1);
        check!(aggregator.dropped_observations() == 1);

        aggregator.apply(&TagSet::new(["id=0"]), 5, 2);
        check!(aggregator.dropped_observations() == 1);
        let mut cursor = aggregator.sorted_cursor();
        let row = cursor.next().unwrap();
        check!(row.tags().as_slice() == ["id=0"]);
        check!(row.read_long(0) == Ok(2));
        check!(row.read_long(1) == Ok(15));
        check!(cursor.len() == 4);
    }

    #[test]
    fn concurrent_applies_are_exact() {
        const THREADS: u64 = 8;
        const PER_THREAD: usize = 2_000;
        let aggregator = Aggregator::with_config(
            "latency",
            histogram(),
            TableConfig {
                initial_capacity: 1,
                max_capacity: 64,
            },
        )
        .unwrap();

        let values: Vec<Vec<i64>> = (0..THREADS)
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                (0..PER_THREAD).map(|_| rng.random_range(0..1_000)).collect()
            })
            .collect();

        std::thread::scope(|s| {
            for (thread, values) in values.iter().enumerate() {
                let aggregator = &aggregator;
                s.spawn(move || {
                    for (i, value) in values.iter().enumerate() {
                        let tags = TagSet::new([format!("shard={}", i % 16)]);
                        aggregator.apply(&tags, *value, (thread * PER_THREAD + i) as u64);
                    }
                });
            }
        });

        let all: Vec<i64> = values.iter().flatten().copied().collect();
        let mut count = 0;
        let mut sum = 0;
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut bucket_total = 0;
        let mut cursor = aggregator.cursor();
        while let Some(row) = cursor.next() {
            count += row.read_long(0).unwrap();
            sum += row.read_long(1).unwrap();
            min = min.min(row.read_long(2).unwrap());
            max = max.max(row.read_long(3).unwrap());
            let row_buckets: i64 = (4..8).map(|i| row.read_long(i).unwrap()).sum();
            check!(row_buckets == row.read_long(0).unwrap());
            bucket_total += row_buckets;
        }
        check!(count == all.len() as i64);
        check!(bucket_total == count);
        check!(sum == all.iter().sum::<i64>());
        check!(min == *all.iter().min().unwrap());
        check!(max == *all.iter().max().unwrap());
        check!(aggregator.table().len() == 16);
        check!(aggregator.dropped_observations() == 0);
    }
}
