//! Single-pass snapshot iteration over an [`Aggregator`]'s rows.

use std::{fmt, time::Duration};

use tally_core::TagSet;

use crate::{Aggregator, FieldType, Slot};

/// Iterates over the tag sets an [`Aggregator`] held when the cursor was created.
///
/// Tag sets created afterwards are not visited. Values are read live from the table, so a
/// row can change between two reads of it, and [`Row::read_and_reset_long`] may race with a
/// concurrent [`Aggregator::apply`] and lose that one observation.
pub struct Cursor<'a> {
    aggregator: &'a Aggregator,
    tag_sets: Vec<TagSet>,
    position: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(aggregator: &'a Aggregator, tag_sets: Vec<TagSet>) -> Self {
        Self {
            aggregator,
            tag_sets,
            position: 0,
        }
    }

    /// The aggregator's metric name.
    pub fn metric_name(&self) -> &'a str {
        self.aggregator.name()
    }

    /// Field names, in slot order.
    pub fn fields(&self) -> &'a [String] {
        self.aggregator.fields()
    }

    /// Field types, in slot order.
    pub fn types(&self) -> &'a [FieldType] {
        self.aggregator.types()
    }

    /// Number of tag sets in the snapshot.
    pub fn len(&self) -> usize {
        self.tag_sets.len()
    }

    /// Whether the snapshot has no tag sets.
    pub fn is_empty(&self) -> bool {
        self.tag_sets.is_empty()
    }

    /// Advance to the next row, or return `None` once the snapshot is exhausted.
    ///
    /// A tag set whose slot can't be found is logged and skipped.
    #[allow(clippy::should_implement_trait)] // rows borrow the cursor
    pub fn next(&mut self) -> Option<Row<'_>> {
        let aggregator = self.aggregator;
        while let Some(tags) = self.tag_sets.get(self.position) {
            self.position += 1;
            let table = aggregator.table();
            match table.locate(tags, false).and_then(|address| table.slot(address)) {
                Some(slot) => {
                    return Some(Row {
                        tags,
                        slot,
                        fields: aggregator.fields(),
                        types: aggregator.types(),
                    });
                }
                None => crate::rate_limited!(
                    Duration::from_secs(60),
                    |suppressed| tracing::error!(
                        metric = aggregator.name(),
                        %tags,
                        suppressed,
                        "tag set in cursor snapshot has no slot, skipping row"
                    )
                ),
            }
        }
        None
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("metric", &self.aggregator.name())
            .field("rows", &self.tag_sets.len())
            .field("position", &self.position)
            .finish()
    }
}

/// The row a [`Cursor`] is positioned on.
///
/// Field accessors panic if `i` is not below [`Row::width`].
#[derive(Debug)]
pub struct Row<'c> {
    tags: &'c TagSet,
    slot: Slot<'c>,
    fields: &'c [String],
    types: &'c [FieldType],
}

impl Row<'_> {
    /// The row's tag set.
    pub fn tags(&self) -> &TagSet {
        self.tags
    }

    /// Number of fields.
    pub fn width(&self) -> usize {
        self.types.len()
    }

    /// Milliseconds since the epoch of the newest observation applied to this row.
    pub fn last_updated(&self) -> u64 {
        self.slot.last_updated()
    }

    fn check(&self, i: usize, requested: FieldType) -> Result<(), UnsupportedOperation> {
        let declared = self.types[i];
        if declared == requested {
            Ok(())
        } else {
            Err(UnsupportedOperation {
                field: self.fields[i].clone(),
                declared,
                requested,
            })
        }
    }

    /// Read long field `i`.
    pub fn read_long(&self, i: usize) -> Result<i64, UnsupportedOperation> {
        self.check(i, FieldType::Long)?;
        Ok(self.slot.get(i))
    }

    /// Read double field `i`.
    pub fn read_double(&self, i: usize) -> Result<f64, UnsupportedOperation> {
        self.check(i, FieldType::Double)?;
        Ok(f64::from_bits(self.slot.get(i) as u64))
    }

    /// Read long field `i` and reset it to its identity value in one atomic step.
    pub fn read_and_reset_long(&self, i: usize) -> Result<i64, UnsupportedOperation> {
        self.check(i, FieldType::Long)?;
        Ok(self.slot.read_and_reset(i))
    }

    /// Read double field `i` and reset it to its identity value in one atomic step.
    pub fn read_and_reset_double(&self, i: usize) -> Result<f64, UnsupportedOperation> {
        self.check(i, FieldType::Double)?;
        Ok(f64::from_bits(self.slot.read_and_reset(i) as u64))
    }
}

/// Returned when a field is read as a type other than the one it was declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedOperation {
    /// Name of the field
    pub field: String,
    /// Type the field holds
    pub declared: FieldType,
    /// Type the caller asked for
    pub requested: FieldType,
}

impl fmt::Display for UnsupportedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field `{}` holds a {} and can't be read as a {}",
            self.field, self.declared, self.requested
        )
    }
}

impl std::error::Error for UnsupportedOperation {}
