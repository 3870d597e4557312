use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A view of one tag set's fields inside an [`AggregationTable`](crate::AggregationTable).
///
/// Every operation touches a single field atomically. Operations on different fields of the
/// same slot are not ordered with respect to each other, so a reader racing a writer can see
/// a `count` that already includes an observation whose `sum` contribution is not visible yet.
#[derive(Clone, Copy)]
pub struct Slot<'a> {
    fields: &'a [AtomicI64],
    identity: &'a [i64],
    last_updated: &'a AtomicU64,
}

impl<'a> Slot<'a> {
    pub(crate) fn new(
        fields: &'a [AtomicI64],
        identity: &'a [i64],
        last_updated: &'a AtomicU64,
    ) -> Self {
        debug_assert_eq!(fields.len(), identity.len());
        Self {
            fields,
            identity,
            last_updated,
        }
    }

    /// Number of fields in the slot.
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    /// Atomically add `value` to field `i`, wrapping on overflow.
    pub fn add(&self, i: usize, value: i64) {
        self.fields[i].fetch_add(value, Ordering::Relaxed);
    }

    /// Atomically lower field `i` to `value` if `value` is smaller.
    pub fn min(&self, i: usize, value: i64) {
        self.fields[i].fetch_min(value, Ordering::Relaxed);
    }

    /// Atomically raise field `i` to `value` if `value` is larger.
    pub fn max(&self, i: usize, value: i64) {
        self.fields[i].fetch_max(value, Ordering::Relaxed);
    }

    /// Read field `i` without resetting it.
    pub fn get(&self, i: usize) -> i64 {
        self.fields[i].load(Ordering::Relaxed)
    }

    /// Swap field `i` back to its identity value, returning what it held.
    pub fn read_and_reset(&self, i: usize) -> i64 {
        self.fields[i].swap(self.identity[i], Ordering::AcqRel)
    }

    /// Move the slot's last-updated timestamp forward to `timestamp`. Never moves it back.
    pub fn touch(&self, timestamp: u64) {
        self.last_updated.fetch_max(timestamp, Ordering::Release);
    }

    /// Milliseconds since the epoch of the newest observation applied to this slot, or 0.
    pub fn last_updated(&self) -> u64 {
        self.last_updated.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Slot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("fields", &self.fields)
            .field("last_updated", &self.last_updated)
            .finish()
    }
}
