//! The concurrent slot table backing every [`Aggregator`](crate::Aggregator).
//!
//! A table is an arena of shards. Each shard is a fixed array of slots allocated once, and
//! growth appends the next shard of a plan computed at construction (each new shard doubles
//! the total capacity, up to the configured maximum). Slots are never freed or moved, so a
//! [`SlotAddress`] stays valid for the table's lifetime.
//!
//! Every tag set has one fixed probe sequence over the whole plan: first a short window in
//! each shard starting at the tag set's fingerprint, then the rest of each shard. Lookup
//! walks that sequence and stops at the first slot nobody owns. Creation claims that slot
//! with a compare-and-swap. Because claimed slots stay claimed, two threads creating the same
//! tag set race for the same first free slot and the loser finds the winner's entry right
//! there, so a tag set can never own two slots.

use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering},
    },
};

use arc_swap::ArcSwapOption;
use tally_core::TagSet;

use crate::Slot;

/// Slots probed in each shard before moving on to the next shard.
const PROBE_WINDOW: usize = 32;

/// Capacity limits for an [`AggregationTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Slots in the first shard.
    pub initial_capacity: usize,
    /// Total slots the table may grow to. New tag sets are rejected beyond this.
    pub max_capacity: usize,
}

impl TableConfig {
    /// Slots in the first shard unless configured otherwise.
    pub const DEFAULT_INITIAL_CAPACITY: usize = 128;
    /// Total slot limit unless configured otherwise.
    pub const DEFAULT_MAX_CAPACITY: usize = 64 * 1024;

    /// A config with the given initial capacity and the default maximum.
    pub fn with_initial_capacity(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            max_capacity: Self::DEFAULT_MAX_CAPACITY.max(initial_capacity),
        }
    }

    /// Check that the capacities describe a usable table.
    pub fn validate(&self) -> Result<(), TableConfigError> {
        if self.initial_capacity == 0 {
            return Err(TableConfigError::ZeroInitialCapacity);
        }
        if self.initial_capacity > self.max_capacity {
            return Err(TableConfigError::InitialExceedsMaximum {
                initial: self.initial_capacity,
                max: self.max_capacity,
            });
        }
        if u32::try_from(self.max_capacity).is_err() {
            return Err(TableConfigError::MaximumTooLarge(self.max_capacity));
        }
        Ok(())
    }

    // capacities of successive shards: the first is the initial capacity, each later one
    // doubles the running total without passing the maximum
    fn shard_plan(&self) -> Box<[usize]> {
        let mut plan = vec![self.initial_capacity];
        let mut total = self.initial_capacity;
        while total < self.max_capacity {
            let next = total.min(self.max_capacity - total);
            plan.push(next);
            total += next;
        }
        plan.into_boxed_slice()
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            max_capacity: Self::DEFAULT_MAX_CAPACITY,
        }
    }
}

/// Returned when a [`TableConfig`] can't be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConfigError {
    /// The first shard would have no slots.
    ZeroInitialCapacity,
    /// The first shard would already be bigger than the maximum.
    InitialExceedsMaximum {
        /// Configured initial capacity
        initial: usize,
        /// Configured maximum capacity
        max: usize,
    },
    /// Slot indices are 32-bit.
    MaximumTooLarge(usize),
}

impl fmt::Display for TableConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroInitialCapacity => f.write_str("initial capacity must be at least 1"),
            Self::InitialExceedsMaximum { initial, max } => write!(
                f,
                "initial capacity {initial} exceeds maximum capacity {max}"
            ),
            Self::MaximumTooLarge(max) => {
                write!(f, "maximum capacity {max} does not fit in a 32-bit slot index")
            }
        }
    }
}

impl std::error::Error for TableConfigError {}

/// Where a tag set's slot lives. Stable for the lifetime of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotAddress {
    /// Index of the shard in the table's arena
    pub shard: u32,
    /// Index of the slot within its shard
    pub slot: u32,
}

struct Shard {
    owners: Box<[ArcSwapOption<TagSet>]>,
    fields: Box<[AtomicI64]>,
    last_updated: Box<[AtomicU64]>,
}

impl Shard {
    fn new(capacity: usize, identity: &[i64]) -> Self {
        Self {
            owners: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
            fields: (0..capacity)
                .flat_map(|_| identity.iter().map(|value| AtomicI64::new(*value)))
                .collect(),
            last_updated: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

enum Probe {
    Found(usize),
    Vacant,
    Exhausted,
}

/// A growable, sharded table of fixed-width atomic integer slots keyed by [`TagSet`].
///
/// All operations take `&self` and never block on each other, except that threads which
/// need the same new shard at the same time wait for one of them to allocate it.
pub struct AggregationTable {
    width: usize,
    identity: Box<[i64]>,
    plan: Box<[usize]>,
    shards: Box<[OnceLock<Shard>]>,
    allocated: AtomicUsize,
    occupied: AtomicUsize,
}

impl AggregationTable {
    /// Create a table whose slots have one field per entry of `identity`, each starting at
    /// (and reset to) that entry's value.
    pub fn new(config: TableConfig, identity: &[i64]) -> Result<Self, TableConfigError> {
        config.validate()?;
        let plan = config.shard_plan();
        let table = Self {
            width: identity.len(),
            identity: identity.into(),
            shards: plan.iter().map(|_| OnceLock::new()).collect(),
            plan,
            allocated: AtomicUsize::new(0),
            occupied: AtomicUsize::new(0),
        };
        table.shard_or_grow(0);
        Ok(table)
    }

    /// Fields per slot.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Per-field reset values.
    pub fn identity(&self) -> &[i64] {
        &self.identity
    }

    /// Number of tag sets that own a slot.
    pub fn len(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    /// Whether no tag set has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots in the shards allocated so far.
    pub fn capacity(&self) -> usize {
        self.plan[..self.shard_count()].iter().sum()
    }

    /// The most slots this table can ever hold.
    pub fn max_capacity(&self) -> usize {
        self.plan.iter().sum()
    }

    /// Number of shards allocated so far.
    pub fn shard_count(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Find the slot owned by `tags`, claiming a free one if `create` is set.
    ///
    /// Returns `None` when `tags` has no slot and `create` is unset, or when every slot it
    /// could use up to the maximum capacity is taken.
    pub fn locate(&self, tags: &TagSet, create: bool) -> Option<SlotAddress> {
        let hash = tags.fingerprint();
        for (from, to) in [(0, PROBE_WINDOW), (PROBE_WINDOW, usize::MAX)] {
            for (index, &capacity) in self.plan.iter().enumerate() {
                let shard = match self.shards[index].get() {
                    Some(shard) => shard,
                    // an unallocated shard is all free slots
                    None if !create => return None,
                    None => self.shard_or_grow(index),
                };
                let start = (hash % capacity as u64) as usize;
                let range = from.min(capacity)..to.min(capacity);
                match self.probe(shard, start, range, tags, create) {
                    Probe::Found(slot) => {
                        return Some(SlotAddress {
                            shard: index as u32,
                            slot: slot as u32,
                        });
                    }
                    Probe::Vacant => return None,
                    Probe::Exhausted => continue,
                }
            }
        }
        None
    }

    fn probe(
        &self,
        shard: &Shard,
        start: usize,
        range: std::ops::Range<usize>,
        tags: &TagSet,
        create: bool,
    ) -> Probe {
        let capacity = shard.owners.len();
        for offset in range {
            let slot = (start + offset) % capacity;
            let owner = &shard.owners[slot];
            if let Some(existing) = &*owner.load() {
                if **existing == *tags {
                    return Probe::Found(slot);
                }
                continue;
            }
            if !create {
                return Probe::Vacant;
            }
            let claim = Some(Arc::new(tags.clone()));
            let previous = owner.compare_and_swap(&None::<Arc<TagSet>>, claim);
            match &*previous {
                None => {
                    self.occupied.fetch_add(1, Ordering::Relaxed);
                    return Probe::Found(slot);
                }
                // lost the race, but possibly to a thread creating the same tag set
                Some(winner) if **winner == *tags => return Probe::Found(slot),
                Some(_) => continue,
            }
        }
        Probe::Exhausted
    }

    fn shard_or_grow(&self, index: usize) -> &Shard {
        self.shards[index].get_or_init(|| {
            tracing::debug!(
                shard = index,
                capacity = self.plan[index],
                "allocating aggregation table shard"
            );
            let shard = Shard::new(self.plan[index], &self.identity);
            self.allocated.fetch_max(index + 1, Ordering::AcqRel);
            shard
        })
    }

    /// The slot at `address`, if that shard has been allocated.
    pub fn slot(&self, address: SlotAddress) -> Option<Slot<'_>> {
        let shard = self.shards.get(address.shard as usize)?.get()?;
        let slot = address.slot as usize;
        if slot >= shard.owners.len() {
            return None;
        }
        let fields = &shard.fields[slot * self.width..(slot + 1) * self.width];
        Some(Slot::new(fields, &self.identity, &shard.last_updated[slot]))
    }

    /// Find or create the slot for `tags` and hand it to `combine`, then advance the slot's
    /// last-updated time to `timestamp`.
    ///
    /// Returns `false`, without calling `combine`, if the table has no room for `tags`.
    pub fn apply(&self, tags: &TagSet, timestamp: u64, combine: impl FnOnce(&Slot<'_>)) -> bool {
        match self.locate(tags, true).and_then(|address| self.slot(address)) {
            Some(slot) => {
                combine(&slot);
                slot.touch(timestamp);
                true
            }
            None => false,
        }
    }

    /// The tag sets owning a slot, in table order: shard by shard, slot by slot.
    pub fn tag_sets(&self) -> Vec<TagSet> {
        let mut tag_sets = Vec::with_capacity(self.len());
        for shard in self.shards.iter().map_while(OnceLock::get) {
            tag_sets.extend(
                shard
                    .owners
                    .iter()
                    .filter_map(|owner| owner.load_full().map(|tags| TagSet::clone(&tags))),
            );
        }
        tag_sets
    }
}

impl fmt::Debug for AggregationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationTable")
            .field("width", &self.width)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity())
            .finish()
    }
}
