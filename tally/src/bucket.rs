//! Fixed-boundary bucketing for histogram aggregators.

use std::{fmt, sync::Arc};

/// Maps a value to one of `boundaries.len() + 1` buckets.
///
/// Bucket `i < boundaries.len()` holds values `v` with `boundaries[i - 1] < v <= boundaries[i]`,
/// and the last bucket holds everything above the largest boundary. Values below the first
/// boundary (including negative values) land in bucket 0.
///
/// ```
/// use tally::DistributionBucket;
///
/// let buckets = DistributionBucket::new([10, 50, 200]).unwrap();
/// assert_eq!(buckets.count(), 4);
/// assert_eq!(buckets.bucket_names(), ["<=10", "<=50", "<=200", "other"]);
/// assert_eq!(buckets.bucket_index(10), 0);
/// assert_eq!(buckets.bucket_index(11), 1);
/// assert_eq!(buckets.bucket_index(500), 3);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct DistributionBucket {
    boundaries: Arc<[i64]>,
    names: Arc<[String]>,
}

impl DistributionBucket {
    /// Build buckets from boundary values, which must be strictly ascending and non-empty.
    pub fn new(boundaries: impl IntoIterator<Item = i64>) -> Result<Self, InvalidBoundaries> {
        let boundaries: Arc<[i64]> = boundaries.into_iter().collect();
        if boundaries.is_empty() {
            return Err(InvalidBoundaries::Empty);
        }
        if let Some(pair) = boundaries.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(InvalidBoundaries::NotAscending {
                previous: pair[0],
                next: pair[1],
            });
        }
        let names = boundaries
            .iter()
            .map(|boundary| format!("<={boundary}"))
            .chain(std::iter::once("other".to_owned()))
            .collect();
        Ok(Self { boundaries, names })
    }

    /// Number of buckets, one more than the number of boundaries.
    pub fn count(&self) -> usize {
        self.boundaries.len() + 1
    }

    /// The boundaries this was built from.
    pub fn boundaries(&self) -> &[i64] {
        &self.boundaries
    }

    /// Index of the bucket `value` falls in, always in `0..self.count()`.
    pub fn bucket_index(&self, value: i64) -> usize {
        self.boundaries.partition_point(|boundary| *boundary < value)
    }

    /// One label per bucket: `"<=B"` for each boundary `B`, then `"other"`.
    pub fn bucket_names(&self) -> &[String] {
        &self.names
    }
}

impl fmt::Debug for DistributionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DistributionBucket")
            .field(&self.boundaries)
            .finish()
    }
}

/// Returned by [`DistributionBucket::new`] for unusable boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidBoundaries {
    /// No boundaries were given.
    Empty,
    /// `next` does not come strictly after `previous`.
    NotAscending {
        /// The earlier boundary
        previous: i64,
        /// The boundary that should have been larger
        next: i64,
    },
}

impl fmt::Display for InvalidBoundaries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("bucket boundaries must not be empty"),
            Self::NotAscending { previous, next } => write!(
                f,
                "bucket boundaries must be strictly ascending, but {next} follows {previous}"
            ),
        }
    }
}

impl std::error::Error for InvalidBoundaries {}
