// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Contains [`TagSet`], the identity of one aggregated metric instance.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

// Fixed seeds keep fingerprints (and therefore table probe sequences) stable across runs.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// An ordered, immutable sequence of `key=value` strings identifying one metric instance.
///
/// Cloning is cheap: the tags live behind an [`Arc`] and the fingerprint used for table
/// addressing is computed once on construction.
///
/// Two tag sets are equal when they contain the same strings in the same order, so
/// `["a=1", "b=2"]` and `["b=2", "a=1"]` are distinct. Use [`TagSet::canonical_cmp`] (or the
/// [`Ord`] impl, which is based on it) when a deterministic order across tag sets is needed.
#[derive(Clone)]
pub struct TagSet(Arc<Inner>);

struct Inner {
    tags: Box<[String]>,
    fingerprint: u64,
}

impl TagSet {
    /// Create a tag set from already formatted `key=value` strings.
    pub fn new<I>(tags: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let tags: Box<[String]> = tags.into_iter().map(Into::into).collect();
        let fingerprint = ahash::RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3])
            .hash_one(&*tags);
        Self(Arc::new(Inner { tags, fingerprint }))
    }

    /// Create a tag set from key/value pairs, joining each pair as `key=value`.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref())),
        )
    }

    /// The tag set with no tags.
    pub fn empty() -> Self {
        Self::new(std::iter::empty::<String>())
    }

    /// The tags, in the order they were given.
    pub fn as_slice(&self) -> &[String] {
        &self.0.tags
    }

    /// Iterate over `(key, value)` pairs. A tag without `=` has an empty value.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.tags.iter().map(|tag| split_tag(tag))
    }

    /// Stable 64-bit hash of the tags, used to derive table probe sequences.
    pub fn fingerprint(&self) -> u64 {
        self.0.fingerprint
    }

    /// Canonical ordering: tag by tag, compare keys and then values; a tag set that is a
    /// prefix of another sorts first.
    ///
    /// ```
    /// use std::cmp::Ordering;
    /// use tally_core::TagSet;
    ///
    /// let a = TagSet::new(["dc=east", "host=b"]);
    /// let b = TagSet::new(["dc=east", "host=ba"]);
    /// let c = TagSet::new(["dc-x=a"]);
    /// assert_eq!(a.canonical_cmp(&b), Ordering::Less);
    /// // keys compare before values, so "dc" < "dc-x" even though '=' > '-'
    /// assert_eq!(a.canonical_cmp(&c), Ordering::Less);
    /// ```
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ordering::Equal;
        }
        self.pairs()
            .cmp(other.pairs())
            .then_with(|| self.as_slice().cmp(other.as_slice()))
    }
}

fn split_tag(tag: &str) -> (&str, &str) {
    tag.split_once('=').unwrap_or((tag, ""))
}

impl Deref for TagSet {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.fingerprint == other.0.fingerprint && self.0.tags == other.0.tags)
    }
}

impl Eq for TagSet {}

impl Hash for TagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.fingerprint);
    }
}

impl PartialOrd for TagSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_cmp(other)
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.tags.iter()).finish()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.tags.join(","))
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}
