// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::{
    cell::RefCell,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Fake clocks for tests. Requires the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod fakes;

#[cfg(feature = "tokio")]
mod tokio_time;
#[cfg(feature = "tokio")]
pub use tokio_time::TokioTime;

/// A wall clock that can stand in for [`SystemTime::now`].
pub trait Time: Send + Sync + fmt::Debug {
    /// The current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// The clock observations and sweeps read their timestamps from.
///
/// Cheap to clone. Custom clocks are shared behind an [`Arc`].
#[derive(Clone, Default)]
pub enum TimeSource {
    /// [`SystemTime::now`]
    #[default]
    System,
    /// A custom [`Time`] implementation
    Custom(Arc<dyn Time>),
}

impl TimeSource {
    /// Wrap a custom clock.
    ///
    /// ```
    /// use std::time::{Duration, UNIX_EPOCH};
    /// use tally_timesource::{TimeSource, fakes::StaticTimeSource};
    ///
    /// let ts = TimeSource::custom(StaticTimeSource::at_time(UNIX_EPOCH + Duration::from_secs(3)));
    /// assert_eq!(ts.epoch_millis(), 3_000);
    /// ```
    pub fn custom(clock: impl Time + 'static) -> Self {
        Self::Custom(Arc::new(clock))
    }

    /// The current wall-clock time.
    pub fn system_time(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            Self::Custom(clock) => clock.now(),
        }
    }

    /// Milliseconds since the Unix epoch, the unit slots are stamped in.
    ///
    /// ```
    /// use tally_timesource::TimeSource;
    ///
    /// assert!(TimeSource::System.epoch_millis() > 1_500_000_000_000);
    /// ```
    pub fn epoch_millis(&self) -> u64 {
        to_epoch_millis(self.system_time())
    }
}

impl fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("TimeSource::System"),
            Self::Custom(clock) => f.debug_tuple("TimeSource::Custom").field(clock).finish(),
        }
    }
}

/// Milliseconds since the Unix epoch. Times before the epoch read as 0 and times past
/// `u64::MAX` milliseconds read as `u64::MAX`.
pub fn to_epoch_millis(time: SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
}

thread_local! {
    static OVERRIDE: RefCell<Option<TimeSource>> = const { RefCell::new(None) };
}

/// Restores the previous thread-local clock when dropped. Returned by [`set_time_source`].
#[must_use = "the override is removed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct TimeSourceGuard {
    previous: Option<TimeSource>,
}

impl Drop for TimeSourceGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        OVERRIDE.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// Make [`time_source`] return `time_source` on this thread until the guard is dropped.
///
/// Overrides nest: dropping the guard brings back whichever clock was in effect before.
///
/// ```
/// use std::time::UNIX_EPOCH;
/// use tally_timesource::{TimeSource, fakes::StaticTimeSource, set_time_source, time_source};
///
/// let guard = set_time_source(TimeSource::custom(StaticTimeSource::at_time(UNIX_EPOCH)));
/// assert_eq!(time_source().epoch_millis(), 0);
/// drop(guard);
/// assert!(time_source().epoch_millis() > 0);
/// ```
pub fn set_time_source(time_source: TimeSource) -> TimeSourceGuard {
    let previous = OVERRIDE.with(|cell| cell.borrow_mut().replace(time_source));
    TimeSourceGuard { previous }
}

/// Run `f` with `time_source` installed as this thread's clock.
pub fn with_time_source<R>(time_source: TimeSource, f: impl FnOnce() -> R) -> R {
    let _guard = set_time_source(time_source);
    f()
}

/// This thread's clock: the innermost [`set_time_source`] override, or the system clock.
#[inline]
pub fn time_source() -> TimeSource {
    OVERRIDE
        .with(|cell| cell.borrow().clone())
        .unwrap_or(TimeSource::System)
}
