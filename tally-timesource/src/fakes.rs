// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use crate::Time;

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct StaticTimeSource(SystemTime);

impl StaticTimeSource {
    /// A clock that always reads `time`.
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self(time.into())
    }
}

impl Time for StaticTimeSource {
    fn now(&self) -> SystemTime {
        self.0
    }
}

/// A clock that only moves when told to. Clones share the same reading.
///
/// ```
/// use std::time::{Duration, UNIX_EPOCH};
/// use tally_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
///
/// let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
/// let ts = TimeSource::custom(clock.clone());
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(ts.epoch_millis(), 250);
/// ```
#[derive(Debug, Clone)]
pub struct ManuallyAdvancedTimeSource(Arc<Mutex<SystemTime>>);

impl ManuallyAdvancedTimeSource {
    /// A clock reading `time` until moved.
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self(Arc::new(Mutex::new(time.into())))
    }

    /// Jump to `time`, which may be earlier than the current reading.
    pub fn update_time(&self, time: impl Into<SystemTime>) {
        *self.0.lock().unwrap() = time.into();
    }

    /// Move the reading forward by `elapsed`.
    pub fn advance(&self, elapsed: Duration) {
        *self.0.lock().unwrap() += elapsed;
    }
}

impl Time for ManuallyAdvancedTimeSource {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap()
    }
}
