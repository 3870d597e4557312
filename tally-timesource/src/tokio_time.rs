// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use tokio::time::Instant;

use crate::{Time, TimeSource};

/// A clock reading `start + elapsed tokio time`, so it stands still while tokio's clock is
/// paused and jumps with `tokio::time::advance`.
///
/// Must be created inside a tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct TokioTime {
    origin: Instant,
    start: SystemTime,
}

impl TokioTime {
    /// A clock that reads `start` now.
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            origin: Instant::now(),
            start,
        }
    }
}

impl Time for TokioTime {
    fn now(&self) -> SystemTime {
        self.start + self.origin.elapsed()
    }
}

impl TimeSource {
    /// A [`TokioTime`] clock that reads `start` now.
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread", start_paused = true)]
    /// # async fn main() {
    /// use std::time::{Duration, UNIX_EPOCH};
    /// use tally_timesource::TimeSource;
    ///
    /// let ts = TimeSource::tokio(UNIX_EPOCH + Duration::from_secs(10));
    /// tokio::time::advance(Duration::from_millis(1_500)).await;
    /// assert_eq!(ts.epoch_millis(), 11_500);
    /// # }
    /// ```
    pub fn tokio(start: SystemTime) -> Self {
        Self::custom(TokioTime::starting_at(start))
    }
}
