use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// Per-call-site state behind [`rate_limited!`](crate::rate_limited).
///
/// Remembers when the next call may go through and how many were suppressed since the last
/// one that did.
#[doc(hidden)]
#[derive(Debug)]
pub struct RateLimit {
    next_millis: AtomicU64,
    suppressed: AtomicU64,
}

impl RateLimit {
    /// A limit that lets the first call through.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            next_millis: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// `Some(suppressed)` if a call may go through now, where `suppressed` counts the calls
    /// turned away since the previous one. Only one of several racing callers gets through.
    pub fn try_acquire(&self, interval: Duration) -> Option<u64> {
        let now = millis_since_start();
        let next = self.next_millis.load(Ordering::Relaxed);
        let interval = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        if now >= next
            && self
                .next_millis
                .compare_exchange(
                    next,
                    now.saturating_add(interval),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

fn millis_since_start() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let elapsed = START.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// `rate_limited!(interval, expr)` evaluates `expr` at most once per `interval` for each call
/// site, across all threads.
///
/// `rate_limited!(interval, |suppressed| expr)` also binds how many evaluations were skipped
/// since the last one, so the log line can say so.
///
/// Used for logs on paths that can fire once per observation, such as a full table dropping
/// new tag sets. The first occurrence always goes through.
#[doc(hidden)]
#[macro_export]
macro_rules! rate_limited {
    ($interval:expr, |$suppressed:ident| $call:expr) => {{
        static LIMIT: $crate::rate_limit::RateLimit = $crate::rate_limit::RateLimit::new();
        if let Some($suppressed) = LIMIT.try_acquire($interval) {
            $call;
        }
    }};
    ($interval:expr, $call:expr) => {
        $crate::rate_limited!($interval, |_suppressed| $call)
    };
}
