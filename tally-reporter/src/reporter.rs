// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    pin::pin,
    sync::{Arc, Mutex, PoisonError},
};

use futures::future::{Either, select};
use tally::{Aggregator, AggregatorKind, AggregatorRegistry, TableConfig, TableConfigError};
use tally_core::{MetricSink, TagSet};
use tally_timesource::TimeSource;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{ConfigError, ReporterConfig, Sweeper};

/// A handle to a running reporter task that sweeps aggregators into a [`MetricSink`] once
/// per window.
///
/// Shutdown only happens when [`shutdown`](TimeWindowReporter::shutdown) is called; dropping
/// the handle leaves the task running until the runtime stops.
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// use std::sync::Arc;
/// use tally::AggregatorRegistry;
/// use tally_core::{TagSet, test_util::RecordingSink};
/// use tally_reporter::{ReporterConfig, TimeWindowReporter};
///
/// let sink = RecordingSink::default();
/// let config = ReporterConfig::new("http://localhost:8086", "metrics");
/// let reporter =
///     TimeWindowReporter::start(config, Arc::new(AggregatorRegistry::new()), sink.clone())
///         .unwrap();
///
/// reporter.emit("requests", &TagSet::new(["route=/"]), 1, 1_000);
/// reporter.shutdown().await;
/// assert_eq!(sink.flushed_rows().len(), 1);
/// # }
/// ```
pub struct TimeWindowReporter {
    tasks: TaskTracker,
    cancellation_token: CancellationToken,
    sweeper: Sweeper,
    registry: Arc<AggregatorRegistry>,
    default_kind: AggregatorKind,
    table_config: TableConfig,
}

impl TimeWindowReporter {
    /// Validate `config` and spawn the reporter task on the current tokio runtime.
    ///
    /// Every `config.window`, each aggregator in `registry` is swept into `sink`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn start<S>(
        config: ReporterConfig,
        registry: Arc<AggregatorRegistry>,
        sink: S,
    ) -> Result<Self, ConfigError>
    where
        S: MetricSink + Send + 'static,
    {
        config.validate()?;
        let tasks = TaskTracker::new();
        let cancellation_token = CancellationToken::new();
        let sweeper = Sweeper::new();
        tasks.spawn(run(
            config.clone(),
            Arc::clone(&registry),
            sink,
            sweeper.clone(),
            tally_timesource::time_source(),
            cancellation_token.clone(),
        ));
        tasks.close();
        tracing::info!(window = ?config.window, "started time window reporter");

        Ok(Self {
            tasks,
            cancellation_token,
            sweeper,
            registry,
            default_kind: AggregatorKind::Basic,
            table_config: TableConfig::default(),
        })
    }

    /// Aggregator kind used by [`emit`](Self::emit) for metrics not yet registered.
    ///
    /// Defaults to [`AggregatorKind::Basic`].
    pub fn with_default_kind(mut self, kind: AggregatorKind) -> Self {
        self.default_kind = kind;
        self
    }

    /// Table capacities used by [`emit`](Self::emit) for metrics not yet registered.
    pub fn with_table_config(mut self, config: TableConfig) -> Result<Self, TableConfigError> {
        config.validate()?;
        self.table_config = config;
        Ok(self)
    }

    /// Record `value` for `metric` at `timestamp` (milliseconds since the epoch), creating
    /// the metric's aggregator with the default kind if it has none.
    pub fn emit(&self, metric: &str, tags: &TagSet, value: i64, timestamp: u64) {
        self.aggregator_for(metric).apply(tags, value, timestamp);
    }

    /// The aggregator for `metric`, created with the default kind if it has none.
    pub fn aggregator_for(&self, metric: &str) -> Arc<Aggregator> {
        self.registry.aggregator_for(metric, |name| {
            let kind = self.default_kind.clone();
            Aggregator::with_config(name, kind.clone(), self.table_config)
                .unwrap_or_else(|_| Aggregator::new(name, kind))
        })
    }

    /// The registry this reporter sweeps.
    pub fn registry(&self) -> &Arc<AggregatorRegistry> {
        &self.registry
    }

    /// Milliseconds since the epoch of the newest row exported by the last successful sweep,
    /// or 0 before the first one.
    pub fn watermark(&self) -> u64 {
        self.sweeper.watermark()
    }

    /// Stop scheduling sweeps and wait for the task to finish, including the final sweep if
    /// [`ReporterConfig::final_sweep_on_shutdown`] is set.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.tasks.wait().await
    }
}

impl fmt::Debug for TimeWindowReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindowReporter")
            .field("watermark", &self.watermark())
            .field("aggregators", &self.registry.len())
            .finish()
    }
}

async fn run<S>(
    config: ReporterConfig,
    registry: Arc<AggregatorRegistry>,
    sink: S,
    sweeper: Sweeper,
    time_source: TimeSource,
    shutdown_signal: CancellationToken,
) where
    S: MetricSink + Send + 'static,
{
    let sink = Arc::new(Mutex::new(sink));
    let next_window = || tokio::time::sleep(config.window);
    let shutdown_initiated = || shutdown_signal.cancelled();
    // A sweep already running is never interrupted; cancellation is only observed between
    // windows.
    while let Either::Left(_window_elapsed) =
        select(pin!(next_window()), pin!(shutdown_initiated())).await
    {
        sweep_in_background(&sweeper, &registry, &sink, &time_source).await;
    }
    if config.final_sweep_on_shutdown {
        tracing::debug!("running final sweep before shutdown");
        sweep_in_background(&sweeper, &registry, &sink, &time_source).await;
    }
    tracing::info!(watermark = sweeper.watermark(), "time window reporter stopped");
}

// Sinks write with blocking I/O, so the sweep runs on the blocking pool. The sink lives
// behind a mutex so it survives a sweep that panics.
async fn sweep_in_background<S>(
    sweeper: &Sweeper,
    registry: &Arc<AggregatorRegistry>,
    sink: &Arc<Mutex<S>>,
    time_source: &TimeSource,
) where
    S: MetricSink + Send + 'static,
{
    let sweeper = sweeper.clone();
    let registry = Arc::clone(registry);
    let sink = Arc::clone(sink);
    let time_source = time_source.clone();
    let dispatch = tracing::dispatcher::get_default(|dispatch| dispatch.clone());
    let sweep = tokio::task::spawn_blocking(move || {
        tracing::dispatcher::with_default(&dispatch, || {
            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
            sweep_and_log(&sweeper, &registry, &mut *sink, &time_source);
        })
    });
    if let Err(err) = sweep.await {
        tracing::error!(error = %err, "sweep task failed, will retry next window");
    }
}

fn sweep_and_log(
    sweeper: &Sweeper,
    registry: &AggregatorRegistry,
    sink: &mut impl MetricSink,
    time_source: &TimeSource,
) {
    let started = time_source.epoch_millis();
    match sweeper.sweep(registry, sink) {
        Ok(report) => tracing::debug!(
            rows = report.rows,
            watermark = report.watermark,
            elapsed_ms = time_source.epoch_millis().saturating_sub(started),
            "sweep complete"
        ),
        // at most once per window
        Err(err) => tracing::error!(
            error = %err,
            watermark = sweeper.watermark(),
            "failed to export metrics, will retry next window"
        ),
    }
}
