use std::{
    io,
    sync::{Arc, Mutex},
    thread::ThreadId,
    time::{Duration, UNIX_EPOCH},
};

use assert2::check;
use tally::{AggregatorKind, AggregatorRegistry, DistributionBucket, TableConfig};
use tally_core::{
    MetricSink, SinkError, TagSet,
    test_util::{NullSink, RecordingSink, SharedBuffer},
};
use tally_reporter::{ConfigError, ReporterConfig, TimeWindowReporter};
use tally_timesource::{TimeSource, set_time_source};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ReporterConfig {
    ReporterConfig {
        window: Duration::from_secs(1),
        ..ReporterConfig::new("http://localhost:8086", "metrics")
    }
}

#[tokio::test(start_paused = true)]
async fn exports_once_per_window_and_retries_after_failure() {
    init_logging();
    let sink = RecordingSink::default();
    let reporter =
        TimeWindowReporter::start(config(), Arc::new(AggregatorRegistry::new()), sink.clone())
            .unwrap();
    let tags = TagSet::new(["host=a"]);

    reporter.emit("requests", &tags, 1, 1_000);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let rows = sink.take_flushed();
    check!(rows.len() == 1);
    check!(rows[0].field("count") == Some("1"));
    check!(reporter.watermark() == 1_000);

    // a failing flush leaves the watermark where it was
    sink.fail_next_flush();
    reporter.emit("requests", &tags, 5, 2_000);
    tokio::time::sleep(Duration::from_secs(1)).await;
    check!(sink.take_flushed().is_empty());
    check!(reporter.watermark() == 1_000);

    // the next window exports the row again
    reporter.emit("requests", &tags, 7, 3_000);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let rows = sink.take_flushed();
    check!(rows.len() == 1);
    check!(rows[0].tags == ["host=a"]);
    check!(rows[0].field("max") == Some("7"));
    check!(reporter.watermark() == 3_000);

    // idle windows export nothing
    tokio::time::sleep(Duration::from_secs(5)).await;
    check!(sink.take_flushed().is_empty());

    reporter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_runs_final_sweep() {
    let sink = RecordingSink::default();
    let reporter =
        TimeWindowReporter::start(config(), Arc::new(AggregatorRegistry::new()), sink.clone())
            .unwrap();
    reporter.emit("requests", &TagSet::empty(), 3, 10);
    reporter.shutdown().await;
    check!(sink.flushed_rows().len() == 1);
    check!(reporter.watermark() == 10);

    // no further windows fire after shutdown
    reporter.emit("requests", &TagSet::empty(), 3, 20);
    tokio::time::sleep(Duration::from_secs(10)).await;
    check!(sink.flushed_rows().len() == 1);
}

#[tokio::test(start_paused = true)]
async fn final_sweep_can_be_disabled() {
    let sink = RecordingSink::default();
    let config = ReporterConfig {
        final_sweep_on_shutdown: false,
        ..config()
    };
    let reporter =
        TimeWindowReporter::start(config, Arc::new(AggregatorRegistry::new()), sink.clone())
            .unwrap();
    reporter.emit("requests", &TagSet::empty(), 3, 10);
    reporter.shutdown().await;
    check!(sink.flushed_rows().is_empty());
    check!(sink.flushes() == 0);
}

#[tokio::test(start_paused = true)]
async fn emit_creates_aggregators_with_default_kind() {
    let sink = RecordingSink::default();
    let registry = Arc::new(AggregatorRegistry::new());
    let buckets = DistributionBucket::new([10, 50, 200]).unwrap();
    let reporter = TimeWindowReporter::start(config(), Arc::clone(&registry), sink.clone())
        .unwrap()
        .with_default_kind(AggregatorKind::BasicHistogram(buckets))
        .with_table_config(TableConfig {
            initial_capacity: 1,
            max_capacity: 2,
        })
        .unwrap();

    let tags = TagSet::from_pairs([("route", "/")]);
    for value in [5, 10, 11, 60, 500] {
        reporter.emit("latency", &tags, value, 100);
    }
    for route in ["/a", "/b"] {
        reporter.emit("latency", &TagSet::from_pairs([("route", route)]), 1, 100);
    }
    let latency = registry.get("latency").unwrap();
    check!(latency.dropped_observations() == 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let rows = sink.take_flushed();
    check!(rows.len() == 2);
    let row = rows.iter().find(|row| row.tags == ["route=/"]).unwrap();
    check!(row.metric == "latency");
    check!(row.field("count") == Some("5"));
    check!(row.field("sum") == Some("586"));
    check!(row.field("<=10") == Some("2"));
    check!(row.field("other") == Some("1"));

    reporter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn record_stamps_rows_with_the_time_source() {
    let _guard = set_time_source(TimeSource::tokio(UNIX_EPOCH + Duration::from_secs(60)));
    let sink = RecordingSink::default();
    let reporter =
        TimeWindowReporter::start(config(), Arc::new(AggregatorRegistry::new()), sink.clone())
            .unwrap();

    let requests = reporter.aggregator_for("requests");
    requests.record(&TagSet::empty(), 1);
    tokio::time::sleep(Duration::from_millis(250)).await;
    requests.record(&TagSet::empty(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    check!(sink.take_flushed().len() == 1);
    check!(reporter.watermark() == 60_250);

    reporter.shutdown().await;
}

/// Records which thread each flush ran on.
#[derive(Clone, Default)]
struct FlushThreads(Arc<Mutex<Vec<ThreadId>>>);

impl MetricSink for FlushThreads {
    fn write(
        &mut self,
        _metric: &str,
        _tags: &[String],
        _fields: &[String],
        _timestamp: Option<u64>,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().push(std::thread::current().id());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn sweeps_run_off_the_runtime_thread() {
    let sink = FlushThreads::default();
    let reporter =
        TimeWindowReporter::start(config(), Arc::new(AggregatorRegistry::new()), sink.clone())
            .unwrap();
    reporter.emit("requests", &TagSet::empty(), 1, 1_000);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    reporter.shutdown().await;

    let threads = sink.0.lock().unwrap().clone();
    // two windows and the final sweep
    check!(threads.len() == 3);
    let runtime_thread = std::thread::current().id();
    check!(threads.iter().all(|thread| *thread != runtime_thread));
}

#[tokio::test(start_paused = true)]
async fn every_failed_window_is_logged() {
    let logs = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let sink = RecordingSink::default();
    let reporter =
        TimeWindowReporter::start(config(), Arc::new(AggregatorRegistry::new()), sink.clone())
            .unwrap();
    // arm halfway between windows so each of the windows at 1s, 2s and 3s fails once
    tokio::time::sleep(Duration::from_millis(500)).await;
    for _ in 0..3 {
        sink.fail_next_flush();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    reporter.shutdown().await;

    let failures = logs
        .dump()
        .matches("failed to export metrics, will retry next window")
        .count();
    check!(failures == 3);
    check!(sink.flushes() == 1);
}

#[tokio::test(start_paused = true)]
async fn runs_with_a_discarding_sink() {
    let reporter =
        TimeWindowReporter::start(config(), Arc::new(AggregatorRegistry::new()), NullSink)
            .unwrap();
    reporter.emit("requests", &TagSet::empty(), 1, 1_000);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    check!(reporter.watermark() == 1_000);
    reporter.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let config = ReporterConfig {
        database: None,
        ..config()
    };
    let err = TimeWindowReporter::start(
        config,
        Arc::new(AggregatorRegistry::new()),
        RecordingSink::default(),
    )
    .unwrap_err();
    check!(err == ConfigError::MissingDatabase);
}
