use assert2::check;
use tally::{Aggregator, AggregatorKind, AggregatorRegistry, DistributionBucket};
use tally_core::{TagSet, test_util::SharedBuffer};
use tally_format_line::LineProtocol;
use tally_reporter::{ReporterConfig, Sweeper};

#[test]
fn sweep_writes_line_protocol() {
    let registry = AggregatorRegistry::new();
    let latency = registry.register(Aggregator::new(
        "latency",
        AggregatorKind::BasicHistogram(DistributionBucket::new([10, 50, 200]).unwrap()),
    ));
    let requests = registry.register(Aggregator::new("requests", AggregatorKind::Basic));

    let tags = TagSet::from_pairs([("host", "web 1"), ("dc", "east")]);
    for value in [5, 10, 11, 60, 500] {
        latency.apply(&tags, value, 1_000);
    }
    requests.apply(&TagSet::empty(), 1, 2_000);

    let buffer = SharedBuffer::default();
    let mut sink = LineProtocol::new(buffer.clone(), ReporterConfig::DEFAULT_BUFFER_SIZE);
    let sweeper = Sweeper::new();
    let report = sweeper.sweep(&registry, &mut sink).unwrap();
    check!(report.rows == 2);
    check!(report.watermark == 2_000);

    let output = buffer.take_string();
    let lines: Vec<&str> = output.lines().collect();
    check!(
        lines
            == [
                "latency,host=web\\ 1,dc=east count=5i,sum=586i,min=5i,max=500i,<\\=10=2i,<\\=50=1i,<\\=200=1i,other=1i",
                "requests count=1i,sum=1i,min=1i,max=1i",
            ]
    );

    // everything was reset by the first pass
    requests.apply(&TagSet::empty(), 4, 3_000);
    sweeper.sweep(&registry, &mut sink).unwrap();
    check!(buffer.take_string() == "requests count=1i,sum=4i,min=4i,max=4i\n");
}
