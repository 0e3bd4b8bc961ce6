use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sports_analyzer::{
    scoring, FnHandler, MemorySource, NoopHook, Phase, PipelineBuilder, Record, RoleHandler,
};
use std::time::Duration;

fn source(records_per_phase: usize) -> MemorySource {
    let half = records_per_phase / 2;
    let rows = |prefix: &str, n: usize| -> Vec<String> {
        (0..n).map(|i| format!("{prefix},{i},{}", "x".repeat(48))).collect()
    };
    MemorySource::new()
        .with_origin(Phase::Football, "football/atp_matches.csv", rows("fm", half))
        .with_origin(Phase::Football, "football/atp_rankings.csv", rows("fr", half))
        .with_origin(Phase::Tennis, "tennis/atp_matches.csv", rows("tm", half))
        .with_origin(Phase::Tennis, "tennis/atp_rankings.csv", rows("tr", half))
}

fn run(capacity: usize, records_per_phase: usize) {
    let pipeline = PipelineBuilder::new()
        .with_capacity(capacity)
        .add_roles(scoring::sports_roles())
        .build()
        .expect("Build failed");

    let running = pipeline
        .start(
            Box::new(source(records_per_phase)),
            Box::new(NoopHook),
            |_, role| {
                Ok(Box::new(FnHandler::new(role.name(), |_, record: &Record| {
                    black_box(record.payload().len());
                    Ok(())
                })) as Box<dyn RoleHandler>)
            },
        )
        .expect("Start failed");
    let summary = running.wait().expect("Run failed");
    black_box(summary.peak_buffered);
}

fn benchmark_two_phase_run(c: &mut Criterion) {
    let records = 10_000;
    let mut group = c.benchmark_group("two_phase_run");
    group.throughput(Throughput::Elements(2 * records as u64));

    for capacity in [2, 64, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
            b.iter(|| run(cap, records));
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_two_phase_run
);
criterion_main!(benches);
