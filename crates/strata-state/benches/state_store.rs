//! Criterion benchmarks for the SQLite state store.
//!
//! These measure the controller scan and audit lifecycle that occur on
//! every batch.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use strata_state::prelude::*;

fn bench_audit_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/audit_lifecycle");

    group.bench_function("open_and_close", |b| {
        let store = SqliteStateStore::in_memory().unwrap();
        let pipeline = PipelineId::new("bench_pipeline");

        b.iter(|| {
            let audit_id = store.open(&pipeline).unwrap();
            store
                .close(audit_id, AuditStatus::Completed, Some(1000), None)
                .unwrap();
        });
    });

    group.finish();
}

fn bench_active_pipelines(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/active_pipelines");

    for pipeline_count in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("pipelines", pipeline_count),
            &pipeline_count,
            |b, &pipeline_count| {
                let store = SqliteStateStore::in_memory().unwrap();
                for i in 0..pipeline_count {
                    store
                        .upsert_pipeline(&RawPipelineRow {
                            id: format!("pipeline_{i}"),
                            data_source: format!("source_{i}"),
                            source_table: format!("raw_{i}"),
                            destination_table: format!("dim_{i}"),
                            schema_name: "public".into(),
                            load_type: "full".into(),
                            active: true,
                        })
                        .unwrap();
                }

                b.iter(|| {
                    let configs = store.active_pipelines(None).unwrap();
                    assert_eq!(configs.len(), pipeline_count);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_audit_lifecycle, bench_active_pipelines);
criterion_main!(benches);
