//! Benchmarks for audit hashing and case processing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use triageflow::analysis::StaticAnalysisService;
use triageflow::audit::{content_hash, metadata, AuditCategory, AuditTrail};
use triageflow::config::TriageConfig;
use triageflow::system::TriageSystem;
use triageflow::testing::{fixtures, sample_alert};

fn audit_benchmark(c: &mut Criterion) {
    let alert = sample_alert();
    let enrichment = fixtures::sample_enrichment();

    c.bench_function("content_hash_alert", |b| {
        b.iter(|| content_hash(black_box(&alert)).unwrap());
    });

    c.bench_function("append_and_verify_4", |b| {
        b.iter(|| {
            let mut trail = AuditTrail::new("alert-0001", BTreeMap::new());
            for stage in ["enrichment", "risk_assessment", "narrative_context", "decision"] {
                trail
                    .append(
                        stage,
                        "bench",
                        AuditCategory::StageCompletion,
                        &alert,
                        &enrichment,
                        metadata([("stage", json!(stage))]),
                    )
                    .unwrap();
            }
            trail.verify().unwrap();
        });
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let system = TriageSystem::with_reference_stages(
        TriageConfig::default(),
        Arc::new(StaticAnalysisService::new()),
    )
    .unwrap();
    let alert = sample_alert();

    c.bench_function("process_case_reference", |b| {
        b.iter(|| runtime.block_on(system.process_case(black_box(&alert))));
    });
}

criterion_group!(benches, audit_benchmark, pipeline_benchmark);
criterion_main!(benches);
