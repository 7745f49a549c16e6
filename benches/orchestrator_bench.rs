// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for verdict fusion and retry decisions across the stage set.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::collections::BTreeMap;

use imgpipe_config::PipelineConfig;
use imgpipe_core::{
    LocalVerdict, LocalVerdictKind, ModelVerdict, PlacementResult, PlacementVerdict, RetryState,
    SemanticVerdict, Stage, Trigger,
};
use imgpipe_orchestrator::{decide_retry, fuse_verdict};

fn passing_local() -> LocalVerdict {
    let mut metrics = BTreeMap::new();
    metrics.insert("global_edge_iou".to_string(), 0.92);
    LocalVerdict { verdict: None, triggers: vec![], metrics }
}

fn risky_local() -> LocalVerdict {
    let mut metrics = BTreeMap::new();
    metrics.insert("brightness_delta".to_string(), 0.5);
    LocalVerdict {
        verdict: Some(LocalVerdictKind::Risk),
        triggers: vec![
            Trigger {
                id: "brightness_out_of_range".into(),
                fatal: false,
                value: 0.5,
                threshold: 0.35,
                message: "mean luminance shifted more than expected".into(),
            },
            Trigger {
                id: "landcover_change".into(),
                fatal: false,
                value: 0.2,
                threshold: 0.15,
                message: "green-cover ratio shifted more than expected".into(),
            },
        ],
        metrics,
    }
}

fn passing_model() -> ModelVerdict {
    ModelVerdict {
        semantic: SemanticVerdict {
            pass: true,
            confidence: 0.97,
            allowed_changes_only: true,
            reason: "matches intent".into(),
            fail_reasons: vec![],
            checks: BTreeMap::new(),
            parse_error: false,
        },
        placement: Some(PlacementVerdict { verdict: PlacementResult::Pass, reasons: vec![] }),
    }
}

fn failing_model() -> ModelVerdict {
    ModelVerdict {
        semantic: SemanticVerdict {
            pass: false,
            confidence: 0.4,
            allowed_changes_only: false,
            reason: "introduced disallowed change".into(),
            fail_reasons: vec!["added furniture".into()],
            checks: BTreeMap::new(),
            parse_error: false,
        },
        placement: None,
    }
}

fn bench_fuse_verdict(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let mut group = c.benchmark_group("fuse_verdict");

    let local_fatal = LocalVerdict {
        verdict: Some(LocalVerdictKind::Fatal),
        triggers: vec![Trigger {
            id: "low_global_edge_iou".into(),
            fatal: true,
            value: 0.2,
            threshold: 0.65,
            message: "candidate edge structure diverges from baseline".into(),
        }],
        metrics: BTreeMap::new(),
    };
    group.bench_function("local_fatal_skips_model", |b| {
        b.iter(|| fuse_verdict(black_box(&config), black_box(Stage::OneA), black_box(&local_fatal), None));
    });

    let local_pass = passing_local();
    let model_pass = passing_model();
    group.bench_function("local_and_model_pass", |b| {
        b.iter(|| fuse_verdict(black_box(&config), black_box(Stage::Two), black_box(&local_pass), black_box(Some(&model_pass))));
    });

    let local_risk = risky_local();
    let model_fail = failing_model();
    group.bench_function("local_risk_model_fails", |b| {
        b.iter(|| fuse_verdict(black_box(&config), black_box(Stage::Two), black_box(&local_risk), black_box(Some(&model_fail))));
    });

    group.finish();
}

fn bench_decide_retry(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let verdict = fuse_verdict(&config, Stage::Two, &risky_local(), Some(&failing_model()));

    c.bench_function("decide_retry_exhausts_budget", |b| {
        b.iter(|| {
            let mut state = RetryState::default();
            for _ in 0..config.max_attempts_per_stage + 1 {
                black_box(decide_retry(black_box(&config), &mut state, black_box(Stage::OneA), black_box(&verdict)));
            }
        });
    });
}

criterion_group!(benches, bench_fuse_verdict, bench_decide_retry);
criterion_main!(benches);
