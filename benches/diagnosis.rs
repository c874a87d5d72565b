//! Diagnosis performance benchmarks

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genoracle::config::FeedbackConfig;
use genoracle::feedback::FeedbackStore;
use genoracle::{Classifier, FaultCodeId, KnowledgeBase, Oracle, OracleConfig, Outcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

fn running_oracle(sessions: usize) -> Oracle {
    let oracle = Oracle::new(
        OracleConfig::default(),
        KnowledgeBase::builtin().expect("Failed to load knowledge base"),
    )
    .expect("Failed to build oracle");
    let now = Utc::now();

    for i in 0..sessions {
        let id = format!("bay-{}", i);
        oracle
            .select_controller_profile(&id, "dse-8610", "V2")
            .expect("Failed to select profile");
        for (parameter, value) in [
            ("oil_pressure", 18.0 + (i % 10) as f64),
            ("coolant_temp", 90.0 + (i % 15) as f64),
            ("rpm", 1500.0),
            ("battery_voltage", 26.8),
            ("frequency", 50.0),
            ("voltage_l1n", 231.0),
        ] {
            oracle
                .set_reading(&id, parameter, value, now)
                .expect("Failed to set reading");
        }
    }
    oracle
}

fn benchmark_diagnose(c: &mut Criterion) {
    let mut group = c.benchmark_group("diagnose");

    let oracle = running_oracle(1);
    group.bench_function("single_session", |b| {
        b.iter(|| black_box(oracle.diagnose("bay-0").expect("diagnose")));
    });

    group.bench_function("evaluate_with_alarms", |b| {
        b.iter(|| black_box(oracle.evaluate("bay-0").expect("evaluate")));
    });

    let oracle = Arc::new(running_oracle(64));
    group.bench_function("concurrent_64_sessions", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|worker| {
                    let oracle = Arc::clone(&oracle);
                    thread::spawn(move || {
                        for i in (worker..64).step_by(4) {
                            black_box(oracle.diagnose(&format!("bay-{}", i)).ok());
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

fn benchmark_classifier(c: &mut Criterion) {
    let kb = KnowledgeBase::builtin().expect("Failed to load knowledge base");
    let classifier = Classifier::default();
    let oil = kb.parameters.get("oil_pressure").expect("oil_pressure").clone();

    c.bench_function("classify_1000_values", |b| {
        b.iter(|| {
            for i in 0..1000 {
                black_box(classifier.classify(&oil, i as f64 * 0.1));
            }
        });
    });
}

fn benchmark_feedback(c: &mut Criterion) {
    let mut group = c.benchmark_group("feedback");
    let start = Utc::now();

    group.bench_function("submit_and_weigh", |b| {
        let store = FeedbackStore::new(FeedbackConfig::default());
        let code = FaultCodeId::from("DSE-100");
        let mut n = 0i64;

        b.iter(|| {
            let outcome = if n % 3 == 0 { Outcome::Failed } else { Outcome::Worked };
            store.submit(&code, outcome, "", None, BTreeMap::new(), start + Duration::seconds(n));
            n += 1;
            black_box(store.weight("DSE-100"))
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_diagnose, benchmark_classifier, benchmark_feedback);
criterion_main!(benches);
