//! Knowledge Operations Benchmarks
//!
//! Benchmarks for learning, enhancement and classification.
//!
//! Run with: `cargo bench --bench knowledge_ops`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use visionary::schema::{ElementKind, PageDefinition, TestStep};
use visionary::{
    FailureClassifier, KnowledgeUpdater, PageElementSpec, SelectorCandidateStore,
    SelectorDescriptor, TestAssets,
};

const URL: &str = "https://app.test/checkout";

fn assets(elements: usize) -> TestAssets {
    let locators = (0..elements)
        .map(|i| {
            PageElementSpec::new(
                format!("field{i}"),
                ElementKind::Input,
                vec![
                    SelectorDescriptor::label(format!("Field {i}")),
                    SelectorDescriptor::placeholder(format!("field {i}")),
                    SelectorDescriptor::css(format!("#field-{i}")),
                ],
            )
        })
        .collect();
    TestAssets {
        page_object: PageDefinition {
            class_name: "CheckoutPage".to_string(),
            locators,
        },
        additional_page_objects: vec![],
        test_steps: vec![TestStep::new("fillField0")
            .with_param("x")
            .with_element("field0")],
    }
}

fn trained_updater(elements: usize) -> KnowledgeUpdater {
    let mut store = SelectorCandidateStore::in_memory();
    for i in 0..elements {
        let name = format!("field{i}");
        store.record_failure(URL, &name, &format!("label:Field {i}"));
        store.record_success(URL, &name, &format!("css:#field-{i}"));
    }
    KnowledgeUpdater::new(store)
}

fn bench_enhance(c: &mut Criterion) {
    let mut group = c.benchmark_group("enhance");

    for n in [10, 100, 1000] {
        let updater = trained_updater(n);
        let doc = assets(n);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{n}_elements")), &n, |b, _| {
            b.iter(|| black_box(updater.enhance(black_box(&doc), URL)));
        });
    }

    group.finish();
}

fn bench_learn_from_success(c: &mut Criterion) {
    let mut group = c.benchmark_group("learn_from_success");

    for n in [10, 100] {
        let doc = assets(n);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{n}_elements")), &n, |b, _| {
            b.iter(|| {
                let mut updater = KnowledgeUpdater::new(SelectorCandidateStore::in_memory());
                updater.learn_from_success("bench", &doc, URL, Duration::from_millis(5));
                black_box(updater);
            });
        });
    }

    group.finish();
}

fn bench_learning_report(c: &mut Criterion) {
    let updater = trained_updater(500);
    c.bench_function("learning_report_500", |b| {
        b.iter(|| black_box(updater.learning_report()));
    });
}

fn bench_classify(c: &mut Criterion) {
    let classifier = FailureClassifier::new();
    let report = serde_json::json!({
        "suites": [{ "suites": [{ "specs": [{ "tests": [{ "results": [{
            "error": {
                "message": "locator.fill: Timeout 3000ms exceeded",
                "stack": "at CheckoutPage.fillField0 (/p/pages/generated/CheckoutPage.ts:12:3)"
            }
        }]}]}]}]}]
    })
    .to_string();
    let text = "Error: something broke\n    at Object.run (/p/x.ts:1:1)\n".repeat(50);

    let mut group = c.benchmark_group("classify");
    group.bench_function("json_report", |b| {
        b.iter(|| black_box(classifier.classify("bench", black_box(&report))));
    });
    group.bench_function("raw_text", |b| {
        b.iter(|| black_box(classifier.classify("bench", black_box(&text))));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_enhance,
    bench_learn_from_success,
    bench_learning_report,
    bench_classify
);
criterion_main!(benches);
