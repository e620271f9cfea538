//! Performance benchmarks for request building and hashing

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entity_feed::*;

struct Noop;

impl DataListener for Noop {
    fn on_page_loaded(&self, _: &PageData<EntityData>, _: &[Vec<DataSet>], _: usize) {}
    fn on_point_updated(&self, _: &DataSet, _: usize, _: usize, _: usize) {}
}

fn listener_with_keys(count: usize) -> EntityDataListener {
    let keys = (0..count)
        .map(|i| {
            let mut key = DataKey::new(format!("key_{}", i), DataKeyType::Timeseries);
            key.label = Some(format!("Key {}", i));
            key.color = Some("#3f51b5".to_string());
            key.settings = serde_json::json!({"lineWidth": 2, "showPoints": i % 2 == 0});
            key.post_func_body = Some("return value;".to_string());
            key
        })
        .collect();

    let datasource = Datasource::entity(
        Some(EntityFilter::EntityType {
            entity_type: "device".to_string(),
        }),
        Some(PageLink::new(0, 50)),
        keys,
    );
    EntityDataListener::new(SubscriptionMode::TimeSeries, datasource, 0, Arc::new(Noop))
        .with_timewindow(SubscriptionTimewindow::realtime(3_600_000, 60_000, 1_700_000_000_000))
}

fn bench_build_options(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_subscription_options");

    for count in [1, 10, 100] {
        let listener = listener_with_keys(count);
        let page_link = PageLink::new(1, 50);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &listener, |b, l| {
            b.iter(|| build_subscription_options(black_box(l), Some(&page_link), &[], true))
        });
    }

    group.finish();
}

fn bench_options_hash(c: &mut Criterion) {
    let listener = listener_with_keys(20);
    let options = build_subscription_options(&listener, listener.datasource.page_link(), &[], false);

    c.bench_function("options_hash_code", |b| {
        b.iter(|| black_box(&options).hash_code().unwrap())
    });
}

criterion_group!(benches, bench_build_options, bench_options_hash);
criterion_main!(benches);
