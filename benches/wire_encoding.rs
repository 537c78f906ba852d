//! Parameter encoding benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sasplugin::model::{
    Distribution, ModelDescriptor, ParameterDescriptor, ParameterFlags, ParameterSet, wire,
};
use std::hint::black_box;
use std::sync::Arc;

fn descriptor(polydisperse: usize) -> Arc<ModelDescriptor> {
    let parameters = (0..8)
        .map(|i| ParameterDescriptor {
            name: format!("p{i}"),
            description: String::new(),
            unit: String::new(),
            default: i as f64,
            dispmin: 0.0,
            dispmax: f64::INFINITY,
            flags: if i < polydisperse {
                ParameterFlags::POLYDISPERSE
            } else {
                ParameterFlags::NONE
            },
        })
        .collect();
    Arc::new(ModelDescriptor::new("bench", "", parameters).unwrap())
}

fn bench_encode_scalars(c: &mut Criterion) {
    let descriptor = descriptor(0);
    let set = ParameterSet::defaults(descriptor.clone());

    c.bench_function("encode_8_scalars", |b| {
        b.iter(|| black_box(wire::encode(&descriptor, &set).unwrap()));
    });
}

fn bench_encode_distributions(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_distributions");
    let descriptor = descriptor(2);

    for points in [1, 35, 350] {
        let mut set = ParameterSet::defaults(descriptor.clone());
        let values: Vec<f64> = (0..points).map(|i| 10.0 + i as f64).collect();
        set.set("p0", Distribution::uniform(values.clone())).unwrap();
        set.set("p1", Distribution::uniform(values)).unwrap();

        group.throughput(Throughput::Elements(2 * points as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), &set, |b, set| {
            b.iter(|| black_box(wire::encode(&descriptor, set).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let descriptor = descriptor(2);
    let mut set = ParameterSet::defaults(descriptor.clone());
    set.set("p0", Distribution::uniform(vec![1.0; 35])).unwrap();
    let encoded = wire::encode(&descriptor, &set).unwrap();

    c.bench_function("decode_for_8_parameters", |b| {
        b.iter(|| black_box(unsafe { wire::decode_for(encoded.as_ptr(), &descriptor) }.unwrap()));
    });
}

criterion_group!(
    benches,
    bench_encode_scalars,
    bench_encode_distributions,
    bench_decode
);
criterion_main!(benches);
