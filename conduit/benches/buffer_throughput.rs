//! Throughput benchmarks for the event-streaming core's hot paths: `Data`
//! push/shift (§4.1) and a minimal pipeline's end-to-end event dispatch
//! (§4.3).
//!
//! Tests the PUBLIC API surface re-exported from `conduit::core` (user-facing
//! ergonomics), not the crate-internal modules directly.

use std::rc::Rc;

use conduit::core::buffer::Data;
use conduit::core::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const MESSAGE_SIZES: &[usize] = &[64, 256, 1024, 4096, 16384];

fn data_push_and_shift(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer/push_shift");
    for &size in MESSAGE_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = vec![0u8; size];
            b.iter(|| {
                let mut data = Data::new();
                data.push_slice(&payload);
                let head = data.shift(size / 2);
                black_box((head.size(), data.size()));
            });
        });
    }
    group.finish();
}

#[derive(Debug, Default)]
struct Echo {
    out: OutputPort,
}

impl Filter for Echo {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Echo::default())
    }
    fn chain(&mut self, output: OutputPort) {
        self.out = output;
    }
    fn reset(&mut self) {}
    fn process(&mut self, evt: Event) {
        self.out.emit(evt);
    }
    fn dump(&self) -> &'static str {
        "echo"
    }
}

struct Discard;
impl Input for Discard {
    fn input(self: Rc<Self>, _evt: Event) {}
}

fn pipeline_alloc_and_dispatch(c: &mut Criterion) {
    let layout = PipelineLayout::new("bench", LayoutType::Named);
    layout.append(Box::new(Echo::default()));
    layout.append(Box::new(Echo::default()));
    layout.append(Box::new(Echo::default()));
    layout.bind();

    let mut group = c.benchmark_group("pipeline/alloc_dispatch_free");
    group.throughput(Throughput::Elements(1));
    group.bench_function("alloc_process_free", |b| {
        let downstream = OutputPort::new();
        downstream.chain(Rc::new(Discard));
        b.iter(|| {
            let pipeline = layout.alloc(Context::default(), downstream.clone()).unwrap();
            pipeline.head().input(Event::message_start());
            pipeline.head().input(Event::message_end());
            drop(pipeline);
        });
    });
    group.finish();
}

criterion_group!(benches, data_push_and_shift, pipeline_alloc_and_dispatch);
criterion_main!(benches);
