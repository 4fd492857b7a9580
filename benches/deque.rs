use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use crossbeam_deque::{Steal, Worker};
use sumset::{deque::FrameDeque, frame::FrameId};

const BATCH: usize = 256;

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");

    let deque = FrameDeque::new(BATCH);
    group.bench_function("frame_deque", |b| {
        b.iter(|| {
            for slot in 0..BATCH {
                deque.push(FrameId::new(0, slot)).unwrap();
            }
            while let Some(id) = deque.pop() {
                black_box(id);
            }
        })
    });

    let worker = Worker::new_lifo();
    group.bench_function("crossbeam_deque", |b| {
        b.iter(|| {
            for slot in 0..BATCH {
                worker.push(FrameId::new(0, slot));
            }
            while let Some(id) = worker.pop() {
                black_box(id);
            }
        })
    });

    group.finish();
}

fn bench_steal(c: &mut Criterion) {
    let mut group = c.benchmark_group("steal");

    let deque = FrameDeque::new(BATCH);
    group.bench_function("frame_deque", |b| {
        b.iter(|| {
            for slot in 0..BATCH {
                deque.push(FrameId::new(0, slot)).unwrap();
            }
            while let Some(id) = deque.steal().success() {
                black_box(id);
            }
        })
    });

    let worker = Worker::new_lifo();
    let stealer = worker.stealer();
    group.bench_function("crossbeam_deque", |b| {
        b.iter(|| {
            for slot in 0..BATCH {
                worker.push(FrameId::new(0, slot));
            }
            while let Steal::Success(id) = stealer.steal() {
                black_box(id);
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_push_pop, bench_steal);
criterion_main!(benches);
