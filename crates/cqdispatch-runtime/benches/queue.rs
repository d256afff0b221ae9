//! Hand-off and dispatch benchmarks.
//!
//! Measures:
//! 1. BoundedQueue push/pop on one thread (uncontended cost)
//! 2. BoundedQueue transfer between a producer and a consumer thread
//! 3. Arena register → complete round trip (inline dispatch path)
//! 4. Executor round trip: deliver, submit, resume on a worker
//!
//! Run with:
//! ```bash
//! cargo bench --package cqdispatch-runtime --bench queue
//! ```

use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use cqdispatch_core::{CompletionEvent, Opcode, OpToken};
use cqdispatch_runtime::{BackoffPolicy, BoundedQueue, Executor, ExecutorConfig, OperationArena};

fn bench_queue_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_queue");
    group.throughput(Throughput::Elements(1));

    let q = BoundedQueue::new(4096).unwrap();
    group.bench_function("push_pop", |b| {
        b.iter(|| {
            q.push(black_box(OpToken::new(1, 0))).unwrap();
            black_box(q.pop());
        })
    });

    group.finish();
}

fn bench_queue_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_queue");
    group.throughput(Throughput::Elements(1));

    let q = Arc::new(BoundedQueue::new(1024).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let consumer = {
        let q = Arc::clone(&q);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if q.pop().is_none() {
                    std::hint::spin_loop();
                }
            }
        })
    };

    group.bench_function("spsc_transfer", |b| {
        b.iter(|| {
            let mut token = OpToken::new(7, 0);
            while let Err(e) = q.push(token) {
                token = e.into_inner();
                std::hint::spin_loop();
            }
        })
    });

    stop.store(true, Ordering::Relaxed);
    consumer.join().unwrap();
    group.finish();
}

fn bench_arena_inline(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena");
    group.throughput(Throughput::Elements(1));

    let arena = OperationArena::new(1024).unwrap();
    group.bench_function("register_complete", |b| {
        b.iter(|| {
            let token = arena.register_callback(|ev| {
                black_box(ev);
            })
            .unwrap();
            arena
                .complete(&CompletionEvent::new(token, Opcode::Recv, 64))
                .unwrap();
        })
    });

    group.finish();
}

fn bench_executor_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor");
    group.throughput(Throughput::Elements(1));

    let arena = Arc::new(OperationArena::new(4096).unwrap());
    let executor = Executor::new(
        Arc::clone(&arena),
        ExecutorConfig::new()
            .num_workers(1)
            .queue_capacity(1024)
            .idle(BackoffPolicy::busy_poll()),
    )
    .unwrap();
    let done = Arc::new(AtomicU64::new(0));

    group.bench_function("submit_resume", |b| {
        b.iter(|| {
            let target = done.load(Ordering::Relaxed) + 1;
            let d = Arc::clone(&done);
            let token = arena
                .register_callback(move |_| {
                    d.fetch_add(1, Ordering::Release);
                })
                .unwrap();
            arena
                .deliver(&CompletionEvent::new(token, Opcode::Recv, 0))
                .unwrap();
            executor.submit(token).unwrap();
            while done.load(Ordering::Acquire) < target {
                std::hint::spin_loop();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_single_thread,
    bench_queue_transfer,
    bench_arena_inline,
    bench_executor_roundtrip
);
criterion_main!(benches);
