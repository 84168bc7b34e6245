use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use phasetask_engine::{Continuation, Frame, ItemPoll, LoopPump, Phase, Step, StepContext, TaskError};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Default)]
struct Yields {
    left: u32,
}

impl Frame for Yields {
    type Output = u32;

    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<u32>, TaskError> {
        if self.left == 0 {
            return Ok(Step::Completed(0));
        }
        self.left -= 1;
        cx.yield_to(Phase::Primary)?;
        Ok(Step::Suspended)
    }
}

fn bench_spawn_recycled(c: &mut Criterion) {
    let pump = LoopPump::new();
    // Warm the pool so every iteration reuses a driver
    drop(pump.spawn(Yields::default()).result());

    c.bench_function("spawn_complete_recycled", |b| {
        b.iter(|| {
            let handle = pump.spawn(Yields { left: black_box(0) });
            handle.result().unwrap()
        });
    });
}

fn bench_yield_per_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("yield_per_tick");

    for tasks in [1usize, 64, 1024] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::new("tasks", tasks), &tasks, |b, &tasks| {
            let pump = LoopPump::new();
            b.iter(|| {
                let handles: Vec<_> = (0..tasks).map(|_| pump.spawn(Yields { left: 1 })).collect();
                pump.tick(Phase::Primary).unwrap();
                for handle in handles {
                    black_box(handle.result().unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");

    group.bench_function("continuations_256", |b| {
        let pump = LoopPump::new();
        let hits = Rc::new(Cell::new(0u64));
        b.iter(|| {
            for _ in 0..256 {
                let h = hits.clone();
                pump.add_continuation(Phase::Primary, Continuation::callback(move || h.set(h.get() + 1)))
                    .unwrap();
            }
            pump.tick(Phase::Primary).unwrap()
        });
    });

    group.bench_function("repeating_items_256", |b| {
        let pump = LoopPump::new();
        for _ in 0..256 {
            let mut n = 0u64;
            pump.add_action(Phase::Secondary, move || {
                n = black_box(n + 1);
                ItemPoll::Continue
            })
            .unwrap();
        }
        b.iter(|| pump.tick(Phase::Secondary).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_spawn_recycled, bench_yield_per_tick, bench_drain);
criterion_main!(benches);
