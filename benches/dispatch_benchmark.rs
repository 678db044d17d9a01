/*!
 * Signal Dispatch Benchmarks
 *
 * Listener fan-out and child-signal drain over a scripted source
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use procmux::process::ExitObserver;
use procmux::signals::testing::ScriptedSource;
use procmux::signals::{ChildState, ChildTransition, Signal, SignalDispatcher, SignalInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_dispatch_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_fanout");

    for listeners in [1usize, 8, 64] {
        let dispatcher = SignalDispatcher::new(Arc::new(ScriptedSource::new()));
        let hits = Arc::new(AtomicU64::new(0));
        for _ in 0..listeners {
            let hits = hits.clone();
            dispatcher
                .register(Signal::SIGUSR1, move |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            &dispatcher,
            |b, dispatcher| {
                b.iter(|| black_box(dispatcher.dispatch(Signal::SIGUSR1, SignalInfo::user())));
            },
        );
    }

    group.finish();
}

fn bench_child_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_drain");

    for children in [1u32, 16, 128] {
        let source = Arc::new(ScriptedSource::new());
        let observer = ExitObserver::new(Arc::new(SignalDispatcher::new(source.clone())));

        group.bench_with_input(
            BenchmarkId::from_parameter(children),
            &children,
            |b, &children| {
                b.iter(|| {
                    let tokens: Vec<_> = (0..children)
                        .map(|_| observer.start_tracking().unwrap())
                        .collect();
                    for (pid, token) in (1..).zip(tokens) {
                        token.on_exit(pid, |code| {
                            black_box(code);
                        })
                        .unwrap();
                        source.push_transition(ChildTransition {
                            pid,
                            state: ChildState::Exited(0),
                        });
                    }
                    black_box(observer.dispatcher().deliver(Signal::SIGCHLD).unwrap())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch_fanout, bench_child_drain);
criterion_main!(benches);
