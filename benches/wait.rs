use criterion::{criterion_group, criterion_main, Criterion};
use harts::sync::spin_until_changed;
use harts::{Config, ParkMode, Runtime};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn config() -> Config {
    Config::default()
        .with_harts(2)
        .with_stack_size(128 << 10)
        .with_spin_count(1_000)
        .with_throttled_spin_count(1_000)
}

fn spin_on_moved_word(c: &mut Criterion) {
    let word = AtomicU32::new(1);
    c.bench_function("spin_until_changed/moved", |b| {
        b.iter(|| spin_until_changed(&word, 0, 1_000))
    });
}

fn context_churn(c: &mut Criterion) {
    let runtime = Runtime::new(config()).unwrap();
    c.bench_function("context/create_join_64", |b| {
        b.iter(|| {
            for _ in 0..64 {
                runtime.root().create(|| {});
            }
            runtime.root().join_all();
        })
    });
}

fn wait_then_wake(c: &mut Criterion) {
    for mode in [ParkMode::Os, ParkMode::Cooperative] {
        let runtime = Runtime::new(config().with_park_mode(mode)).unwrap();
        c.bench_function(&format!("wait/{:?}/8_waiters", mode), |b| {
            b.iter(|| {
                let word = Arc::new(AtomicU32::new(0));
                for _ in 0..8 {
                    let (tree, word) = (runtime.tree().clone(), word.clone());
                    runtime.root().create(move || tree.parker().wait(&word, 0));
                }
                word.store(1, Ordering::Release);
                runtime.parker().wake(&word);
                runtime.root().join_all();
            })
        });
    }
}

criterion_group!(benches, spin_on_moved_word, context_churn, wait_then_wake);
criterion_main!(benches);
