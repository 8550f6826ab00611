use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use memoist_core::{call_args, make_key, Arg, CallArgs, Decorate, Defaults};
use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn nested_args(width: usize) -> Vec<Arg> {
    let map: BTreeMap<String, i64> = (0..width).map(|i| (format!("field{i}"), i as i64)).collect();
    let seq: Vec<Arg> = (0..width).map(|i| Arg::Float(i as f64)).collect();
    vec![Arg::from(map), Arg::Seq(seq), Arg::from("label")]
}

fn bench_make_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("make_key");

    for width in [1, 10, 100].iter() {
        let args = nested_args(*width);
        let kwargs = vec![("limit".to_string(), Arg::Int(10))];
        group.bench_with_input(BenchmarkId::new("untyped", width), &args, |b, args| {
            b.iter(|| black_box(make_key(args, &kwargs, false)))
        });
        group.bench_with_input(BenchmarkId::new("typed", width), &args, |b, args| {
            b.iter(|| black_box(make_key(args, &kwargs, true)))
        });
    }

    group.finish();
}

fn bench_memoized_hit(c: &mut Criterion) {
    let square = Decorate::function()
        .with_defaults(Arc::new(Defaults::new()))
        .build("square", &["n"], |args: &CallArgs| Ok(args.int(0)? * args.int(0)?))
        .unwrap();
    for n in 0..100 {
        let _ = square.call(&call_args![n]);
    }

    c.bench_function("memoized_hit", |b| {
        let mut n = 0_i64;
        b.iter(|| {
            n = (n + 1) % 100;
            black_box(square.call(&call_args![n]))
        })
    });
}

fn bench_concurrent_hits(c: &mut Criterion) {
    let square = Arc::new(
        Decorate::function()
            .with_defaults(Arc::new(Defaults::new()))
            .build("square", &["n"], |args: &CallArgs| Ok(args.int(0)? * args.int(0)?))
            .unwrap(),
    );

    c.bench_function("concurrent_hits", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let square = Arc::clone(&square);
                    thread::spawn(move || {
                        for n in 0..50_i64 {
                            black_box(square.call(&call_args![n]).ok());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_make_key, bench_memoized_hit, bench_concurrent_hits);
criterion_main!(benches);
