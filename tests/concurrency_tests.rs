//! Tests for memoized callables shared across threads

use memoist::{
    call_args, fresh_defaults, CacheArgs, CallArgs, Decorate, LockPolicy, Memoized,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

static CALL_COUNT_1: AtomicU32 = AtomicU32::new(0);

#[test]
fn test_concurrent_misses_compute_once() {
    let slow: Arc<Memoized<i64>> = Arc::new(
        Decorate::function()
            .with_defaults(fresh_defaults())
            .build("slow", &["n"], |args: &CallArgs| {
                CALL_COUNT_1.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(args.int(0)? * 10)
            })
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let slow = Arc::clone(&slow);
            thread::spawn(move || slow.call(&call_args![7]).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 70);
    }
    assert_eq!(CALL_COUNT_1.load(Ordering::SeqCst), 1);

    let info = slow.cache_info(None).unwrap();
    #[cfg(feature = "stats")]
    assert_eq!(info.hits + info.misses, 8);
    #[cfg(feature = "stats")]
    assert_eq!(info.misses, 1);
}

#[test]
fn test_unlocked_cache_still_returns_correct_values() {
    let square = Arc::new(
        Decorate::function()
            .with_defaults(fresh_defaults())
            .cache_args(CacheArgs::new().lock(LockPolicy::None))
            .build("square", &["n"], |args: &CallArgs| Ok(args.int(0)? * args.int(0)?))
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let square = Arc::clone(&square);
            thread::spawn(move || {
                for n in 0..50_i64 {
                    assert_eq!(square.call(&call_args![n]).unwrap(), n * n, "thread {t}");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(square.cache_info(None).unwrap().current_size, 50);
}

static CALL_COUNT_2: AtomicU32 = AtomicU32::new(0);

#[test]
fn test_recursive_calls_reenter_the_lock() {
    let fib: Arc<std::sync::OnceLock<Memoized<u64>>> = Arc::new(std::sync::OnceLock::new());
    let inner = Arc::clone(&fib);
    let memoized = Decorate::function()
        .with_defaults(fresh_defaults())
        .build("fib", &["n"], move |args: &CallArgs| {
            CALL_COUNT_2.fetch_add(1, Ordering::SeqCst);
            let n = args.int(0)?;
            if n < 2 {
                return Ok(n as u64);
            }
            let fib = inner.get().expect("initialized before the first call");
            let a = fib.call(&call_args![n - 1]).map_err(|e| e.into_fault().unwrap())?;
            let b = fib.call(&call_args![n - 2]).map_err(|e| e.into_fault().unwrap())?;
            Ok(a + b)
        })
        .unwrap();
    fib.set(memoized).unwrap();

    let fib = fib.get().unwrap();
    assert_eq!(fib.call(&call_args![30]).unwrap(), 832_040);
    assert_eq!(CALL_COUNT_2.load(Ordering::SeqCst), 31);
}
