use libos_sync::{Completion, Sleeper, SpinLock, SyncOnceCell, TimedOut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

struct StdSleeper(Instant);

impl Sleeper for StdSleeper {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }

    fn relax(&self) {
        thread::yield_now();
    }
}

#[test]
fn guard_releases_on_drop() {
    let lock = SpinLock::new(1_u32);
    {
        let mut g = lock.lock();
        *g += 1;
        assert!(lock.is_locked());
    }
    assert!(!lock.is_locked());
    assert_eq!(*lock.lock(), 2);
}

#[test]
fn try_lock_fails_while_held() {
    let lock = SpinLock::new(());
    let held = lock.try_lock();
    assert!(held.is_some());
    assert!(lock.try_lock().is_none());
    drop(held);
    assert!(lock.try_lock().is_some());
}

#[test]
fn contended_counter_is_exact() {
    let threads = 6;
    let iters = 4_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(|v| {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *v += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn once_cell_runs_initializer_once() {
    let cell = SyncOnceCell::new();
    let calls = AtomicUsize::new(0);
    for _ in 0..3 {
        let v = cell.get_or_init(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            7
        });
        assert_eq!(*v, 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cell.set(9), Err(9));
}

#[test]
fn completion_wakes_waiter_from_other_thread() {
    let done = Arc::new(Completion::new());
    let signal = Arc::clone(&done);
    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        signal.complete();
    });

    let sleeper = StdSleeper(Instant::now());
    assert_eq!(done.wait(&sleeper, Some(Duration::from_secs(5))), Ok(()));
    t.join().unwrap();
}

#[test]
fn completion_times_out() {
    let done = Completion::new();
    let sleeper = StdSleeper(Instant::now());
    assert_eq!(
        done.wait(&sleeper, Some(Duration::from_millis(2))),
        Err(TimedOut)
    );
    done.complete();
    assert_eq!(done.wait(&sleeper, Some(Duration::ZERO)), Ok(()));
}
