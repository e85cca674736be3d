#![cfg(feature = "adaptive")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::sync::WaitGroup;
use sux::instrument::{Instrument, Instrumented, Mode};
use sux::srw::{adaptive::AdaptiveLock, RawSrwLock};
use sux::{BlockLock, IndexLock, Owner, SuxLock, ThreadInfo};

/// Spin until some thread is parked on `lock`
fn wait_for_waiter<L: RawSrwLock, I: ThreadInfo>(lock: &SuxLock<L, I>) {
    while !lock.is_waiting() {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn recursive_exclusive_round_trip() {
    let lock = BlockLock::new();

    for n in 1..=5 {
        lock.x_lock(false);
        for _ in 1..n {
            lock.x_lock(false);
        }
        assert_eq!(lock.x_depth(), n);

        for _ in 1..n {
            unsafe { lock.x_unlock(false) }
            assert!(lock.have_x());
        }

        unsafe { lock.x_unlock(false) }
        assert!(!lock.have_x());
        assert!(!lock.have_u_or_x());
        #[cfg(debug_assertions)]
        assert!(!lock.have_any());
    }
}

#[test]
fn mutual_exclusion() {
    let lock = Arc::new(BlockLock::new());
    let checked = WaitGroup::new();
    let unlocked = WaitGroup::new();

    lock.x_lock(false);
    lock.x_lock(false);

    let t = std::thread::spawn({
        let lock = lock.clone();
        let checked = checked.clone();
        let unlocked = unlocked.clone();
        move || {
            assert!(!lock.s_lock_try());
            assert!(!lock.u_lock_try(false));
            assert!(!lock.x_lock_try());
            assert!(!lock.have_u_or_x());
            checked.wait();

            unlocked.wait();
            assert!(lock.s_lock_try());
            unsafe { lock.s_unlock() }
            assert!(lock.u_lock_try(false));
            unsafe { lock.u_unlock(false) }
            assert!(lock.x_lock_try());
            unsafe { lock.x_unlock(false) }
        }
    });

    checked.wait();

    unsafe { lock.x_unlock(false) }
    // still held once
    assert!(lock.raw().is_locked());
    unsafe { lock.x_unlock(false) }

    unlocked.wait();
    t.join().unwrap();

    assert_eq!(lock.owner(), Owner::None);
}

#[test]
fn shared_concurrency() {
    const READERS: usize = 8;

    let lock = Arc::new(BlockLock::new());
    let acquired = WaitGroup::new();
    let release = WaitGroup::new();

    let threads = (0..READERS)
        .map(|_| {
            let lock = lock.clone();
            let acquired = acquired.clone();
            let release = release.clone();
            std::thread::spawn(move || {
                assert!(lock.s_lock_try());
                #[cfg(debug_assertions)]
                assert!(lock.have_s());
                acquired.wait();
                release.wait();
                unsafe { lock.s_unlock() }
            })
        })
        .collect::<Vec<_>>();

    acquired.wait();
    assert!(!lock.x_lock_try());
    #[cfg(debug_assertions)]
    assert!(!lock.have_s());

    release.wait();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(lock.x_lock_try());
    unsafe { lock.x_unlock(false) }
}

#[test]
fn upgrade_preserves_depth() {
    let lock = BlockLock::new();

    for k in 1..=4 {
        for _ in 0..k {
            lock.u_lock();
        }
        assert!(lock.have_u_not_x());

        unsafe { lock.u_x_upgrade() }
        assert!(lock.have_x());
        assert!(!lock.have_u_not_x());
        assert_eq!((lock.x_depth(), lock.u_depth()), (k, 0));

        for left in (0..k).rev() {
            unsafe { lock.x_unlock(false) }
            assert_eq!(lock.have_x(), left != 0);
        }

        assert!(!lock.raw().is_locked());
    }
}

#[test]
fn independent_counters() {
    let lock = BlockLock::new();

    lock.u_lock();
    lock.x_lock(false);
    lock.u_lock();
    assert_eq!((lock.x_depth(), lock.u_depth()), (1, 2));

    unsafe { lock.x_unlock(false) }
    assert_eq!((lock.x_depth(), lock.u_depth()), (0, 2));
    assert!(lock.have_u_not_x());

    unsafe { lock.u_unlock(false) }
    assert!(lock.have_u_or_x());
    unsafe { lock.u_unlock(false) }
    assert!(!lock.have_u_or_x());
    assert!(!lock.raw().is_locked());

    // the same holds when U is released before X
    lock.u_lock();
    lock.x_lock(false);
    lock.u_lock();

    unsafe {
        lock.u_unlock(false);
        lock.u_unlock(false);
    }
    assert!(lock.have_x());
    unsafe { lock.x_unlock(false) }

    assert!(!lock.have_u_or_x());
    assert!(!lock.raw().is_locked());
}

#[test]
fn exclusive_through_update_excludes_others() {
    let lock = Arc::new(BlockLock::new());

    lock.u_lock();
    lock.x_lock(false);
    assert!(lock.have_x());
    assert_eq!((lock.x_depth(), lock.u_depth()), (1, 1));

    std::thread::spawn({
        let lock = lock.clone();
        move || {
            assert!(!lock.s_lock_try());
            assert!(!lock.u_lock_try(false));
            assert!(!lock.x_lock_try());
        }
    })
    .join()
    .unwrap();

    unsafe {
        lock.x_unlock(false);
        lock.u_unlock(false);
    }

    std::thread::spawn({
        let lock = lock.clone();
        move || {
            assert!(lock.s_lock_try());
            unsafe { lock.s_unlock() }
        }
    })
    .join()
    .unwrap();
}

#[test]
fn exclusive_through_update_waits_for_readers() {
    let lock = Arc::new(BlockLock::new());
    let reading = WaitGroup::new();

    let reader = std::thread::spawn({
        let lock = lock.clone();
        let reading = reading.clone();
        move || {
            lock.s_lock();
            reading.wait();
            while !lock.is_waiting() {
                std::thread::sleep(Duration::from_millis(1));
            }
            unsafe { lock.s_unlock() }
        }
    });

    reading.wait();
    lock.u_lock();
    lock.x_lock(false);
    assert!(lock.have_x());
    assert_eq!(lock.waited(), 1);

    reader.join().unwrap();
    assert!(!lock.s_lock_try());

    unsafe {
        lock.u_unlock(false);
        lock.x_unlock(false);
    }
    assert!(!lock.raw().is_locked());
}

#[test]
fn for_io_transfer() {
    let lock = Arc::new(BlockLock::new());

    lock.x_lock(true);
    assert_eq!(lock.owner(), Owner::ForIo);
    assert!(!lock.have_x());

    std::thread::spawn({
        let lock = lock.clone();
        move || {
            assert!(!lock.have_x());
            unsafe { lock.x_unlock(true) }
        }
    })
    .join()
    .unwrap();

    assert_eq!(lock.owner(), Owner::None);
    assert!(lock.x_lock_try());
    unsafe { lock.x_unlock(false) }
}

#[test]
fn for_io_claim_then_unlock() {
    let lock = Arc::new(BlockLock::new());

    assert!(lock.u_lock_try(true));

    std::thread::spawn({
        let lock = lock.clone();
        move || unsafe {
            lock.claim_ownership();
            assert!(lock.have_u_not_x());
            lock.u_unlock(false);
        }
    })
    .join()
    .unwrap();

    assert!(!lock.raw().is_locked());
}

#[test]
#[cfg(debug_assertions)]
fn for_io_unlock_without_claim() {
    let lock = Arc::new(BlockLock::new());

    lock.x_lock(true);

    let result = std::thread::spawn({
        let lock = lock.clone();
        move || unsafe { lock.x_unlock(false) }
    })
    .join();

    assert!(result.is_err());
    assert_eq!(lock.owner(), Owner::ForIo);

    unsafe { lock.x_unlock(true) }
    assert!(!lock.raw().is_locked());
}

#[test]
fn wait_accounting() {
    let lock = Arc::new(BlockLock::new());

    for _ in 0..10 {
        assert!(lock.s_lock_try());
        unsafe { lock.s_unlock() }
        assert!(lock.u_lock_try(false));
        unsafe { lock.u_unlock(false) }
        assert!(lock.x_lock_try());
        unsafe { lock.x_unlock(false) }
    }
    assert_eq!(lock.waited(), 0);

    lock.x_lock(false);
    let before = lock.waited();

    let t = std::thread::spawn({
        let lock = lock.clone();
        move || {
            lock.x_lock(false);
            unsafe { lock.x_unlock(false) }
        }
    });

    wait_for_waiter(&lock);
    unsafe { lock.x_unlock(false) }
    t.join().unwrap();

    assert_eq!(lock.waited(), before + 1);

    lock.reset_waited();
    assert_eq!(lock.waited(), 0);
}

#[test]
fn lifecycle() {
    let mut lock = BlockLock::new();
    lock.init();
    lock.free();

    assert_eq!(lock.owner(), Owner::None);
    #[cfg(debug_assertions)]
    assert!(!lock.have_any());
}

#[test]
fn exclusive_waits_for_update() {
    let lock = Arc::new(BlockLock::new());
    let before = lock.waited();

    lock.u_lock();

    let t = std::thread::spawn({
        let lock = lock.clone();
        move || {
            lock.x_lock(false);
            assert!(lock.have_x());
            unsafe { lock.x_unlock(false) }
        }
    });

    wait_for_waiter(&lock);
    unsafe { lock.u_unlock(false) }
    t.join().unwrap();

    assert!(lock.waited() >= before + 1);
    assert!(!lock.raw().is_locked());
}

#[test]
fn upgrade_waits_for_readers() {
    let lock = Arc::new(BlockLock::new());
    let reading = WaitGroup::new();

    let reader = std::thread::spawn({
        let lock = lock.clone();
        let reading = reading.clone();
        move || {
            lock.s_lock();
            reading.wait();
            // hold S until the upgrade is pending
            while !lock.is_waiting() {
                std::thread::sleep(Duration::from_millis(1));
            }
            unsafe { lock.s_unlock() }
        }
    });

    reading.wait();
    lock.u_lock();
    assert!(lock.x_lock_upgraded());
    assert!(lock.have_x());
    assert_eq!(lock.waited(), 1);

    unsafe { lock.x_unlock(false) }
    reader.join().unwrap();
}

#[test]
fn contended_counter() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 500;

    let lock = Arc::new(BlockLock::new());
    let counter = Arc::new(AtomicUsize::new(0));

    let threads = (0..THREADS)
        .map(|i| {
            let lock = lock.clone();
            let counter = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    if i % 2 == 0 {
                        lock.u_lock();
                        lock.u_lock();
                        lock.x_lock_upgraded();
                    } else {
                        lock.x_lock(false);
                        lock.x_lock(false);
                    }

                    let x = counter.load(Ordering::Relaxed);
                    counter.store(x + 1, Ordering::Relaxed);

                    unsafe {
                        lock.x_unlock(false);
                        lock.x_unlock(false);
                    }

                    lock.s_lock();
                    unsafe { lock.s_unlock() }
                }
            })
        })
        .collect::<Vec<_>>();

    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), THREADS * ROUNDS);
    assert!(!lock.raw().is_locked());
}

#[derive(Default, Clone)]
struct Counter {
    acquired: Arc<AtomicUsize>,
    waited: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Instrument for Counter {
    fn acquired(&self, key: &'static str, _: Mode, waited: bool, _: &'static std::panic::Location<'static>) {
        assert_eq!(key, "dict_index");
        self.acquired.fetch_add(1, Ordering::Relaxed);
        if waited {
            self.waited.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn released(&self, _: &'static str, _: Mode) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn instrumented_index_lock() {
    let counter = Counter::default();
    let lock: IndexLock<Counter> =
        IndexLock::with_lock(Instrumented::new(AdaptiveLock::new(), "dict_index", counter.clone()));

    // recursion never reaches the underlying lock
    lock.x_lock(false);
    lock.x_lock(false);
    lock.u_lock();
    unsafe {
        lock.u_unlock(false);
        lock.x_unlock(false);
        lock.x_unlock(false);
    }

    lock.s_lock();
    unsafe { lock.s_unlock() }

    assert_eq!(counter.acquired.load(Ordering::Relaxed), 2);
    assert_eq!(counter.released.load(Ordering::Relaxed), 2);
    assert_eq!(counter.waited.load(Ordering::Relaxed), 0);

    let copy = lock.clone_unlocked();
    assert_eq!(copy.raw().key(), "dict_index");
    assert!(copy.x_lock_try());
    unsafe { copy.x_unlock(false) }
    assert_eq!(counter.acquired.load(Ordering::Relaxed), 3);
}
