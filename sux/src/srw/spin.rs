//! a spinning raw S/U/X lock

use crate::spin_wait::SpinWait;
use crate::srw::{CloneUnlocked, RawSrwLock};

use std::sync::atomic::{AtomicUsize, Ordering};

const UPGRADING_BIT: usize = 0b001;
const UPD_BIT: usize = 0b010;
const EXC_BIT: usize = 0b100;
const INC: usize = 0b1000;
const READERS: usize = !(INC - 1);

/// A S/U/X lock that never parks
///
/// Only suitable for very short critical sections.
pub struct SpinLock {
    state: AtomicUsize,
}

impl SpinLock {
    /// Create a new spin lock
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn spin_until(&self, mut try_lock: impl FnMut() -> bool) -> bool {
        if try_lock() {
            return true;
        }

        let mut spin = SpinWait::new();

        loop {
            // parking_lot_core's SpinWait stops yielding once it gives up
            if !spin.spin() {
                std::thread::yield_now();
            }

            if try_lock() {
                return false;
            }
        }
    }

    /// Apply `next` to the state until it succeeds, giving up once `next`
    /// says the lock is held in an incompatible mode
    #[inline]
    fn update(&self, mut next: impl FnMut(usize) -> Option<usize>) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);

        while let Some(new) = next(state) {
            match self.state.compare_exchange_weak(
                state,
                new,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => state = x,
            }
        }

        false
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl crate::Init for SpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl CloneUnlocked for SpinLock {
    fn clone_unlocked(&self) -> Self {
        Self::new()
    }
}

unsafe impl RawSrwLock for SpinLock {
    #[inline]
    fn shr_lock(&self) -> bool {
        self.spin_until(|| self.shr_try_lock())
    }

    #[inline]
    fn shr_try_lock(&self) -> bool {
        self.update(|state| {
            if state & (EXC_BIT | UPGRADING_BIT) != 0 {
                return None;
            }

            Some(
                state
                    .checked_add(INC)
                    .expect("Tried to create too many shared locks!"),
            )
        })
    }

    #[inline]
    unsafe fn shr_unlock(&self) {
        let state = self.state.fetch_sub(INC, Ordering::Release);
        debug_assert!(state & READERS != 0, "Can't unlock an unlocked lock");
    }

    #[inline]
    fn upd_lock(&self) -> bool {
        self.spin_until(|| self.upd_try_lock())
    }

    #[inline]
    fn upd_try_lock(&self) -> bool {
        self.update(|state| {
            if state & (EXC_BIT | UPD_BIT) != 0 {
                None
            } else {
                Some(state | UPD_BIT)
            }
        })
    }

    #[inline]
    unsafe fn upd_unlock(&self) {
        let state = self.state.fetch_and(!UPD_BIT, Ordering::Release);
        debug_assert!(state & UPD_BIT != 0, "Can't unlock an unlocked lock");
    }

    #[inline]
    fn exc_lock(&self) -> bool {
        self.spin_until(|| self.exc_try_lock())
    }

    #[inline]
    fn exc_try_lock(&self) -> bool {
        self.update(|state| {
            if state & (EXC_BIT | UPD_BIT | READERS) != 0 {
                None
            } else {
                Some(state | EXC_BIT)
            }
        })
    }

    #[inline]
    unsafe fn exc_unlock(&self) {
        let state = self.state.fetch_and(!EXC_BIT, Ordering::Release);
        debug_assert!(state & EXC_BIT != 0, "Can't unlock an unlocked lock");
    }

    #[inline]
    unsafe fn upgrade(&self) -> bool {
        if self.try_upgrade() {
            return true;
        }

        self.state.fetch_or(UPGRADING_BIT, Ordering::Relaxed);
        self.spin_until(|| self.try_upgrade());
        false
    }

    #[inline]
    unsafe fn try_upgrade(&self) -> bool {
        self.update(|state| {
            debug_assert!(state & UPD_BIT != 0, "Can't upgrade without an upd lock");

            if state & READERS != 0 {
                None
            } else {
                Some(EXC_BIT)
            }
        })
    }

    #[inline]
    fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Relaxed) & UPGRADING_BIT != 0
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }
}
