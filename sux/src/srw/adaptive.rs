//! an adaptive raw S/U/X lock

use crate::srw::{CloneUnlocked, RawSrwLock};

use parking_lot_core::{self, ParkResult, ParkToken, SpinWait, UnparkToken};

use std::sync::atomic::{AtomicUsize, Ordering};

const PARK_BIT: usize = 0b0001;
const UPGRADING_BIT: usize = 0b0010;
const UPD_BIT: usize = 0b0100;
const EXC_BIT: usize = 0b1000;
const INC: usize = 0b1_0000;
const READERS: usize = !(INC - 1);

// Every parked thread re-checks the lock once woken, so no handoff is needed
const TOKEN_NORMAL: UnparkToken = UnparkToken(0);

const TOKEN_SHARED: ParkToken = ParkToken(1);
const TOKEN_UPDATE: ParkToken = ParkToken(2);
const TOKEN_EXCLUSIVE: ParkToken = ParkToken(3);

/// An adaptive S/U/X lock backed by `parking_lot_core`
///
/// Acquisitions spin for a short while and then park. A pending upgrade
/// holds off new shr locks so the upgrading thread is not starved by readers.
pub struct AdaptiveLock {
    state: AtomicUsize,
}

impl AdaptiveLock {
    /// Create a new adaptive S/U/X lock
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn can_shr(state: usize) -> bool {
        state & (EXC_BIT | UPGRADING_BIT) == 0
    }

    #[inline]
    fn can_upd(state: usize) -> bool {
        state & (EXC_BIT | UPD_BIT) == 0
    }

    #[inline]
    fn can_exc(state: usize) -> bool {
        state & (EXC_BIT | UPD_BIT | READERS) == 0
    }

    #[inline]
    fn try_shr(&self, state: &mut usize) -> bool {
        loop {
            if !Self::can_shr(*state) {
                return false;
            }

            let next = state
                .checked_add(INC)
                .expect("S/U/X lock reader count overflow");

            match self.state.compare_exchange_weak(
                *state,
                next,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => *state = x,
            }
        }
    }

    #[inline]
    fn try_bit(&self, state: &mut usize, can: fn(usize) -> bool, bit: usize) -> bool {
        loop {
            if !can(*state) {
                return false;
            }

            match self.state.compare_exchange_weak(
                *state,
                *state | bit,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => *state = x,
            }
        }
    }

    #[inline]
    fn try_finish_upgrade(&self, state: &mut usize) -> bool {
        loop {
            if *state & READERS != 0 {
                return false;
            }

            debug_assert!(*state & UPD_BIT != 0);

            match self.state.compare_exchange_weak(
                *state,
                (*state & PARK_BIT) | EXC_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => *state = x,
            }
        }
    }

    /// Release by clearing `clear` (and `PARK_BIT`), then wake everyone who parked
    #[inline]
    fn release(&self, clear: usize) {
        let state = self.state.fetch_and(!(clear | PARK_BIT), Ordering::Release);
        debug_assert!(state & clear == clear, "Can't unlock an unlocked lock");

        if state & PARK_BIT != 0 {
            self.unpark_all();
        }
    }

    #[cold]
    fn unpark_all(&self) {
        let key = self as *const _ as usize;

        unsafe {
            parking_lot_core::unpark_all(key, TOKEN_NORMAL);
        }
    }

    #[cold]
    #[inline(never)]
    fn lock_slow(
        &self,
        park_token: ParkToken,
        mut try_lock: impl FnMut(&mut usize) -> bool,
        blocked: impl Fn(usize) -> bool,
    ) {
        let mut wait = SpinWait::new();
        let mut state = self.state.load(Ordering::Relaxed);

        loop {
            if try_lock(&mut state) {
                return;
            }

            // If there are no parked threads, try spinning a few times.
            if state & PARK_BIT == 0 && wait.spin() {
                state = self.state.load(Ordering::Relaxed);
                continue;
            }

            // Set the park bit
            if state & PARK_BIT == 0 {
                if let Err(x) = self.state.compare_exchange_weak(
                    state,
                    state | PARK_BIT,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    state = x;
                    continue;
                }
            }

            // Park our thread until we are woken up by an unlock
            let addr = self as *const _ as usize;
            let validate = || {
                let state = self.state.load(Ordering::Relaxed);
                state & PARK_BIT != 0 && blocked(state)
            };
            let before_sleep = || {};
            let timed_out = |_, _| {};

            // SAFETY:
            // * `addr` is an address we control.
            // * `validate`/`timed_out` does not panic or call into any function of `parking_lot`.
            // * `before_sleep` does not call `park`, nor does it panic.
            let park_result = unsafe {
                parking_lot_core::park(addr, validate, before_sleep, timed_out, park_token, None)
            };

            match park_result {
                // Woken by an unlock, or the lock changed before we could
                // park: either way, try again
                ParkResult::Unparked(_) | ParkResult::Invalid => (),

                // There is no timeout
                ParkResult::TimedOut => unreachable!(),
            }

            wait.reset();
            state = self.state.load(Ordering::Relaxed);
        }
    }
}

impl Default for AdaptiveLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl crate::Init for AdaptiveLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl CloneUnlocked for AdaptiveLock {
    fn clone_unlocked(&self) -> Self {
        Self::new()
    }
}

unsafe impl RawSrwLock for AdaptiveLock {
    #[inline]
    fn shr_lock(&self) -> bool {
        if self.shr_try_lock() {
            return true;
        }

        self.lock_slow(
            TOKEN_SHARED,
            |state| self.try_shr(state),
            |state| !Self::can_shr(state),
        );
        false
    }

    #[inline]
    fn shr_try_lock(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        self.try_shr(&mut state)
    }

    #[inline]
    unsafe fn shr_unlock(&self) {
        let mut state = self.state.load(Ordering::Relaxed);

        loop {
            debug_assert!(state & READERS != 0, "Can't unlock an unlocked lock");

            let mut next = state - INC;

            // Only an exc lock or an upgrade waits for readers to drain
            let wake = next & READERS == 0 && state & PARK_BIT != 0;
            if wake {
                next &= !PARK_BIT;
            }

            match self.state.compare_exchange_weak(
                state,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if wake {
                        self.unpark_all();
                    }
                    return;
                }
                Err(x) => state = x,
            }
        }
    }

    #[inline]
    fn upd_lock(&self) -> bool {
        if self.upd_try_lock() {
            return true;
        }

        self.lock_slow(
            TOKEN_UPDATE,
            |state| self.try_bit(state, Self::can_upd, UPD_BIT),
            |state| !Self::can_upd(state),
        );
        false
    }

    #[inline]
    fn upd_try_lock(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        self.try_bit(&mut state, Self::can_upd, UPD_BIT)
    }

    #[inline]
    unsafe fn upd_unlock(&self) {
        self.release(UPD_BIT)
    }

    #[inline]
    fn exc_lock(&self) -> bool {
        if self.exc_try_lock() {
            return true;
        }

        self.lock_slow(
            TOKEN_EXCLUSIVE,
            |state| self.try_bit(state, Self::can_exc, EXC_BIT),
            |state| !Self::can_exc(state),
        );
        false
    }

    #[inline]
    fn exc_try_lock(&self) -> bool {
        self.state
            .compare_exchange(0, EXC_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            || {
                let mut state = self.state.load(Ordering::Relaxed);
                self.try_bit(&mut state, Self::can_exc, EXC_BIT)
            }
    }

    #[inline]
    unsafe fn exc_unlock(&self) {
        self.release(EXC_BIT)
    }

    #[inline]
    unsafe fn upgrade(&self) -> bool {
        if self.try_upgrade() {
            return true;
        }

        // Hold off new readers while the current ones drain
        let state = self.state.fetch_or(UPGRADING_BIT, Ordering::Relaxed);
        debug_assert!(state & UPD_BIT != 0, "Can't upgrade without an upd lock");

        self.lock_slow(
            TOKEN_EXCLUSIVE,
            |state| self.try_finish_upgrade(state),
            |state| state & READERS != 0,
        );
        false
    }

    #[inline]
    unsafe fn try_upgrade(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        debug_assert!(state & UPD_BIT != 0, "Can't upgrade without an upd lock");
        self.try_finish_upgrade(&mut state)
    }

    #[inline]
    fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Relaxed) & (PARK_BIT | UPGRADING_BIT) != 0
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }
}
