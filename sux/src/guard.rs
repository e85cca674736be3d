//! RAII guards for [`SuxLock`]
//!
//! Guards release the mode they represent when dropped. They are not `Send`,
//! because U and X are owned by the thread that acquired them.

use std::marker::PhantomData;

use crate::srw::RawSrwLock;
use crate::thread::ThreadInfo;
use crate::SuxLock;

type NoSend = PhantomData<*const ()>;

/// A shared lock on a [`SuxLock`]
pub struct SharedGuard<'a, L: RawSrwLock, I: ThreadInfo> {
    lock: &'a SuxLock<L, I>,
    _not_send: NoSend,
}

impl<'a, L: RawSrwLock, I: ThreadInfo> SharedGuard<'a, L, I> {
    /// # Safety
    ///
    /// The current thread must hold S on `lock`
    #[inline]
    pub unsafe fn from_raw(lock: &'a SuxLock<L, I>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// the locked lock
    #[inline]
    pub fn lock(&self) -> &'a SuxLock<L, I> {
        self.lock
    }
}

impl<L: RawSrwLock, I: ThreadInfo> Drop for SharedGuard<'_, L, I> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.s_unlock() }
    }
}

/// One level of update lock on a [`SuxLock`]
pub struct UpdateGuard<'a, L: RawSrwLock, I: ThreadInfo> {
    lock: &'a SuxLock<L, I>,
    _not_send: NoSend,
}

impl<'a, L: RawSrwLock, I: ThreadInfo> UpdateGuard<'a, L, I> {
    /// # Safety
    ///
    /// The current thread must own one level of U on `lock` that nothing else
    /// will release
    #[inline]
    pub unsafe fn from_raw(lock: &'a SuxLock<L, I>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// the locked lock
    #[inline]
    pub fn lock(&self) -> &'a SuxLock<L, I> {
        self.lock
    }

    /// Upgrade to an exclusive lock, blocking until all shared locks are released
    ///
    /// # Panics
    ///
    /// If the current thread holds more than this one level of U, or any X
    #[inline]
    #[track_caller]
    pub fn upgrade(self) -> ExclusiveGuard<'a, L, I> {
        let lock = self.lock;
        assert!(
            lock.have_u_not_x() && lock.u_depth() == 1,
            "only a non-recursive update lock can be upgraded"
        );
        std::mem::forget(self);

        unsafe {
            lock.u_x_upgrade();
            ExclusiveGuard::from_raw(lock)
        }
    }
}

impl<L: RawSrwLock, I: ThreadInfo> Drop for UpdateGuard<'_, L, I> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.u_unlock(false) }
    }
}

/// One level of exclusive lock on a [`SuxLock`]
pub struct ExclusiveGuard<'a, L: RawSrwLock, I: ThreadInfo> {
    lock: &'a SuxLock<L, I>,
    _not_send: NoSend,
}

impl<'a, L: RawSrwLock, I: ThreadInfo> ExclusiveGuard<'a, L, I> {
    /// # Safety
    ///
    /// The current thread must own one level of X on `lock` that nothing else
    /// will release
    #[inline]
    pub unsafe fn from_raw(lock: &'a SuxLock<L, I>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// the locked lock
    #[inline]
    pub fn lock(&self) -> &'a SuxLock<L, I> {
        self.lock
    }

    /// Take one more level of X
    #[inline]
    pub fn recurse(&self) -> ExclusiveGuard<'a, L, I> {
        unsafe {
            self.lock.x_lock_recursive();
            ExclusiveGuard::from_raw(self.lock)
        }
    }
}

impl<L: RawSrwLock, I: ThreadInfo> Drop for ExclusiveGuard<'_, L, I> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.x_unlock(false) }
    }
}

#[cfg(test)]
mod tests {
    use crate::srw::{spin::SpinLock, RawSrwLock};

    type SuxLock = crate::SuxLock<SpinLock>;

    #[test]
    fn scoped() {
        let lock = SuxLock::new();

        {
            let _u = lock.update();
            let s = lock.read();
            assert!(lock.have_u_not_x());

            // a reader keeps the owner of U from taking X
            assert!(lock.try_write().is_none());
            assert!(lock.have_u_not_x());
            drop(s);

            let x = lock.try_write().unwrap();
            assert!(lock.have_x());
            assert!(!lock.raw().shr_try_lock());
            drop(x);
            assert!(lock.have_u_not_x());
        }

        assert!(!lock.have_u_or_x());

        {
            let x = lock.write();
            let again = x.recurse();
            assert_eq!(lock.x_depth(), 2);
            drop(x);
            assert!(lock.have_x());
            drop(again);
        }

        assert!(!lock.have_u_or_x());
        assert!(lock.try_read().is_some());
    }

    #[test]
    fn upgrade() {
        let lock = SuxLock::new();

        let u = lock.try_update().unwrap();
        let x = u.upgrade();
        assert!(lock.have_x());
        assert_eq!(lock.u_depth(), 0);
        drop(x);

        assert!(!lock.have_u_or_x());
    }

    #[test]
    #[should_panic(expected = "only a non-recursive update lock can be upgraded")]
    fn upgrade_recursive() {
        let lock = SuxLock::new();

        let _outer = lock.update();
        let inner = lock.update();
        let _x = inner.upgrade();
    }
}
