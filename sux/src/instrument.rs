//! Optional reporting of lock acquisitions
//!
//! An [`Instrumented`] lock wraps any [`RawSrwLock`] and reports to an
//! [`Instrument`] under a category key. Call sites are taken from
//! `#[track_caller]`, so a [`SuxLock`](crate::SuxLock) over an instrumented
//! lock reports where the storage engine acquired it.

use std::panic::Location;

use crate::srw::{CloneUnlocked, RawSrwLock};

/// The mode a lock was acquired or released in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Shared,
    Update,
    Exclusive,
    /// an update lock turned into an exclusive lock
    Upgrade,
}

/// Receives lock events, every method defaults to a no-op
pub trait Instrument {
    /// A lock of category `key` was created
    fn register(&self, _key: &'static str) {}

    /// A lock of category `key` was destroyed
    fn unregister(&self, _key: &'static str) {}

    /// A lock of category `key` was acquired at `location`
    ///
    /// `waited` is true if the acquisition had to block
    fn acquired(
        &self,
        _key: &'static str,
        _mode: Mode,
        _waited: bool,
        _location: &'static Location<'static>,
    ) {
    }

    /// A lock of category `key` was released
    fn released(&self, _key: &'static str, _mode: Mode) {}
}

/// Reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstrument;

impl Instrument for NoInstrument {}

/// Reports every acquisition as a `tracing` event
///
/// Uncontended acquisitions are logged at `TRACE`, contended ones at `DEBUG`.
#[cfg(feature = "tracing")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrument;

#[cfg(feature = "tracing")]
impl Instrument for TracingInstrument {
    fn register(&self, key: &'static str) {
        tracing::trace!(key, "lock registered");
    }

    fn unregister(&self, key: &'static str) {
        tracing::trace!(key, "lock unregistered");
    }

    fn acquired(&self, key: &'static str, mode: Mode, waited: bool, location: &'static Location<'static>) {
        if waited {
            tracing::debug!(
                key,
                mode = ?mode,
                file = location.file(),
                line = location.line(),
                "lock acquired after waiting"
            );
        } else {
            tracing::trace!(
                key,
                mode = ?mode,
                file = location.file(),
                line = location.line(),
                "lock acquired"
            );
        }
    }

    fn released(&self, key: &'static str, mode: Mode) {
        tracing::trace!(key, mode = ?mode, "lock released");
    }
}

/// A [`RawSrwLock`] that reports to an [`Instrument`]
///
/// A lock made by [`Init::INIT`](crate::Init) is never registered, so it is
/// not unregistered either.
pub struct Instrumented<L, R: Instrument = NoInstrument> {
    inner: L,
    key: &'static str,
    instrument: R,
    registered: bool,
}

impl<L, R: Instrument> Instrumented<L, R> {
    /// Wrap `inner`, registering it under `key`
    pub fn new(inner: L, key: &'static str, instrument: R) -> Self {
        instrument.register(key);

        Self {
            inner,
            key,
            instrument,
            registered: true,
        }
    }

    /// the underlying lock
    #[inline]
    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// the category key this lock reports under
    #[inline]
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// the instrument this lock reports to
    #[inline]
    pub fn instrument(&self) -> &R {
        &self.instrument
    }

    #[inline]
    #[track_caller]
    fn report(&self, mode: Mode, no_wait: bool) -> bool {
        self.instrument
            .acquired(self.key, mode, !no_wait, Location::caller());
        no_wait
    }

    #[inline]
    #[track_caller]
    fn report_try(&self, mode: Mode, acquired: bool) -> bool {
        if acquired {
            self.instrument
                .acquired(self.key, mode, false, Location::caller());
        }
        acquired
    }
}

impl<L, R: Instrument> Drop for Instrumented<L, R> {
    fn drop(&mut self) {
        if self.registered {
            self.instrument.unregister(self.key);
        }
    }
}

impl<L: CloneUnlocked, R: Instrument + Clone> CloneUnlocked for Instrumented<L, R> {
    fn clone_unlocked(&self) -> Self {
        Self::new(
            self.inner.clone_unlocked(),
            self.key,
            self.instrument.clone(),
        )
    }
}

unsafe impl<L: crate::Init, R: Instrument + crate::Init> crate::Init for Instrumented<L, R> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        inner: L::INIT,
        key: "unregistered",
        instrument: R::INIT,
        registered: false,
    };
}

unsafe impl crate::Init for NoInstrument {
    const INIT: Self = Self;
}

#[cfg(feature = "tracing")]
unsafe impl crate::Init for TracingInstrument {
    const INIT: Self = Self;
}

unsafe impl<L: RawSrwLock, R: Instrument> RawSrwLock for Instrumented<L, R> {
    #[inline]
    fn shr_lock(&self) -> bool {
        self.report(Mode::Shared, self.inner.shr_lock())
    }

    #[inline]
    fn shr_try_lock(&self) -> bool {
        self.report_try(Mode::Shared, self.inner.shr_try_lock())
    }

    #[inline]
    unsafe fn shr_unlock(&self) {
        self.instrument.released(self.key, Mode::Shared);
        self.inner.shr_unlock()
    }

    #[inline]
    fn upd_lock(&self) -> bool {
        self.report(Mode::Update, self.inner.upd_lock())
    }

    #[inline]
    fn upd_try_lock(&self) -> bool {
        self.report_try(Mode::Update, self.inner.upd_try_lock())
    }

    #[inline]
    unsafe fn upd_unlock(&self) {
        self.instrument.released(self.key, Mode::Update);
        self.inner.upd_unlock()
    }

    #[inline]
    fn exc_lock(&self) -> bool {
        self.report(Mode::Exclusive, self.inner.exc_lock())
    }

    #[inline]
    fn exc_try_lock(&self) -> bool {
        self.report_try(Mode::Exclusive, self.inner.exc_try_lock())
    }

    #[inline]
    unsafe fn exc_unlock(&self) {
        self.instrument.released(self.key, Mode::Exclusive);
        self.inner.exc_unlock()
    }

    #[inline]
    unsafe fn upgrade(&self) -> bool {
        self.report(Mode::Upgrade, self.inner.upgrade())
    }

    #[inline]
    unsafe fn try_upgrade(&self) -> bool {
        self.report_try(Mode::Upgrade, self.inner.try_upgrade())
    }

    #[inline]
    fn is_waiting(&self) -> bool {
        self.inner.is_waiting()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
