//! Non-recursive S/U/X locks that [`SuxLock`](crate::SuxLock) is built on

#[cfg(feature = "adaptive")]
pub mod adaptive;
pub mod spin;

/// A slim, non-recursive lock with shared, update and exclusive modes
///
/// * *shr* locks may be held by any number of threads
/// * an *upd* lock is compatible with *shr* locks, but not with another *upd*
///   or an *exc* lock
/// * an *exc* lock is not compatible with any other lock
///
/// The blocking acquisitions report whether they got the lock without waiting,
/// so callers can count contention.
///
/// # Safety
///
/// * a *shr* lock must never be held at the same time as an *exc* lock
/// * at most one *upd* or *exc* lock may be held at any time
/// * `upgrade` must turn the held *upd* lock into an *exc* lock without any
///   other thread acquiring *upd* or *exc* in between
pub unsafe trait RawSrwLock {
    /// shr locks the lock
    ///
    /// blocks until the lock is acquired, returns false if it had to wait
    #[track_caller]
    fn shr_lock(&self) -> bool;

    /// attempts to shr lock the lock
    ///
    /// returns true on success
    #[track_caller]
    fn shr_try_lock(&self) -> bool;

    /// # Safety
    ///
    /// The caller must hold a shr lock
    unsafe fn shr_unlock(&self);

    /// upd locks the lock
    ///
    /// blocks until the lock is acquired, returns false if it had to wait
    #[track_caller]
    fn upd_lock(&self) -> bool;

    /// attempts to upd lock the lock
    ///
    /// returns true on success
    #[track_caller]
    fn upd_try_lock(&self) -> bool;

    /// # Safety
    ///
    /// The upd lock must be held, either by the caller or by an execution
    /// context that handed it over to the caller
    unsafe fn upd_unlock(&self);

    /// exc locks the lock
    ///
    /// blocks until the lock is acquired, returns false if it had to wait
    #[track_caller]
    fn exc_lock(&self) -> bool;

    /// attempts to exc lock the lock
    ///
    /// returns true on success
    #[track_caller]
    fn exc_try_lock(&self) -> bool;

    /// # Safety
    ///
    /// The exc lock must be held, either by the caller or by an execution
    /// context that handed it over to the caller
    unsafe fn exc_unlock(&self);

    /// Turns the held upd lock into an exc lock
    ///
    /// blocks until all shr locks are released, returns false if it had to wait
    ///
    /// # Safety
    ///
    /// The caller must hold the upd lock
    #[track_caller]
    unsafe fn upgrade(&self) -> bool;

    /// Attempts to turn the held upd lock into an exc lock
    ///
    /// returns true on success, on failure the upd lock is still held
    ///
    /// # Safety
    ///
    /// The caller must hold the upd lock
    #[track_caller]
    unsafe fn try_upgrade(&self) -> bool;

    /// whether some thread is blocked on this lock
    ///
    /// This is only advisory, it may be stale by the time it is returned
    fn is_waiting(&self) -> bool;

    /// whether the lock is held in any mode or has waiters
    fn is_locked(&self) -> bool;
}

/// Produce a fresh, unlocked lock of the same kind
///
/// Locks carry state that has no meaningful copy, so this never copies
/// whether the source is locked. Configuration (such as an instrumentation
/// key) is carried over.
pub trait CloneUnlocked {
    fn clone_unlocked(&self) -> Self;
}
