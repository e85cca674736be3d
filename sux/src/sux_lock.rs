//! A reentrant S/U/X lock with I/O ownership transfer

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};

use crate::guard::{ExclusiveGuard, SharedGuard, UpdateGuard};
use crate::srw::{CloneUnlocked, RawSrwLock};
use crate::thread::{Owner, StdThreadInfo, ThreadId, ThreadInfo};

#[cfg(debug_assertions)]
use crate::readers::ReaderRegistry;

/// The deepest a single mode may be recursively acquired
pub const MAX_DEPTH: u16 = u16::MAX - 1;

/// A "fat" lock with shared, update and exclusive modes that allows
/// recursive update and exclusive locks
///
/// The thread that holds U or X is recorded as the owner. The owner may
/// acquire U and X again; each mode keeps its own recursion depth and must be
/// released as many times as it was acquired, in any order. The first X taken
/// on top of U upgrades the underlying lock, later levels do not touch it. The
/// underlying lock is released once both depths reach zero, in the mode it
/// is held in.
///
/// A U or X lock can be acquired *for I/O*: no thread owns it, and the thread
/// that completes the I/O releases it by claiming ownership.
///
/// Misuse (releasing a mode that is not held, acquiring S twice, ...) is
/// caught by debug assertions only. In debug builds the threads holding S are
/// tracked as well, see [`have_s`](SuxLock::have_s).
pub struct SuxLock<L, I = StdThreadInfo> {
    lock: L,
    thread_info: I,
    /// The raw [`Owner`] of U or X, written only by the owner
    owner: AtomicUsize,
    x_depth: AtomicU16,
    u_depth: AtomicU16,
    /// Whether `lock` is held in exc mode, as opposed to upd mode
    exclusive: AtomicBool,
    waits: AtomicU32,
    #[cfg(debug_assertions)]
    readers: ReaderRegistry,
}

impl<L, I> SuxLock<L, I> {
    /// # Safety
    ///
    /// `lock` must not be locked
    #[inline]
    pub const unsafe fn from_raw_parts(lock: L, thread_info: I) -> Self {
        Self {
            lock,
            thread_info,
            owner: AtomicUsize::new(0),
            x_depth: AtomicU16::new(0),
            u_depth: AtomicU16::new(0),
            exclusive: AtomicBool::new(false),
            waits: AtomicU32::new(0),
            #[cfg(debug_assertions)]
            readers: ReaderRegistry::new(),
        }
    }

    /// the underlying lock
    #[inline]
    pub const fn raw(&self) -> &L {
        &self.lock
    }

    /// the underlying thread info
    #[inline]
    pub const fn thread_info(&self) -> &I {
        &self.thread_info
    }

    /// The current owner of U or X
    ///
    /// Only meaningful to the owner itself, other threads may observe a stale value
    #[inline]
    pub fn owner(&self) -> Owner {
        Owner::from_raw(self.owner.load(Ordering::Relaxed))
    }

    /// The recursion depth of X, only meaningful to the owner
    #[inline]
    pub fn x_depth(&self) -> u16 {
        self.x_depth.load(Ordering::Relaxed)
    }

    /// The recursion depth of U, only meaningful to the owner
    #[inline]
    pub fn u_depth(&self) -> u16 {
        self.u_depth.load(Ordering::Relaxed)
    }

    /// The number of blocking waits
    #[inline]
    pub fn waited(&self) -> u32 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Reset the number of blocking waits
    #[inline]
    pub fn reset_waited(&self) {
        self.waits.store(0, Ordering::Relaxed)
    }

    #[inline]
    fn count_wait(&self, no_wait: bool) {
        if !no_wait {
            self.waits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Assign the ownership of a freshly acquired lock
    #[inline]
    fn set_first_owner(&self, owner: Owner) {
        if cfg!(debug_assertions) {
            let prev = self.owner.swap(owner.into_raw(), Ordering::Relaxed);
            debug_assert_eq!(Owner::from_raw(prev), Owner::None);
        } else {
            self.owner.store(owner.into_raw(), Ordering::Relaxed);
        }
    }

    /// Transfer the ownership of a held lock
    #[inline]
    fn set_new_owner(&self, owner: Owner) {
        if cfg!(debug_assertions) {
            let prev = self.owner.swap(owner.into_raw(), Ordering::Relaxed);
            debug_assert_ne!(Owner::from_raw(prev), Owner::None);
        } else {
            self.owner.store(owner.into_raw(), Ordering::Relaxed);
        }
    }

    /// Install the depths of a freshly acquired lock
    #[inline]
    fn set_first_depths(&self, x_depth: u16, u_depth: u16, exclusive: bool) {
        debug_assert_eq!(self.x_depth(), 0);
        debug_assert_eq!(self.u_depth(), 0);
        self.x_depth.store(x_depth, Ordering::Relaxed);
        self.u_depth.store(u_depth, Ordering::Relaxed);
        self.exclusive.store(exclusive, Ordering::Relaxed);
    }

    #[inline]
    fn recurse(depth: &AtomicU16) {
        let current = depth.load(Ordering::Relaxed);
        assert!(current < MAX_DEPTH, "Cannot overflow");
        depth.store(current + 1, Ordering::Relaxed);
    }
}

impl<L: RawSrwLock + crate::Init, I: ThreadInfo> SuxLock<L, I> {
    /// Create a new, unlocked sux lock
    #[inline]
    pub const fn new() -> Self {
        unsafe { Self::from_raw_parts(L::INIT, I::INIT) }
    }
}

impl<L: RawSrwLock + crate::Init, I: ThreadInfo> Default for SuxLock<L, I> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<L: RawSrwLock + crate::Init, I: ThreadInfo> crate::Init for SuxLock<L, I> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<L: RawSrwLock + CloneUnlocked, I: ThreadInfo + Clone> SuxLock<L, I> {
    /// A fresh, unlocked lock configured like this one
    ///
    /// Whether `self` is locked, who owns it and how often it waited is never
    /// carried over. This is what duplicating a structure that embeds a lock
    /// should use.
    pub fn clone_unlocked(&self) -> Self {
        unsafe { Self::from_raw_parts(self.lock.clone_unlocked(), self.thread_info.clone()) }
    }
}

impl<L: RawSrwLock, I: ThreadInfo> SuxLock<L, I> {
    /// Wrap an unlocked `lock`, for locks that need configuration such as
    /// [`Instrumented`](crate::instrument::Instrumented)
    pub fn with_lock(lock: L) -> Self {
        debug_assert!(!lock.is_locked());
        unsafe { Self::from_raw_parts(lock, I::INIT) }
    }

    /// Reset to the unlocked state
    ///
    /// The lock must not be in use
    pub fn init(&mut self) {
        debug_assert!(!self.lock.is_locked());
        debug_assert_eq!(self.owner(), Owner::None);

        *self.owner.get_mut() = Owner::None.into_raw();
        *self.x_depth.get_mut() = 0;
        *self.u_depth.get_mut() = 0;
        *self.exclusive.get_mut() = false;
        *self.waits.get_mut() = 0;

        #[cfg(debug_assertions)]
        self.readers.free();
    }

    /// Release the auxiliary state of a lock that is no longer used
    ///
    /// The lock must be fully released
    pub fn free(&mut self) {
        debug_assert_eq!(self.owner(), Owner::None);
        debug_assert_eq!(self.x_depth(), 0);
        debug_assert_eq!(self.u_depth(), 0);
        debug_assert!(!self.lock.is_locked());

        #[cfg(debug_assertions)]
        self.readers.free();
    }

    #[inline]
    fn current(&self) -> ThreadId {
        self.thread_info.id()
    }

    /// whether the current thread is holding U or X
    #[inline]
    pub fn have_u_or_x(&self) -> bool {
        if !self.owner().is(self.current()) {
            return false;
        }

        debug_assert_ne!((self.x_depth(), self.u_depth()), (0, 0));
        true
    }

    /// whether the current thread is holding U but not X
    #[inline]
    pub fn have_u_not_x(&self) -> bool {
        self.have_u_or_x() && self.x_depth() == 0
    }

    /// whether the current thread is holding X
    #[inline]
    pub fn have_x(&self) -> bool {
        self.have_u_or_x() && self.x_depth() != 0
    }

    /// whether the current thread is holding S
    #[cfg(debug_assertions)]
    pub fn have_s(&self) -> bool {
        self.readers.contains(self.current())
    }

    /// whether the current thread is holding the lock in any mode
    #[cfg(debug_assertions)]
    pub fn have_any(&self) -> bool {
        self.have_u_or_x() || self.have_s()
    }

    /// whether exactly one level of U or X is held
    #[cfg(debug_assertions)]
    pub fn not_recursive(&self) -> bool {
        let depths = (self.x_depth(), self.u_depth());
        debug_assert_ne!(depths, (0, 0));
        depths == (1, 0) || depths == (0, 1)
    }

    #[cfg(debug_assertions)]
    fn s_lock_register(&self) {
        self.readers.register(self.current());
    }

    /// Acquire a shared lock
    ///
    /// The current thread must not hold S or X already
    #[inline]
    #[track_caller]
    pub fn s_lock(&self) {
        debug_assert!(!self.have_x());
        #[cfg(debug_assertions)]
        debug_assert!(!self.have_s());

        self.count_wait(self.lock.shr_lock());

        #[cfg(debug_assertions)]
        self.s_lock_register();
    }

    /// Try to acquire a shared lock
    ///
    /// returns whether the shared lock was acquired
    #[inline]
    #[track_caller]
    pub fn s_lock_try(&self) -> bool {
        let acquired = self.lock.shr_try_lock();

        #[cfg(debug_assertions)]
        {
            if acquired {
                self.s_lock_register();
            }
        }

        acquired
    }

    /// Acquire an update lock, recursively if the current thread owns U or X
    #[inline]
    #[track_caller]
    pub fn u_lock(&self) {
        let id = self.current();

        if self.owner().is(id) {
            self.u_recurse();
        } else {
            self.count_wait(self.lock.upd_lock());
            self.set_first_depths(0, 1, false);
            self.set_first_owner(Owner::Thread(id));
        }
    }

    /// Try to acquire an update lock
    ///
    /// With `for_io` the lock will be released by whichever thread completes
    /// the I/O, and the owner cannot take it recursively.
    ///
    /// returns whether the update lock was acquired
    #[inline]
    #[track_caller]
    pub fn u_lock_try(&self, for_io: bool) -> bool {
        let id = self.current();

        if self.owner().is(id) {
            if for_io {
                return false;
            }

            self.u_recurse();
            return true;
        }

        if self.lock.upd_try_lock() {
            self.set_first_depths(0, 1, false);
            self.set_first_owner(if for_io { Owner::ForIo } else { Owner::Thread(id) });
            true
        } else {
            false
        }
    }

    /// Acquire an exclusive lock, recursively if the current thread owns U or X
    ///
    /// If the current thread owns only U, the underlying lock is upgraded
    /// first, waiting for shared holders to leave.
    ///
    /// With `for_io` the lock will be released by whichever thread completes
    /// the I/O, and the current thread must not already own the lock.
    #[inline]
    #[track_caller]
    pub fn x_lock(&self, for_io: bool) {
        let id = self.current();

        if self.owner().is(id) {
            debug_assert!(!for_io, "a lock owned by this thread cannot be acquired for I/O");
            self.x_lock_owned();
        } else {
            self.count_wait(self.lock.exc_lock());
            self.set_first_depths(1, 0, true);
            self.set_first_owner(if for_io { Owner::ForIo } else { Owner::Thread(id) });
        }
    }

    /// Try to acquire an exclusive lock
    ///
    /// An owner holding only U fails if some thread holds S.
    ///
    /// returns whether the exclusive lock was acquired
    #[inline]
    #[track_caller]
    pub fn x_lock_try(&self) -> bool {
        let id = self.current();

        if self.owner().is(id) {
            // SAFETY: the current thread owns the upd lock
            if !self.is_exclusive() && !unsafe { self.lock.try_upgrade() } {
                return false;
            }

            self.exclusive.store(true, Ordering::Relaxed);
            self.x_recurse();
            return true;
        }

        if self.lock.exc_try_lock() {
            self.set_first_depths(1, 0, true);
            self.set_first_owner(Owner::Thread(id));
            true
        } else {
            false
        }
    }

    #[inline]
    fn u_recurse(&self) {
        debug_assert!(self.owner().is(self.current()));
        Self::recurse(&self.u_depth)
    }

    #[inline]
    fn x_recurse(&self) {
        debug_assert!(self.owner().is(self.current()));
        Self::recurse(&self.x_depth)
    }

    #[inline]
    fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Relaxed)
    }

    /// Take X on a lock the current thread owns, turning the underlying
    /// upd lock into an exc lock if that has not happened yet
    #[inline]
    #[track_caller]
    fn x_lock_owned(&self) {
        if !self.is_exclusive() {
            // SAFETY: the current thread owns the upd lock
            self.count_wait(unsafe { self.lock.upgrade() });
            self.exclusive.store(true, Ordering::Relaxed);
        }

        self.x_recurse()
    }

    /// Acquire one more level of X
    ///
    /// If only U is held, this waits for shared holders like [`x_lock`](Self::x_lock).
    ///
    /// # Safety
    ///
    /// The current thread must own U or X
    #[inline]
    #[track_caller]
    pub unsafe fn x_lock_recursive(&self) {
        self.x_lock_owned()
    }

    /// Upgrade an update lock to an exclusive lock
    ///
    /// Every level of U held becomes a level of X.
    ///
    /// # Safety
    ///
    /// The current thread must hold U and not X
    #[inline]
    #[track_caller]
    pub unsafe fn u_x_upgrade(&self) {
        debug_assert!(self.have_u_not_x());

        // U left over from released X levels is already held in exc mode
        if !self.is_exclusive() {
            self.count_wait(self.lock.upgrade());
            self.exclusive.store(true, Ordering::Relaxed);
        }

        let depth = self.u_depth.swap(0, Ordering::Relaxed);
        self.x_depth.store(depth, Ordering::Relaxed);
    }

    /// Acquire an exclusive lock or upgrade an update lock
    ///
    /// * if the current thread holds X, this takes X recursively
    /// * if the current thread holds only U, this upgrades it
    /// * otherwise this acquires X
    ///
    /// returns whether U was upgraded to X
    #[inline]
    #[track_caller]
    pub fn x_lock_upgraded(&self) -> bool {
        let id = self.current();

        if self.owner().is(id) {
            debug_assert_ne!((self.x_depth(), self.u_depth()), (0, 0));

            if self.x_depth() != 0 {
                debug_assert!(self.is_exclusive());
                self.x_recurse();
                return false;
            }

            // SAFETY: we own U and not X
            unsafe { self.u_x_upgrade() }
            true
        } else {
            self.count_wait(self.lock.exc_lock());
            self.set_first_depths(1, 0, true);
            self.set_first_owner(Owner::Thread(id));
            false
        }
    }

    /// Make the current thread the owner of U or X
    ///
    /// For I/O completion and recovery code that finishes work another
    /// execution context started. The recursion depths are unchanged.
    ///
    /// # Safety
    ///
    /// The lock must be held in U or X, and its previous owner must have handed
    /// it over to the current thread
    #[inline]
    pub unsafe fn claim_ownership(&self) {
        self.set_new_owner(Owner::Thread(self.current()))
    }

    /// Release a shared lock
    ///
    /// # Safety
    ///
    /// The current thread must hold S
    #[inline]
    pub unsafe fn s_unlock(&self) {
        #[cfg(debug_assertions)]
        self.readers.unregister(self.current());

        self.lock.shr_unlock()
    }

    /// Release one level of U
    ///
    /// `claim_ownership` allows releasing a lock that was acquired for I/O
    ///
    /// # Safety
    ///
    /// The current thread must own U, or U must have been acquired for I/O
    /// and handed over to the current thread
    #[inline]
    pub unsafe fn u_unlock(&self, claim_ownership: bool) {
        self.u_or_x_unlock(true, claim_ownership)
    }

    /// Release one level of X
    ///
    /// `claim_ownership` allows releasing a lock that was acquired for I/O
    ///
    /// # Safety
    ///
    /// The current thread must own X, or X must have been acquired for I/O
    /// and handed over to the current thread
    #[inline]
    pub unsafe fn x_unlock(&self, claim_ownership: bool) {
        self.u_or_x_unlock(false, claim_ownership)
    }

    #[inline]
    unsafe fn u_or_x_unlock(&self, update: bool, claim_ownership: bool) {
        let (depth, other) = if update {
            (&self.u_depth, &self.x_depth)
        } else {
            (&self.x_depth, &self.u_depth)
        };

        let current = depth.load(Ordering::Relaxed);
        let other = other.load(Ordering::Relaxed);

        debug_assert!(
            match self.owner() {
                Owner::Thread(id) => id == self.current(),
                Owner::ForIo => claim_ownership && current == 1 && other == 0,
                Owner::None => false,
            },
            "{} lock released by a thread that does not own it",
            if update { "U" } else { "X" }
        );
        debug_assert_ne!(current, 0);

        let current = current - 1;
        depth.store(current, Ordering::Relaxed);

        if current == 0 && other == 0 {
            self.set_new_owner(Owner::None);

            if self.is_exclusive() {
                self.lock.exc_unlock()
            } else {
                self.lock.upd_unlock()
            }
        }
    }

    /// whether any thread is waiting for this lock
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.lock.is_waiting()
    }

    /// Acquire S, released when the guard is dropped
    #[inline]
    #[track_caller]
    pub fn read(&self) -> SharedGuard<'_, L, I> {
        self.s_lock();
        unsafe { SharedGuard::from_raw(self) }
    }

    /// Try to acquire S, released when the guard is dropped
    #[inline]
    #[track_caller]
    pub fn try_read(&self) -> Option<SharedGuard<'_, L, I>> {
        if self.s_lock_try() {
            unsafe { Some(SharedGuard::from_raw(self)) }
        } else {
            None
        }
    }

    /// Acquire U (recursively if owned), released when the guard is dropped
    #[inline]
    #[track_caller]
    pub fn update(&self) -> UpdateGuard<'_, L, I> {
        self.u_lock();
        unsafe { UpdateGuard::from_raw(self) }
    }

    /// Try to acquire U, released when the guard is dropped
    #[inline]
    #[track_caller]
    pub fn try_update(&self) -> Option<UpdateGuard<'_, L, I>> {
        if self.u_lock_try(false) {
            unsafe { Some(UpdateGuard::from_raw(self)) }
        } else {
            None
        }
    }

    /// Acquire X (recursively if owned), released when the guard is dropped
    #[inline]
    #[track_caller]
    pub fn write(&self) -> ExclusiveGuard<'_, L, I> {
        self.x_lock(false);
        unsafe { ExclusiveGuard::from_raw(self) }
    }

    /// Try to acquire X, released when the guard is dropped
    #[inline]
    #[track_caller]
    pub fn try_write(&self) -> Option<ExclusiveGuard<'_, L, I>> {
        if self.x_lock_try() {
            unsafe { Some(ExclusiveGuard::from_raw(self)) }
        } else {
            None
        }
    }
}
