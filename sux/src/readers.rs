//! Debug-only bookkeeping of the threads that hold a lock in shared mode

use std::cell::UnsafeCell;
use std::collections::HashSet;

use crate::srw::{spin::SpinLock, RawSrwLock};
use crate::thread::ThreadId;

/// The set of threads holding a shared lock
///
/// The set is allocated on the first registration and guarded by its own
/// spin lock, so registering readers never contends with the lock being
/// tracked.
pub struct ReaderRegistry {
    lock: SpinLock,
    readers: UnsafeCell<Option<Box<HashSet<ThreadId>>>>,
}

unsafe impl Send for ReaderRegistry {}
unsafe impl Sync for ReaderRegistry {}

impl ReaderRegistry {
    /// Create an empty registry, this does not allocate
    pub const fn new() -> Self {
        Self {
            lock: SpinLock::new(),
            readers: UnsafeCell::new(None),
        }
    }

    #[inline]
    fn with<T>(&self, f: impl FnOnce(&mut Option<Box<HashSet<ThreadId>>>) -> T) -> T {
        self.lock.exc_lock();
        let _locked = Unlock(&self.lock);
        // SAFETY: the exc lock is held until `_locked` is dropped
        f(unsafe { &mut *self.readers.get() })
    }

    /// Add `id` to the shared holders
    ///
    /// # Panics
    ///
    /// If `id` is already registered
    pub fn register(&self, id: ThreadId) {
        let inserted = self.with(|readers| {
            readers
                .get_or_insert_with(Default::default)
                .insert(id)
        });

        assert!(inserted, "{:?} already holds a shared lock", id);
    }

    /// Remove `id` from the shared holders
    ///
    /// # Panics
    ///
    /// If `id` is not registered
    pub fn unregister(&self, id: ThreadId) {
        let removed = self.with(|readers| match readers {
            Some(readers) => readers.remove(&id),
            None => false,
        });

        assert!(removed, "{:?} does not hold a shared lock", id);
    }

    /// whether `id` holds a shared lock
    pub fn contains(&self, id: ThreadId) -> bool {
        self.with(|readers| match readers {
            Some(readers) => readers.contains(&id),
            None => false,
        })
    }

    /// whether no thread holds a shared lock
    pub fn is_empty(&self) -> bool {
        self.with(|readers| readers.as_ref().map_or(true, |readers| readers.is_empty()))
    }

    /// whether the set has been allocated
    pub fn is_allocated(&self) -> bool {
        self.with(|readers| readers.is_some())
    }

    /// Release the allocation
    ///
    /// # Panics
    ///
    /// If some thread still holds a shared lock
    pub fn free(&mut self) {
        if let Some(readers) = self.readers.get_mut().take() {
            assert!(readers.is_empty(), "freeing a lock held by {:?}", readers);
        }
    }
}

/// Releases the registry lock when dropped
struct Unlock<'a>(&'a SpinLock);

impl Drop for Unlock<'_> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.0.exc_unlock() }
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
