//! Thread identities and the owner of a U or X lock

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The raw encoding of [`Owner::ForIo`]
const FOR_IO: usize = usize::MAX;

/// An identity of a live thread
///
/// A `ThreadId` is never zero and never equal to the encoding that marks a
/// lock as owned on behalf of I/O, so it can share a word with both.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(NonZeroUsize);

impl ThreadId {
    /// Returns `None` for `0` and for the reserved I/O encoding
    #[inline]
    pub const fn new(id: usize) -> Option<Self> {
        if id == FOR_IO {
            return None;
        }

        match NonZeroUsize::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// the raw value of this id
    #[inline]
    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

/// Get the current thread id
///
/// # Safety
///
/// Implementations of this trait must ensure that no two active threads share
/// the same thread ID. However the ID of a thread that has exited can be re-used
/// since that thread is no longer active.
pub unsafe trait ThreadInfo {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self;

    /// The id of the current thread
    fn id(&self) -> ThreadId;
}

/// Gives the current thread's id from a process-wide counter
#[derive(Debug, Default, Clone, Copy)]
pub struct StdThreadInfo;

unsafe impl ThreadInfo for StdThreadInfo {
    const INIT: Self = Self;

    #[inline]
    fn id(&self) -> ThreadId {
        static NEXT: AtomicUsize = AtomicUsize::new(1);

        thread_local! {
            static ID: ThreadId = {
                let id = NEXT.fetch_add(1, Ordering::Relaxed);
                match ThreadId::new(id) {
                    Some(id) => id,
                    None => panic!("thread id space exhausted"),
                }
            };
        }

        ID.with(|id| *id)
    }
}

/// Who holds the U or X mode of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Nobody holds U or X
    None,
    /// A thread holds U or X and may acquire them recursively
    Thread(ThreadId),
    /// U or X was acquired for asynchronous I/O and will be released by
    /// whichever thread completes it
    ForIo,
}

impl Owner {
    #[inline]
    pub(crate) const fn into_raw(self) -> usize {
        match self {
            Owner::None => 0,
            Owner::Thread(id) => id.get(),
            Owner::ForIo => FOR_IO,
        }
    }

    #[inline]
    pub(crate) const fn from_raw(raw: usize) -> Self {
        match raw {
            0 => Owner::None,
            FOR_IO => Owner::ForIo,
            id => match ThreadId::new(id) {
                Some(id) => Owner::Thread(id),
                None => Owner::None,
            },
        }
    }

    /// whether `id` is the owner
    #[inline]
    pub fn is(self, id: ThreadId) -> bool {
        self == Owner::Thread(id)
    }
}

impl Default for Owner {
    fn default() -> Self {
        Owner::None
    }
}
