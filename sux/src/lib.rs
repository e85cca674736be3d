//! A reentrant shared/update/exclusive lock
//!
//! [`SuxLock`](sux_lock::SuxLock) layers ownership tracking on top of a
//! non-recursive S/U/X primitive ([`RawSrwLock`](srw::RawSrwLock)):
//!
//! * *S* (shared) may be held by any number of threads at once, but not
//!   recursively by one thread
//! * *U* (update) is compatible with *S* but excludes other *U* and *X* holders,
//!   and can be upgraded to *X* in place
//! * *X* (exclusive) excludes every other holder
//!
//! The thread that owns *U* or *X* may acquire either of them again without
//! blocking; the two recursion depths are tracked independently. A *U* or *X*
//! lock may also be taken on behalf of asynchronous I/O, in which case the
//! thread that completes the I/O releases it.

/// A constant initial value for a lock
///
/// # Safety
///
/// `INIT` must be a valid, unlocked value of the lock
pub unsafe trait Init {
    #[allow(clippy::declare_interior_mutable_const)]
    /// The initial, unlocked value
    const INIT: Self;
}

mod spin_wait;

pub mod guard;
pub mod instrument;
pub mod srw;
pub mod sux_lock;
pub mod thread;

#[cfg(debug_assertions)]
pub mod readers;

pub use crate::guard::{ExclusiveGuard, SharedGuard, UpdateGuard};
pub use crate::sux_lock::SuxLock;
pub use crate::thread::{Owner, StdThreadInfo, ThreadId, ThreadInfo};

cfg_if::cfg_if! {
    if #[cfg(feature = "adaptive")] {
        /// A lock for buffer pool pages: no instrumentation
        pub type BlockLock = SuxLock<srw::adaptive::AdaptiveLock>;

        /// A lock for index metadata, reporting to the instrument `R`
        pub type IndexLock<R = instrument::NoInstrument> =
            SuxLock<instrument::Instrumented<srw::adaptive::AdaptiveLock, R>>;
    } else {
        /// A lock for buffer pool pages: no instrumentation
        pub type BlockLock = SuxLock<srw::spin::SpinLock>;

        /// A lock for index metadata, reporting to the instrument `R`
        pub type IndexLock<R = instrument::NoInstrument> =
            SuxLock<instrument::Instrumented<srw::spin::SpinLock, R>>;
    }
}
