//! Exponential backoff for the spinning phase of a lock acquisition

#[cfg(feature = "parking_lot_core")]
pub use parking_lot_core::SpinWait;

#[cfg(not(feature = "parking_lot_core"))]
pub use fallback::SpinWait;

#[cfg(not(feature = "parking_lot_core"))]
mod fallback {
    /// Rounds that busy-wait before yielding to the OS
    const BUSY_ROUNDS: u32 = 3;

    /// Rounds after which `spin` reports that parking would be better
    const MAX_ROUNDS: u32 = 10;

    /// Backoff with the same interface as `parking_lot_core::SpinWait`
    pub struct SpinWait {
        round: u32,
    }

    impl SpinWait {
        #[inline]
        pub fn new() -> Self {
            Self { round: 0 }
        }

        /// Back off once, doubling the busy-wait each round and yielding the
        /// thread once that gets long
        ///
        /// returns false once `MAX_ROUNDS` is reached, but keeps yielding if
        /// called again
        #[inline]
        pub fn spin(&mut self) -> bool {
            if self.round < MAX_ROUNDS {
                self.round += 1;
            }

            if self.round <= BUSY_ROUNDS {
                (0..1u32 << self.round).for_each(|_| std::hint::spin_loop());
            } else {
                std::thread::yield_now();
            }

            self.round < MAX_ROUNDS
        }

        #[inline]
        pub fn reset(&mut self) {
            self.round = 0;
        }
    }
}
