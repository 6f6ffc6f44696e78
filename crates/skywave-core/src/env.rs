//! Environment abstraction for deterministic testing.
//!
//! Decouples engine logic from system resources (time, randomness). The
//! harness substitutes a virtual clock and a seeded RNG; production supplies
//! the system clock and OS entropy.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// - `now()` never goes backwards within one execution context.
/// - `unix_time()` is wall-clock and may jump; it is used only for
///   operator-facing timestamps (`created_ts`, retention cutoffs), never for
///   protocol timing.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The monotonic instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`; the harness uses virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, unix seconds UTC.
    fn unix_time(&self) -> u64;

    /// Sleep for the given duration.
    ///
    /// The only async method in the trait; used by driver code, never by
    /// engine logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, for jitter and nonce derivation.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
