//! Simulation time.
//!
//! This module provides [`MonotonicTime`], a monotonic timestamp based on the
//! [TAI] time standard, which stamps the simulation clock at the boundary of
//! the resource models. Within the fluid model itself, quantities that evolve
//! continuously (remaining work, startup latencies, allocation rates) are
//! expressed in `f64` seconds.
//!
//! [TAI]: https://en.wikipedia.org/wiki/International_Atomic_Time

use std::time::Duration;

pub use tai_time::MonotonicTime;

/// Absolute tolerance below which a fluid quantity is considered exhausted.
///
/// Progressive filling and work-remaining updates accumulate floating-point
/// residues; any quantity smaller than this threshold is treated as zero so
/// that completions and bottleneck ties are detected reliably.
pub(crate) const PRECISION: f64 = 1e-9;

/// Decreases a fluid quantity, flushing residues below the precision
/// threshold to zero.
pub(crate) fn drain(quantity: &mut f64, amount: f64) {
    *quantity -= amount;
    if *quantity < PRECISION {
        *quantity = 0.0;
    }
}

/// Converts a duration expressed in `f64` seconds into a `Duration`.
///
/// Non-positive and non-finite values map to a zero duration. Positive values
/// too small to be represented round up to one nanosecond so that a scheduled
/// event, however close, always moves the clock forward.
pub(crate) fn duration_from_secs(secs: f64) -> Duration {
    if !(secs > 0.0) {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs)
        .unwrap_or(Duration::MAX)
        .max(Duration::from_nanos(1))
}
