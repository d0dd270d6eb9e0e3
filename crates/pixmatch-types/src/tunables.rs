//! Service-wide knobs with compile-time defaults.

use std::time::Duration;

/// Knobs governing comparison thresholds, capacities, and timeouts.
///
/// A single value travels with the server state; forked children observe
/// their captured copy.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Side length of every miniature (width and height).
    pub side: u32,
    /// Distances strictly below this count as a match in fullcompare.
    pub maxerr_base: u32,
    /// Quickcompare widens the net by this factor.
    pub quick_multiplier: u32,
    /// Fullcompare worker threads per detected CPU.
    pub thread_multiplier: usize,
    /// Connection table capacity, listeners included.
    pub max_connections: usize,
    /// Per-connection command buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Readiness wait timeout; bounds how stale housekeeping can get.
    pub listen_timeout: Duration,
    /// Client slots idle beyond this are closed.
    pub idle_deadline: Duration,
    /// Emit a fullcompare progress line at most every this many work pulls.
    pub progress_interval: u64,
}

impl Tunables {
    /// Quickcompare threshold: the base threshold widened deliberately.
    #[must_use]
    pub fn maxerr_quick(&self) -> u32 {
        self.maxerr_base.saturating_mul(self.quick_multiplier)
    }

    /// Fullcompare pool size for a machine with `cpu_count` CPUs.
    ///
    /// Comparison is memory-latency bound, so the pool oversubscribes the
    /// CPUs by `thread_multiplier`.
    #[must_use]
    pub fn worker_threads(&self, cpu_count: usize) -> usize {
        (cpu_count * self.thread_multiplier).max(1)
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            side: 16,
            maxerr_base: 35_000,
            quick_multiplier: 10,
            thread_multiplier: 2,
            max_connections: 100,
            buffer_capacity: 2048,
            listen_timeout: Duration::from_secs(60),
            idle_deadline: Duration::from_secs(60),
            progress_interval: 5000,
        }
    }
}
