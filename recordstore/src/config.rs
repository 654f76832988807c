//! Tunables for an `Engine`, constructed once at `Engine::open` and shared read-only thereafter.

use std::time::Duration;

/// Engine tunables.
///
/// `Default` matches the values named in the storage layer's design: a 1000-cell lock table, a
/// 60s lock expiry enforced by the deadlock watchdog, a 10s retry interval for blocked lockers, a
/// 1000-record block size for scanning, and `US-ASCII` as the only supported charset.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_lock_cells: usize,
    pub lock_expiry: Duration,
    pub lock_retry_interval: Duration,
    pub find_block_size: u32,
    pub charset: &'static str,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_lock_cells: 1000,
            lock_expiry: Duration::from_secs(60),
            lock_retry_interval: Duration::from_secs(10),
            find_block_size: 1000,
            charset: "US-ASCII",
        }
    }
}

impl EngineConfig {
    /// How often the watchdog wakes up to sweep for expired locks. Derived from `lock_expiry`
    /// rather than separately configured, so shrinking the expiry in tests also shrinks the
    /// sweep's latency.
    pub(crate) fn watchdog_tick(&self) -> Duration {
        let millis = (self.lock_expiry.as_millis() as u64 / 6).max(50);
        Duration::from_millis(millis)
    }
}
