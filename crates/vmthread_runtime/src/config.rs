//! Runtime configuration and timeout conversion.

use std::time::Duration;

use crate::error::{ThreadError, ThreadResult};
use crate::native::NATIVE_TIMEOUT_MAX;

/// Largest nanosecond remainder accepted alongside a millisecond timeout.
pub const MAX_NANOS: u32 = 999_999;

/// Host limits and defaults used by the lifecycle controller.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Longest duration a single native join or sleep call accepts.
    pub native_timeout_max: Duration,

    /// Rounding unit for join and sleep remainders.
    pub join_tick: Duration,

    /// Rounding unit for monitor wait remainders.
    pub wait_tick: Duration,

    /// Millisecond timeouts above this are treated as "wait indefinitely".
    pub indefinite_wait_ms: u64,

    /// Stack size for new threads when the caller passes none.
    pub default_stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            native_timeout_max: NATIVE_TIMEOUT_MAX,
            join_tick: Duration::from_millis(1),
            wait_tick: Duration::from_nanos(100),
            indefinite_wait_ms: 922_337_203_685_476,
            default_stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Set the per-call native timeout bound, clamped to what the host
    /// layer accepts.
    pub fn with_native_timeout_max(mut self, max: Duration) -> Self {
        self.native_timeout_max = max.clamp(Duration::from_millis(1), NATIVE_TIMEOUT_MAX);
        self
    }

    /// Set the default stack size for spawned threads.
    pub fn with_default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = Some(size);
        self
    }

    /// Set the monitor wait rounding unit.
    pub fn with_wait_tick(mut self, tick: Duration) -> Self {
        self.wait_tick = tick;
        self
    }

    /// Convert a `(ms, ns)` pair into a host timeout.
    ///
    /// `None` means wait indefinitely. A non-zero `ns` is rounded up to a
    /// whole `tick` so that tiny timeouts never collapse to zero.
    pub fn timeout(&self, ms: u64, ns: u32, tick: Duration) -> ThreadResult<Option<Duration>> {
        if ns > MAX_NANOS {
            return Err(ThreadError::IllegalArgument(format!(
                "nanosecond timeout value out of range: {}",
                ns
            )));
        }
        if (ms == 0 && ns == 0) || ms > self.indefinite_wait_ms {
            return Ok(None);
        }

        let base = Duration::from_millis(ms);
        if ns == 0 {
            return Ok(Some(base));
        }

        let tick_ns = tick.as_nanos().max(1);
        let rounded = (ns as u128).div_ceil(tick_ns) * tick_ns;
        Ok(Some(base + Duration::from_nanos(rounded as u64)))
    }

    /// Timeout for join and sleep.
    pub fn join_timeout(&self, ms: u64, ns: u32) -> ThreadResult<Option<Duration>> {
        self.timeout(ms, ns, self.join_tick)
    }

    /// Timeout for monitor wait.
    pub fn wait_timeout(&self, ms: u64, ns: u32) -> ThreadResult<Option<Duration>> {
        self.timeout(ms, ns, self.wait_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_indefinite() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.join_timeout(0, 0).unwrap(), None);
    }

    #[test]
    fn huge_timeout_means_indefinite() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.wait_timeout(u64::MAX, 0).unwrap(), None);
    }

    #[test]
    fn nanos_round_up_to_tick() {
        let cfg = RuntimeConfig::default();
        assert_eq!(
            cfg.join_timeout(0, 1).unwrap(),
            Some(Duration::from_millis(1))
        );
        assert_eq!(
            cfg.wait_timeout(2, 1).unwrap(),
            Some(Duration::from_millis(2) + Duration::from_nanos(100))
        );
        assert_eq!(
            cfg.wait_timeout(0, 200).unwrap(),
            Some(Duration::from_nanos(200))
        );
    }

    #[test]
    fn out_of_range_nanos_rejected() {
        let cfg = RuntimeConfig::default();
        assert!(matches!(
            cfg.join_timeout(10, 1_000_000),
            Err(ThreadError::IllegalArgument(_))
        ));
    }

    #[test]
    fn native_bound_is_clamped() {
        let cfg = RuntimeConfig::default().with_native_timeout_max(Duration::ZERO);
        assert_eq!(cfg.native_timeout_max, Duration::from_millis(1));
        let cfg = RuntimeConfig::default().with_native_timeout_max(Duration::MAX);
        assert_eq!(cfg.native_timeout_max, NATIVE_TIMEOUT_MAX);
    }
}
