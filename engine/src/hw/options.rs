use crate::hw::config::{EVENT_CAPACITY_ENV, STOP_TIMEOUT_MS_ENV, env_usize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound on waiting for an in-flight callback during stop and
    /// teardown.
    pub stop_timeout: Duration,
    /// Slots in the real-time event ring.
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(500),
            event_capacity: 256,
        }
    }
}

impl SessionOptions {
    /// Defaults overridden by `RTBRIDGE_STOP_TIMEOUT_MS` and
    /// `RTBRIDGE_EVENT_CAPACITY`.
    pub fn from_env() -> Self {
        Self::default().with_overrides(
            env_usize(STOP_TIMEOUT_MS_ENV),
            env_usize(EVENT_CAPACITY_ENV),
        )
    }

    fn with_overrides(
        mut self,
        stop_timeout_ms: Option<usize>,
        event_capacity: Option<usize>,
    ) -> Self {
        if let Some(ms) = stop_timeout_ms {
            self.stop_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(capacity) = event_capacity.filter(|c| *c > 0) {
            self.event_capacity = capacity;
        }
        self
    }
}
