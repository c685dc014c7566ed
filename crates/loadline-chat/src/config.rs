use std::time::Duration;

pub const DEFAULT_FETCH_LIMIT: u32 = 200;

/// Exponential backoff for re-opening a dropped realtime subscription.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before the bridge gives up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: doubles each time, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Newest messages loaded when a conversation opens.
    pub fetch_limit: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
