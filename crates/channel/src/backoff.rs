use std::time::Duration;

use {nexus_config::ChannelConfig, nexus_protocol as proto};

/// Reconnect timing. The channel never gives up: after `max_attempts`
/// scheduled retries it waits `cooldown` and starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(proto::RECONNECT_BASE_MS),
            max: Duration::from_millis(proto::RECONNECT_MAX_MS),
            max_attempts: proto::RECONNECT_MAX_ATTEMPTS,
            cooldown: Duration::from_millis(proto::RECONNECT_COOLDOWN_MS),
        }
    }
}

impl From<&ChannelConfig> for ReconnectPolicy {
    fn from(cfg: &ChannelConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.reconnect_base_ms),
            max: Duration::from_millis(cfg.reconnect_max_ms),
            max_attempts: cfg.reconnect_max_attempts,
            cooldown: Duration::from_millis(cfg.reconnect_cooldown_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next retry: `min(base * 2^attempt, max)`, or the
    /// cooldown once the attempts run out (which also resets it).
    pub fn next_delay(&mut self) -> Duration {
        if self.attempts >= self.policy.max_attempts {
            self.attempts = 0;
            return self.policy.cooldown;
        }
        self.attempts += 1;
        let factor = 2u32.saturating_pow(self.attempts);
        self.policy
            .base
            .saturating_mul(factor)
            .min(self.policy.max)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
