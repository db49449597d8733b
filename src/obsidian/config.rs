//! Engine timing configuration.

use std::time::Duration;

use crate::core::ConfigError;

/// Default wait for a reply before a retransmission.
pub const DEFAULT_REPLY_MAX_DELAY: Duration = Duration::from_millis(1000);

/// Default number of retransmissions before giving up.
pub const DEFAULT_REPLY_REPEAT_COUNT: u32 = 3;

/// Default interval between join-offer broadcasts.
pub const DEFAULT_JOIN_OFFER_REPEAT: Duration = Duration::from_secs(120);

/// Default join-offer window advertised to peers.
pub const DEFAULT_JOIN_OFFER_WINDOW: Duration = Duration::from_secs(30);

/// Default lower bound of the poll interval.
pub const DEFAULT_NEXT_POLL_MIN: Duration = Duration::from_secs(30);

/// Default upper bound of the poll interval.
pub const DEFAULT_NEXT_POLL_MAX: Duration = Duration::from_secs(300);

/// Default delay before re-polling a peer that did not answer.
pub const DEFAULT_POLL_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Timing parameters of the Obsidian engine.
///
/// The defaults form the RS485 profile; a [`PhysicalLayer`] may hand
/// out a different profile through its
/// [`config`](crate::core::PhysicalLayer::config) hook.
///
/// [`PhysicalLayer`]: crate::core::PhysicalLayer
#[derive(Debug, Clone)]
pub struct ObsidianConfig {
    /// How long to wait for a reply before retransmitting.
    pub reply_max_delay: Duration,
    /// Retransmissions before the timeout callback fires.
    pub reply_repeat_count: u32,
    /// Interval between join-offer broadcasts.
    pub join_offer_repeat: Duration,
    /// Offer window advertised on each join-offer.
    pub join_offer_window: Duration,
    /// Smallest accepted poll interval.
    pub next_poll_min: Duration,
    /// Largest accepted poll interval. A peer silent for twice this
    /// long is marked inactive.
    pub next_poll_max: Duration,
    /// Delay before re-polling a peer whose poll went unanswered.
    pub poll_retry_delay: Duration,
}

impl Default for ObsidianConfig {
    fn default() -> Self {
        Self {
            reply_max_delay: DEFAULT_REPLY_MAX_DELAY,
            reply_repeat_count: DEFAULT_REPLY_REPEAT_COUNT,
            join_offer_repeat: DEFAULT_JOIN_OFFER_REPEAT,
            join_offer_window: DEFAULT_JOIN_OFFER_WINDOW,
            next_poll_min: DEFAULT_NEXT_POLL_MIN,
            next_poll_max: DEFAULT_NEXT_POLL_MAX,
            poll_retry_delay: DEFAULT_POLL_RETRY_DELAY,
        }
    }
}

impl ObsidianConfig {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reply_max_delay.is_zero() {
            return Err(ConfigError::InvalidTiming {
                field: "reply_max_delay",
                reason: "must be nonzero".into(),
            });
        }
        if self.reply_repeat_count == 0 {
            return Err(ConfigError::InvalidTiming {
                field: "reply_repeat_count",
                reason: "at least one retransmission is required".into(),
            });
        }
        if self.next_poll_min > self.next_poll_max {
            return Err(ConfigError::InvalidTiming {
                field: "next_poll_min",
                reason: format!(
                    "lower bound {:?} exceeds upper bound {:?}",
                    self.next_poll_min, self.next_poll_max
                ),
            });
        }
        Ok(())
    }

    /// Clamp a suggested poll interval into the configured bounds.
    pub fn clamp_poll_interval(&self, suggested: Duration) -> Duration {
        suggested.clamp(self.next_poll_min, self.next_poll_max)
    }
}
