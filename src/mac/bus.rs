//! Bus abstraction and medium access configuration.

use std::io;
use std::time::Duration;

use crate::codec::MIN_FRAME_LEN;
use crate::core::ConfigError;

/// Default silence required on the line before transmitting.
pub const DEFAULT_MIN_FRAME_SPACING: Duration = Duration::from_millis(200);

/// Default upper bound of the random collision penalty.
pub const DEFAULT_COLLISION_PENALTY_MAX: Duration = Duration::from_millis(400);

/// Default idle gap that flushes a partially assembled frame.
pub const DEFAULT_RECEIVE_IDLE: Duration = Duration::from_millis(120);

/// Default time to wait for the local echo of a transmission.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(120);

/// Default line poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Default maximum accepted frame length.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// A half-duplex serial bus with a driver-enable line.
///
/// Implementations wrap a serial port and the transceiver's DE pin.
/// All calls come from a single task; reads must not block, returning
/// whatever bytes are currently available.
///
/// The receiver stays enabled during transmission, so a node reads its
/// own bytes back. [`MediumAccess`](super::MediumAccess) compares that
/// echo against what it sent to detect collisions.
pub trait BusIo: Send + 'static {
    /// Append all currently available bytes to `buf`, returning how
    /// many were read. Must not block when the line is quiet.
    fn read_available(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;

    /// Write the whole buffer to the line.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Assert or release the transceiver's driver-enable line.
    fn set_transmit_enable(&mut self, enabled: bool) -> io::Result<()>;
}

/// Timing and sizing knobs of the medium access layer.
///
/// The defaults suit a 9600 baud RS485 bus.
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Line silence required before a transmission may start.
    pub min_frame_spacing: Duration,
    /// Upper bound of the random backoff after a collision. The drawn
    /// penalty is always at least one millisecond so two colliding
    /// nodes cannot retry in lockstep.
    pub collision_penalty_max: Duration,
    /// Idle gap after which a partial inbound frame is discarded.
    pub receive_idle: Duration,
    /// How long to wait for the echo of a transmission.
    pub echo_timeout: Duration,
    /// How often the line is polled for new bytes.
    pub poll_interval: Duration,
    /// Longest frame accepted from or sent to the line.
    pub max_frame_len: usize,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            min_frame_spacing: DEFAULT_MIN_FRAME_SPACING,
            collision_penalty_max: DEFAULT_COLLISION_PENALTY_MAX,
            receive_idle: DEFAULT_RECEIVE_IDLE,
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl MacConfig {
    /// Check the invariants the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collision_penalty_max < Duration::from_millis(1) {
            return Err(ConfigError::InvalidTiming {
                field: "collision_penalty_max",
                reason: "must be at least one millisecond".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidTiming {
                field: "poll_interval",
                reason: "must be nonzero".into(),
            });
        }
        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(ConfigError::InvalidTiming {
                field: "max_frame_len",
                reason: format!("must fit a minimal frame of {MIN_FRAME_LEN} bytes"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        MacConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_penalty_rejected() {
        let config = MacConfig { collision_penalty_max: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tiny_max_frame_rejected() {
        let config = MacConfig { max_frame_len: MIN_FRAME_LEN - 1, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
