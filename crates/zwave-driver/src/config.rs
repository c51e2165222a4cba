//! Driver configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the driver. The serial port name is the only required input
/// and is passed to [`crate::Controller::open`] separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Baud rate of the stick's serial interface.
    pub baud_rate: u32,
    /// How long the engine waits for a transaction to complete.
    pub response_timeout_ms: u64,
    /// Inter-byte receive timeout on the serial port.
    pub receive_timeout_ms: u64,
    /// Period of the thread-liveness watchdog.
    pub watchdog_period_ms: u64,
    /// How long a node may sit in one initialization stage before it is
    /// declared dead.
    pub stage_stall_timeout_ms: u64,
    /// Initial capacity of the send queue.
    pub initial_queue_capacity: usize,
    /// Transmissions a message may spend before it is discarded.
    pub max_attempts: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            baud_rate: 115_200,
            response_timeout_ms: 5_000,
            receive_timeout_ms: 1_000,
            watchdog_period_ms: 10_000,
            stage_stall_timeout_ms: 120_000,
            initial_queue_capacity: 128,
            max_attempts: 3,
        }
    }
}

impl DriverConfig {
    /// Transaction completion timeout as a [`Duration`].
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Serial receive timeout as a [`Duration`].
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Watchdog period as a [`Duration`].
    pub fn watchdog_period(&self) -> Duration {
        Duration::from_millis(self.watchdog_period_ms)
    }

    /// Stage stall threshold as a [`Duration`].
    pub fn stage_stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_stall_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.receive_timeout(), Duration::from_secs(1));
        assert_eq!(config.watchdog_period(), Duration::from_secs(10));
        assert_eq!(config.stage_stall_timeout(), Duration::from_secs(120));
        assert_eq!(config.initial_queue_capacity, 128);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: DriverConfig = serde_json::from_str(r#"{"response_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.response_timeout_ms, 250);
        assert_eq!(config.receive_timeout_ms, 1_000);
    }
}
