//! Server configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration structure for the relay server.
///
/// Contains the timing parameters of the dispatch core and the transport
/// channel used for outbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long a tracked request or broadcast waits for answers, in milliseconds
    pub callback_timeout_ms: u64,

    /// Interval between timeout sweeps, in milliseconds
    pub tick_interval_ms: u64,

    /// Transport channel used for every outbound frame
    pub channel: u8,

    /// Whether the server task starts listening as soon as it is spawned
    pub auto_start: bool,
}

impl ServerConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            callback_timeout_ms: 30_000,
            tick_interval_ms: 50,
            channel: 0,
            auto_start: true,
        }
    }
}
