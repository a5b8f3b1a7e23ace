//! Connection manager settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TCP port.
pub const DEFAULT_TCP_PORT: u16 = 54555;
/// Default reserved datagram port.
pub const DEFAULT_UDP_PORT: u16 = 54777;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub host: String,
    /// TCP port (0 picks a free port)
    pub tcp_port: u16,
    /// Reserved for unreliable position traffic; not bound
    pub udp_port: u16,
    /// Object broadcast ticks per second
    pub tick_rate: u32,
    /// Chunks sent around the player on login (square radius)
    pub login_chunk_radius: u32,
    /// Seconds between autosaves (0 disables)
    pub autosave_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            tick_rate: 20,
            login_chunk_radius: 2,
            autosave_interval: 300,
        }
    }
}

impl ServerConfig {
    /// Time between ticks.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    /// Time between autosaves, if enabled.
    #[must_use]
    pub fn autosave_period(&self) -> Option<Duration> {
        (self.autosave_interval > 0).then(|| Duration::from_secs(self.autosave_interval))
    }
}
