use shared::{CodecConfig, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Runtime settings for one server instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation updates per second.
    pub tick_rate: u32,
    /// Snapshot broadcasts per second.
    pub sync_rate: u32,
    /// Delay between `room_disbanded` and tearing the sockets down.
    pub shutdown_grace: Duration,
    pub codec: CodecConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tick_rate: 60,
            sync_rate: 60,
            shutdown_grace: Duration::from_secs(3),
            codec: CodecConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sync_rate.max(1) as f64)
    }
}
