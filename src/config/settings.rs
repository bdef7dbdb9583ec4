use std::time::Duration;

use serde::Deserialize;

use crate::broker::HubOptions;
use crate::driver::{EngineOptions, HubConfig};

/// Top-level configuration settings for the application.
///
/// Includes settings for the gateway server, the in-memory hub, the engine
/// bootstrap, the driver handed to it, and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub engine: EngineSettings,
    pub driver: HubConfig,
    pub log: LogSettings,
}

/// Configuration settings for the gateway server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// In-memory hub tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    pub inbox_capacity: usize,
    pub reap_idle_channels: bool,
}

/// How the engine connects to its backend.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineSettings {
    pub connect_attempts: u32,
    pub retry_delay_ms: u64,
    pub fallback_to_memory: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub engine: Option<PartialEngineSettings>,
    pub driver: Option<HubConfig>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHubSettings {
    pub inbox_capacity: Option<usize>,
    pub reap_idle_channels: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialEngineSettings {
    pub connect_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub fallback_to_memory: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Settings {
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            inbox_capacity: self.hub.inbox_capacity,
            reap_idle_channels: self.hub.reap_idle_channels,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            connect_attempts: self.engine.connect_attempts,
            retry_delay: Duration::from_millis(self.engine.retry_delay_ms),
            fallback_to_memory: self.engine.fallback_to_memory,
            hub: self.hub_options(),
        }
    }

    /// Address the gateway binds to.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Provides default values for `Settings`.
///
/// No driver is configured by default, so the engine runs in-memory.
impl Default for Settings {
    fn default() -> Self {
        let hub = HubOptions::default();
        let engine = EngineOptions::default();
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 4302,
            },
            hub: HubSettings {
                inbox_capacity: hub.inbox_capacity,
                reap_idle_channels: hub.reap_idle_channels,
            },
            engine: EngineSettings {
                connect_attempts: engine.connect_attempts,
                retry_delay_ms: engine.retry_delay.as_millis() as u64,
                fallback_to_memory: engine.fallback_to_memory,
            },
            driver: HubConfig::default(),
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
