mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{EngineSettings, HubSettings, LogSettings, ServerSettings, Settings};

/// Environment variable prefix, e.g. `CHANHUB_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "CHANHUB";

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands, optional) and `CHANHUB_*` environment variables, then
/// merges it over the default settings.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        hub: HubSettings {
            inbox_capacity: partial
                .hub
                .as_ref()
                .and_then(|h| h.inbox_capacity)
                .unwrap_or(default.hub.inbox_capacity),
            reap_idle_channels: partial
                .hub
                .as_ref()
                .and_then(|h| h.reap_idle_channels)
                .unwrap_or(default.hub.reap_idle_channels),
        },
        engine: EngineSettings {
            connect_attempts: partial
                .engine
                .as_ref()
                .and_then(|e| e.connect_attempts)
                .unwrap_or(default.engine.connect_attempts),
            retry_delay_ms: partial
                .engine
                .as_ref()
                .and_then(|e| e.retry_delay_ms)
                .unwrap_or(default.engine.retry_delay_ms),
            fallback_to_memory: partial
                .engine
                .as_ref()
                .and_then(|e| e.fallback_to_memory)
                .unwrap_or(default.engine.fallback_to_memory),
        },
        driver: partial.driver.unwrap_or(default.driver),
        log: LogSettings {
            level: partial
                .log
                .and_then(|l| l.level)
                .unwrap_or(default.log.level),
        },
    })
}
