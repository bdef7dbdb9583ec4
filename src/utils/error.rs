//! The `error` module defines the error type shared by the hub, the driver
//! layer and the engine lifecycle.
//!
//! Delivery-time faults inside a channel actor are never surfaced here: they
//! are logged and the actor keeps running. Everything a caller can act on
//! (bad arguments, missing engine, configuration and connection problems) is
//! a variant of [`PubSubError`].

use thiserror::Error;

/// Errors returned by pub/sub operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PubSubError {
    /// Publish/Subscribe attempted before `Engine::init` or after `Engine::cleanup`.
    #[error("no pubsub engine")]
    EngineUnavailable,

    /// The configured driver name is not registered.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Required configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The backend could not be reached after every retry.
    #[error("unable to connect to {driver} after {attempts} attempts: {source}")]
    ConnectFailure {
        driver: String,
        attempts: u32,
        #[source]
        source: Box<PubSubError>,
    },

    /// A caller passed an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The hub has been closed.
    #[error("hub is closed")]
    Closed,

    /// A channel actor had to be started but no tokio runtime is reachable.
    #[error("no tokio runtime to run channels on")]
    NoRuntime,

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PubSubError {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PubSubError::EngineUnavailable => "engine_unavailable",
            PubSubError::UnknownDriver(_) => "unknown_driver",
            PubSubError::InvalidConfiguration(_) => "invalid_configuration",
            PubSubError::ConnectFailure { .. } => "connect_failure",
            PubSubError::InvalidArgument(_) => "invalid_argument",
            PubSubError::Closed => "closed",
            PubSubError::NoRuntime => "no_runtime",
            PubSubError::Encoding(_) => "encoding",
            PubSubError::Config(_) => "config",
            PubSubError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;
