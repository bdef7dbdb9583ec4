//! Pluggable hub backends.
//!
//! A [`Driver`] builds a [`Hub`] from a [`HubConfig`]. Drivers live in an
//! explicit [`DriverRegistry`] that is constructed at startup and handed to
//! the [`Engine`]; there is no process-global driver table.
//!
//! Only the in-memory driver ships with this crate. Broker-backed drivers
//! (NATS, Redis, NSQ, ...) implement the same trait outside of it.

pub mod encoding;
pub mod engine;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::broker::{Hub, HubOptions, MemoryHub};
use crate::utils::Result;

pub use engine::{Engine, EngineOptions};

/// Driver names the in-memory driver is registered under.
pub const MEMORY_DRIVER_NAMES: [&str; 2] = ["memory", "inproc"];

/// Configuration handed to [`Driver::create`].
///
/// `driver`, `url` and `max_in_flight` are recognized by every backend; any
/// other key lands in `extra` for backend-specific use.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl HubConfig {
    pub fn with_driver(name: impl Into<String>) -> Self {
        Self {
            driver: Some(name.into()),
            ..Self::default()
        }
    }

    /// Normalized driver name: `driver`, falling back to an extra `name` key.
    /// `None` when neither is set to a non-blank value.
    pub fn driver_name(&self) -> Option<String> {
        let raw = match self.driver.as_deref() {
            Some(d) if !d.trim().is_empty() => d.to_string(),
            _ => self.get_string("name", ""),
        };
        let name = raw.trim().to_lowercase();
        (!name.is_empty()).then_some(name)
    }

    /// String value of `key`, or `default` when absent or empty.
    /// Non-string values are rendered as JSON text.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        let known = match key {
            "driver" => self.driver.clone(),
            "url" => self.url.clone(),
            "max_in_flight" => self.max_in_flight.map(|n| n.to_string()),
            _ => None,
        };
        if let Some(v) = known.filter(|v| !v.is_empty()) {
            return v;
        }

        match self.extra.get(key) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) | Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// Integer value of `key`; strings are parsed. Falls back to `default`
    /// when absent or not a number.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        if key == "max_in_flight" {
            if let Some(n) = self.max_in_flight {
                return n as i64;
            }
        }

        match self.extra.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }
}

/// Factory for one backend.
pub trait Driver: Send + Sync {
    fn create(&self, config: &HubConfig) -> Result<Arc<dyn Hub>>;
}

/// The in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    options: HubOptions,
}

impl MemoryDriver {
    pub fn new(options: HubOptions) -> Self {
        Self { options }
    }
}

impl Driver for MemoryDriver {
    fn create(&self, _config: &HubConfig) -> Result<Arc<dyn Hub>> {
        Ok(Arc::new(MemoryHub::new(self.options.clone())))
    }
}

/// Name → driver lookup table.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-memory driver under [`MEMORY_DRIVER_NAMES`].
    pub fn with_defaults(options: HubOptions) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MemoryDriver::new(options)), &MEMORY_DRIVER_NAMES);
        registry
    }

    /// Register `driver` under each of `names` (case-insensitive). A later
    /// registration of the same name replaces the earlier one.
    pub fn register(&mut self, driver: Arc<dyn Driver>, names: &[&str]) {
        for name in names {
            self.drivers.insert(name.trim().to_lowercase(), driver.clone());
        }
        info!(names = ?names, "registered pubsub driver");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&name.trim().to_lowercase()).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }
}
