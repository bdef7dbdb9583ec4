//! Engine lifecycle
//!
//! The engine owns the one active hub of a process. `init` selects a driver
//! by configured name, retries a failing backend a bounded number of times
//! with a fixed delay, and falls back to the in-memory hub when no driver is
//! configured (or, if allowed, when the backend stays unreachable).
//! `cleanup` closes the active hub. Publish/Subscribe delegate to the active
//! hub and fail with `EngineUnavailable` outside of that window.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::broker::{Hub, HubOptions, MemoryHub, Subscription};
use crate::driver::{DriverRegistry, HubConfig, MEMORY_DRIVER_NAMES};
use crate::utils::{PubSubError, Result};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How many times `Driver::create` is tried before giving up.
    pub connect_attempts: u32,
    /// Pause between two attempts.
    pub retry_delay: Duration,
    /// Use the in-memory hub when the configured backend stays unreachable.
    pub fallback_to_memory: bool,
    /// Options for any in-memory hub the engine builds itself.
    pub hub: HubOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            connect_attempts: 30,
            retry_delay: Duration::from_secs(1),
            fallback_to_memory: false,
            hub: HubOptions::default(),
        }
    }
}

struct Active {
    driver: String,
    hub: Arc<dyn Hub>,
}

pub struct Engine {
    registry: DriverRegistry,
    options: EngineOptions,
    active: RwLock<Option<Active>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("active_driver", &self.active_driver())
            .finish()
    }
}

impl Engine {
    pub fn new(registry: DriverRegistry, options: EngineOptions) -> Self {
        Self {
            registry,
            options,
            active: RwLock::new(None),
        }
    }

    /// Establish the active hub. Calling `init` while a hub is active is a
    /// no-op.
    pub async fn init(&self, config: &HubConfig) -> Result<()> {
        if self.is_active() {
            debug!("pubsub engine already initialized");
            return Ok(());
        }

        let (driver, hub) = self.make_hub(config).await?;

        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            // Lost a race against a concurrent init.
            hub.close()?;
            return Ok(());
        }
        info!(driver = %driver, "pubsub engine ready");
        *active = Some(Active { driver, hub });
        Ok(())
    }

    /// Close the active hub and forget it. No-op if nothing is active.
    pub fn cleanup(&self) -> Result<()> {
        let taken = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(active) = taken {
            active.hub.close()?;
            info!(driver = %active.driver, "pubsub closed");
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Name of the driver behind the active hub.
    pub fn active_driver(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.driver.clone())
    }

    pub fn publish(&self, channels: &[&str], payload: Value) -> Result<()> {
        let hub = self.hub()?;
        debug!(channels = ?channels, "publish");
        hub.publish(channels, payload);
        Ok(())
    }

    pub fn subscribe(&self, channels: &[&str]) -> Result<Subscription> {
        let hub = self.hub()?;
        let sub = hub.subscribe(channels).inspect_err(|e| {
            warn!(error = %e, channels = ?channels, "pubsub subscribe failed");
        })?;
        debug!(channels = ?channels, subscription = sub.id(), "subscribe");
        Ok(sub)
    }

    fn hub(&self) -> Result<Arc<dyn Hub>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.hub.clone())
            .ok_or(PubSubError::EngineUnavailable)
    }

    async fn make_hub(&self, config: &HubConfig) -> Result<(String, Arc<dyn Hub>)> {
        let Some(name) = config.driver_name() else {
            return Ok((MEMORY_DRIVER_NAMES[0].to_string(), self.memory_hub()));
        };

        let driver = self
            .registry
            .get(&name)
            .ok_or_else(|| PubSubError::UnknownDriver(name.clone()))?;

        let attempts = self.options.connect_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match driver.create(config) {
                Ok(hub) => {
                    info!(driver = %name, attempt, "connected to pubsub backend");
                    return Ok((name, hub));
                }
                Err(e) => {
                    warn!(
                        driver = %name,
                        attempt,
                        attempts,
                        error = %e,
                        "unable to connect to pubsub backend"
                    );
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        let source = last_err.unwrap_or(PubSubError::EngineUnavailable);
        if self.options.fallback_to_memory {
            warn!(driver = %name, error = %source, "falling back to in-memory pubsub");
            return Ok((MEMORY_DRIVER_NAMES[0].to_string(), self.memory_hub()));
        }

        Err(PubSubError::ConnectFailure {
            driver: name,
            attempts,
            source: Box::new(source),
        })
    }

    fn memory_hub(&self) -> Arc<dyn Hub> {
        Arc::new(MemoryHub::new(self.options.hub.clone()))
    }
}
