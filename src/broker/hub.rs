//! Hub
//!
//! The hub is the registry of named channels and the entry point for
//! publish/subscribe. It owns the name → channel actor mapping behind one
//! mutex; resolving a name, creating its actor and queueing the request all
//! happen inside that single critical section. Message fan-out itself never
//! runs under the lock: the lock only covers non-blocking mailbox sends.
//!
//! Channels are created lazily on first publish or subscribe. With idle
//! reaping enabled (the default) a channel that has no subscribers and no
//! pending work removes itself again, so publishing to a name nobody listens
//! on leaves nothing behind.
//!
//! Channel actors are tokio tasks. A hub built inside a runtime keeps that
//! runtime's handle and can then be driven from any thread; a hub built
//! outside one falls back to the caller's runtime and reports
//! `PubSubError::NoRuntime` when there is none.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::channel::{Channel, ChannelHandle, ChannelId, Command};
use crate::broker::message::Message;
use crate::broker::subscription::{Member, Shared, SubscriberHandle, Subscription};
use crate::utils::{PubSubError, Result};

/// Operations every pub/sub engine provides, in-memory or driver-backed.
pub trait Hub: Send + Sync {
    /// Send `payload` to every named channel. Fire-and-forget; an empty
    /// `channels` list is a no-op.
    fn publish(&self, channels: &[&str], payload: Value);

    /// Open one subscription across every named channel.
    fn subscribe(&self, channels: &[&str]) -> Result<Subscription>;

    /// Close every channel and every subscription attached to them.
    fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Capacity of each subscription's inbox. Deliveries beyond it are dropped.
    pub inbox_capacity: usize,
    /// Let channels with no subscribers and no pending work remove themselves.
    pub reap_idle_channels: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            reap_idle_channels: true,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    channels: HashMap<String, ChannelHandle>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct HubInner {
    registry: Mutex<Registry>,
    options: HubOptions,
    runtime: Option<Handle>,
    next_channel_id: AtomicU64,
    next_subscription_id: AtomicU64,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget `name` if it still maps to the actor `id`.
    pub(crate) fn remove(&self, name: &str, id: ChannelId) {
        let mut registry = self.lock();
        if registry.channels.get(name).is_some_and(|h| h.id == id) {
            registry.channels.remove(name);
        }
    }

    /// Forget `name` if it still maps to `id` and `idle()` holds while the
    /// registry lock is taken.
    pub(crate) fn remove_if_idle(
        &self,
        name: &str,
        id: ChannelId,
        idle: impl FnOnce() -> bool,
    ) -> bool {
        let mut registry = self.lock();
        if !registry.channels.get(name).is_some_and(|h| h.id == id) {
            return false;
        }
        if !idle() {
            return false;
        }
        registry.channels.remove(name);
        true
    }
}

/// The in-memory engine.
///
/// Actors run on the tokio runtime that was current when the hub was
/// created, or on the caller's runtime if there was none.
#[derive(Debug, Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new(HubOptions::default())
    }
}

impl MemoryHub {
    pub fn new(options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: Mutex::new(Registry::default()),
                options,
                runtime: Handle::try_current().ok(),
                next_channel_id: AtomicU64::new(1),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Names of the live channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Look up `name`, starting a new actor if there is none or the old one
    /// has stopped. Caller holds the registry lock.
    fn resolve_or_create<'a>(
        &self,
        registry: &'a mut Registry,
        name: &str,
    ) -> Result<&'a ChannelHandle> {
        let handle = match registry.channels.entry(name.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_stopped() => entry.into_mut(),
            Entry::Occupied(mut entry) => {
                entry.insert(self.spawn_channel(name)?);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(self.spawn_channel(name)?),
        };
        Ok(handle)
    }

    fn spawn_channel(&self, name: &str) -> Result<ChannelHandle> {
        let runtime = match &self.inner.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| PubSubError::NoRuntime)?,
        };
        let id = self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed);
        Ok(Channel::spawn(
            &runtime,
            id,
            name,
            Arc::downgrade(&self.inner),
            self.inner.options.reap_idle_channels,
        ))
    }
}

impl Hub for MemoryHub {
    fn publish(&self, channels: &[&str], payload: Value) {
        let Some(first) = channels.first() else {
            return;
        };
        let msg = Message::new(*first, payload);

        let mut registry = self.inner.lock();
        if registry.closed {
            debug!(channels = ?channels, "publish on closed hub ignored");
            return;
        }

        for name in channels {
            match self.resolve_or_create(&mut registry, name) {
                Ok(handle) => {
                    handle.submit(Command::Broadcast(msg.routed(name)));
                }
                Err(e) => {
                    warn!(channel = %name, error = %e, "publish dropped");
                    return;
                }
            }
        }
    }

    fn subscribe(&self, channels: &[&str]) -> Result<Subscription> {
        if channels.is_empty() {
            return Err(PubSubError::InvalidArgument(
                "subscribe requires at least one channel name".to_string(),
            ));
        }

        let mut names: Vec<&str> = Vec::with_capacity(channels.len());
        for name in channels {
            if !names.contains(name) {
                names.push(*name);
            }
        }

        let mut registry = self.inner.lock();
        if registry.closed {
            return Err(PubSubError::Closed);
        }

        let handles: Vec<ChannelHandle> = names
            .iter()
            .map(|name| self.resolve_or_create(&mut registry, name).cloned())
            .collect::<Result<_>>()?;

        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let members = handles
            .iter()
            .map(|h| Member::new(h.name.clone(), h.downgrade()))
            .collect();
        let shared = Arc::new(Shared::new(id, members));
        let (tx, rx) = mpsc::channel(self.inner.options.inbox_capacity.max(1));

        for handle in &handles {
            handle.submit(Command::Subscribe(SubscriberHandle::new(
                shared.clone(),
                tx.clone(),
            )));
        }
        drop(registry);

        debug!(subscription = id, channels = ?names, "subscription opened");
        Ok(Subscription::new(shared, rx))
    }

    fn close(&self) -> Result<()> {
        let handles: Vec<ChannelHandle> = {
            let mut registry = self.inner.lock();
            if registry.closed {
                return Ok(());
            }
            registry.closed = true;
            registry.channels.drain().map(|(_, h)| h).collect()
        };

        for handle in &handles {
            handle.submit(Command::Close);
        }

        info!(channels = handles.len(), "hub closed");
        Ok(())
    }
}

#[cfg(test)]
impl MemoryHub {
    /// Make the actor behind `name` panic while handling its next request.
    pub(crate) fn inject_fault(&self, name: &str) {
        let mut registry = self.inner.lock();
        if let Ok(handle) = self.resolve_or_create(&mut registry, name) {
            handle.submit(Command::Fault);
        }
    }
}
