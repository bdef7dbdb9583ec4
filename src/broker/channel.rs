//! Channel actor
//!
//! Each named channel is owned by one actor task. The actor is the only code
//! that reads or writes the channel's subscriber set; everything else talks to
//! it by pushing a [`Command`] into its mailbox. Commands are handled one at a
//! time in arrival order, which gives per-channel FIFO delivery.
//!
//! Delivery into subscriber inboxes never blocks: inboxes are bounded and a
//! full inbox drops the message for that subscriber only.
//!
//! Lifecycle: `Running` until a `Close` arrives (or the hub goes away), then
//! `ShuttingDown` while every subscriber is closed, then `Stopped`. A stopped
//! actor drops its mailbox, so later requests are rejected at send time.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TrySendError};
use tracing::{debug, error, warn};

use crate::broker::hub::HubInner;
use crate::broker::message::Message;
use crate::broker::subscription::{SubscriberHandle, SubscriptionId};

pub(crate) type ChannelId = u64;

/// Requests processed by a channel actor.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe(SubscriberHandle),
    Unsubscribe(SubscriptionId),
    Broadcast(Message),
    Close,
    #[cfg(test)]
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Running,
    ShuttingDown,
    Stopped,
}

/// The hub's strong reference to a running channel actor.
#[derive(Debug, Clone)]
pub(crate) struct ChannelHandle {
    pub(crate) id: ChannelId,
    pub(crate) name: Arc<str>,
    mailbox: UnboundedSender<Command>,
}

impl ChannelHandle {
    /// Queue a request. Returns `false` if the actor has already stopped.
    pub(crate) fn submit(&self, cmd: Command) -> bool {
        self.mailbox.send(cmd).is_ok()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub(crate) fn downgrade(&self) -> mpsc::WeakUnboundedSender<Command> {
        self.mailbox.downgrade()
    }
}

pub(crate) struct Channel {
    id: ChannelId,
    name: Arc<str>,
    hub: Weak<HubInner>,
    subscribers: BTreeMap<SubscriptionId, SubscriberHandle>,
    state: ChannelState,
    reap_idle: bool,
}

impl Channel {
    /// Start the actor task for `name` on `runtime` and hand back its mailbox.
    pub(crate) fn spawn(
        runtime: &Handle,
        id: ChannelId,
        name: &str,
        hub: Weak<HubInner>,
        reap_idle: bool,
    ) -> ChannelHandle {
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = Channel {
            id,
            name: name.clone(),
            hub,
            subscribers: BTreeMap::new(),
            state: ChannelState::Running,
            reap_idle,
        };
        runtime.spawn(actor.run(rx));

        debug!(channel = %name, id, "channel started");
        ChannelHandle {
            id,
            name,
            mailbox: tx,
        }
    }

    async fn run(mut self, mut mailbox: UnboundedReceiver<Command>) {
        while let Some(cmd) = mailbox.recv().await {
            if let Err(fault) = panic::catch_unwind(AssertUnwindSafe(|| self.handle(cmd))) {
                error!(
                    channel = %self.name,
                    fault = %panic_message(fault.as_ref()),
                    "delivery fault; event dropped"
                );
            }

            if self.state != ChannelState::Running {
                break;
            }

            if self.reap_idle && self.subscribers.is_empty() && self.try_reap(&mailbox) {
                break;
            }
        }

        // Every sender is gone: the hub was dropped without being closed.
        if self.state == ChannelState::Running && !self.subscribers.is_empty() {
            self.shutdown();
        }

        self.state = ChannelState::Stopped;
        debug!(channel = %self.name, id = self.id, "channel stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe(sub) => {
                if sub.shared.is_closed() {
                    return;
                }
                debug!(channel = %self.name, subscription = sub.id(), "subscribed");
                self.subscribers.insert(sub.id(), sub);
            }
            Command::Unsubscribe(id) => {
                // Dropping the handle releases this channel's inbox sender.
                if self.subscribers.remove(&id).is_some() {
                    debug!(channel = %self.name, subscription = id, "unsubscribed");
                }
            }
            Command::Broadcast(msg) => self.broadcast(msg),
            Command::Close => self.shutdown(),
            #[cfg(test)]
            Command::Fault => panic!("injected fault"),
        }
    }

    fn broadcast(&mut self, msg: Message) {
        let mut gone = Vec::new();

        for (id, sub) in &self.subscribers {
            if sub.shared.is_closed() {
                gone.push(*id);
                continue;
            }
            match sub.inbox.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        channel = %self.name,
                        subscription = id,
                        message_id = %msg.message_id,
                        "subscriber inbox full; message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        for id in gone {
            self.subscribers.remove(&id);
        }
    }

    fn shutdown(&mut self) {
        self.state = ChannelState::ShuttingDown;

        let subscribers = std::mem::take(&mut self.subscribers);
        debug!(
            channel = %self.name,
            subscribers = subscribers.len(),
            "channel shutting down"
        );
        for sub in subscribers.values() {
            sub.shared.close();
        }

        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.name, self.id);
        }
        self.state = ChannelState::Stopped;
    }

    /// Remove this idle channel from the registry and stop.
    ///
    /// Subscribe and broadcast requests reach the mailbox only while the
    /// registry lock is held, so an empty mailbox observed under that lock
    /// cannot gain work. A late `Unsubscribe` has nothing left to remove.
    fn try_reap(&mut self, mailbox: &UnboundedReceiver<Command>) -> bool {
        let Some(hub) = self.hub.upgrade() else {
            return false;
        };
        if !hub.remove_if_idle(&self.name, self.id, || mailbox.is_empty()) {
            return false;
        }

        debug!(channel = %self.name, id = self.id, "idle channel reaped");
        self.state = ChannelState::Stopped;
        true
    }
}

fn panic_message(fault: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = fault.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = fault.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
