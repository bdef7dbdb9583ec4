//! Subscription
//!
//! A `Subscription` is one consumer's interest across a fixed set of
//! channels. Every member channel holds a `SubscriberHandle` that feeds the
//! same bounded inbox, so the consumer reads a single merged stream.
//!
//! Teardown notes:
//! - The subscription only keeps weak references to its member mailboxes and
//!   never touches a channel's subscriber set directly; leaving a channel is
//!   an `Unsubscribe` request processed by that channel's actor.
//! - The closed flag is shared with the member channels. Whichever side
//!   closes first (the consumer, a channel shutting down, or `Drop`) performs
//!   the teardown; later calls are no-ops.
//! - Every `SubscriberHandle` counts as one live membership. When the last
//!   member channel lets go (unsubscribe, channel shutdown, closed inbox) the
//!   subscription closes itself, so leaving every channel ends it like `close`.
//! - Once closed, `recv` yields nothing more even if a message raced into the
//!   inbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::broker::channel::Command;
use crate::broker::message::Message;
use crate::utils::Result;

pub type SubscriptionId = u64;

/// A member channel as seen from the subscription side.
#[derive(Debug)]
pub(crate) struct Member {
    name: Arc<str>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
}

impl Member {
    pub(crate) fn new(name: Arc<str>, mailbox: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self { name, mailbox }
    }

    /// Ask the channel to drop this subscription. A channel that already
    /// stopped has nothing to forget.
    fn leave(&self, id: SubscriptionId) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(Command::Unsubscribe(id));
        }
    }
}

/// State shared between the consumer-facing `Subscription` and every member
/// channel's `SubscriberHandle`.
#[derive(Debug)]
pub(crate) struct Shared {
    id: SubscriptionId,
    members: Vec<Member>,
    live: AtomicUsize,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn new(id: SubscriptionId, members: Vec<Member>) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            live: AtomicUsize::new(members.len()),
            members,
            closed: AtomicBool::new(false),
            close_tx,
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the subscription. Returns `true` only for the call that actually
    /// performed the transition.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        for member in &self.members {
            member.leave(self.id);
        }

        self.close_tx.send_replace(true);
        debug!(subscription = self.id, "subscription closed");
        true
    }
}

/// Handle a channel actor keeps for each of its subscribers.
#[derive(Debug)]
pub(crate) struct SubscriberHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) inbox: mpsc::Sender<Message>,
}

impl SubscriberHandle {
    pub(crate) fn new(shared: Arc<Shared>, inbox: mpsc::Sender<Message>) -> Self {
        Self { shared, inbox }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.shared.id()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if self.shared.live.fetch_sub(1, Ordering::AcqRel) == 1 && self.shared.close() {
            debug!(
                subscription = self.shared.id,
                "released by every channel"
            );
        }
    }
}

/// One-shot closure signal of a [`Subscription`].
///
/// Cloneable, so a task other than the reader can wait for the subscription
/// to finish.
#[derive(Debug, Clone)]
pub struct CloseNotify {
    rx: watch::Receiver<bool>,
}

impl CloseNotify {
    /// Completes once the subscription is fully closed.
    pub async fn notified(mut self) {
        // Sender gone means the subscription state itself is gone.
        let _ = self.rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }
}

/// A consumer's live membership across one or more channels.
#[derive(Debug)]
pub struct Subscription {
    shared: Arc<Shared>,
    inbox: mpsc::Receiver<Message>,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<Shared>, inbox: mpsc::Receiver<Message>) -> Self {
        Self { shared, inbox }
    }

    pub fn id(&self) -> SubscriptionId {
        self.shared.id()
    }

    /// Names of the channels this subscription joined, in subscribe order.
    pub fn channels(&self) -> Vec<&str> {
        self.shared.members.iter().map(|m| &*m.name).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Receive the next message from any member channel.
    ///
    /// Returns `None` once the subscription is closed, or once every member
    /// channel has let go of it.
    pub async fn recv(&mut self) -> Option<Message> {
        let mut closed = self.shared.close_tx.subscribe();
        if *closed.borrow() {
            return None;
        }

        let shared = &self.shared;
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => None,
            msg = self.inbox.recv() => msg.filter(|_| !shared.is_closed()),
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Message> {
        if self.shared.is_closed() {
            return None;
        }
        self.inbox.try_recv().ok()
    }

    /// Turn the subscription into a `Stream` of messages that ends on close.
    pub fn into_stream(self) -> impl Stream<Item = Message> {
        futures::stream::unfold(self, |mut sub| async move {
            let msg = sub.recv().await?;
            Some((msg, sub))
        })
    }

    /// Leave a single member channel. Messages from the other members keep
    /// flowing. Returns `false` if `channel` is not a member.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        match self.shared.members.iter().find(|m| &*m.name == channel) {
            Some(member) => {
                member.leave(self.shared.id);
                debug!(subscription = self.shared.id, channel, "left channel");
                true
            }
            None => false,
        }
    }

    /// Leave every member channel and signal closure. Closing twice is fine.
    pub fn close(&self) -> Result<()> {
        self.shared.close();
        Ok(())
    }

    /// Wait until the subscription is closed.
    pub async fn closed(&self) {
        self.close_notify().notified().await
    }

    pub fn close_notify(&self) -> CloseNotify {
        CloseNotify {
            rx: self.shared.close_tx.subscribe(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}
