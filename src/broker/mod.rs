//! The `broker` module is the in-memory broadcast engine: the [`MemoryHub`]
//! registry, one actor per named channel, and the [`Subscription`] that
//! merges a consumer's channels into one inbox.

pub(crate) mod channel;
pub mod hub;
pub mod message;
pub mod subscription;

pub use hub::{Hub, HubOptions, MemoryHub};
pub use message::Message;
pub use subscription::{CloseNotify, Subscription, SubscriptionId};
