//! # chanhub
//!
//! `chanhub` is an in-process publish/subscribe hub. Producers publish a
//! payload to one or more named channels; consumers subscribe to a set of
//! channels and read one merged stream of the messages published to them.
//!
//! ## Core Modules
//!
//! - `broker`: the in-memory hub, one actor task per channel, and subscriptions.
//! - `driver`: the backend contract, the driver registry and the process-level engine.
//! - `transport`: a WebSocket gateway streaming subscriptions to remote clients.
//! - `config`: loading settings from files and the environment.
//! - `utils`: the crate error type and logging setup.

pub mod broker;
pub mod config;
pub mod driver;
pub mod transport;
pub mod utils;

pub use broker::{CloseNotify, Hub, HubOptions, MemoryHub, Message, Subscription, SubscriptionId};
pub use driver::{Driver, DriverRegistry, Engine, EngineOptions, HubConfig};
pub use utils::{PubSubError, Result};
