//! The `transport` module is the streaming gateway: a WebSocket server that
//! opens one subscription per connection and pushes every delivered message
//! to the client as a JSON text frame.
//!
//! The channel names come from the request path (`/stream/a,b`). Clients may
//! publish over the same connection, and the subscription is closed when the
//! client goes away.

pub mod message;
pub mod websocket;

pub use websocket::{channels_from_path, serve, start_websocket_server};

#[cfg(test)]
mod tests;
