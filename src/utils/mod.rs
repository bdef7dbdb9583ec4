//! The `utils` module provides the error type and logging setup shared across
//! the crate.

pub mod error;
pub mod logging;

pub use error::{PubSubError, Result};
