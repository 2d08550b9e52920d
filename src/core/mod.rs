//! Constants, error types and collaborator traits.

pub mod constants;
mod error;
mod traits;

pub use error::{CoapError, ConfigError};
pub use traits::{ExchangeObserver, MessageLayer, Outbox};
