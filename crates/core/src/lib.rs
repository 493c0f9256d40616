pub mod config;
pub mod error;
pub mod event;
pub mod message;

pub use error::{EventBusError, Result, ShoalError};
pub use message::{Message, Scope, User, WireDecodeError, WireMessage, WireUser};
