//! Publish/subscribe messaging

pub mod bus;
pub mod message;

pub use bus::MessageBus;
pub use message::{Message, MessageBody, MessageKind, MessageTypes};
