//! Publish/subscribe message types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use uuid::Uuid;

/// Bitmask of message types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTypes(u8);

impl MessageTypes {
    pub const NONE: Self = Self(0);
    pub const TEXT: Self = Self(1 << 0);
    pub const DATA: Self = Self(1 << 1);
    pub const ANY: Self = Self(Self::TEXT.0 | Self::DATA.0);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ANY.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MessageTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A single message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Data,
}

impl MessageKind {
    pub const ALL: [MessageKind; 2] = [MessageKind::Text, MessageKind::Data];

    pub const fn mask(self) -> MessageTypes {
        match self {
            Self::Text => MessageTypes::TEXT,
            Self::Data => MessageTypes::DATA,
        }
    }
}

impl From<MessageKind> for MessageTypes {
    fn from(kind: MessageKind) -> Self {
        kind.mask()
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Data(Bytes),
}

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was sent on
    pub channel: String,
    /// Session id of the sender
    pub sender: Uuid,
    /// Whether the message was sent local-only
    pub local_only: bool,
    pub body: MessageBody,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Text(_) => MessageKind::Text,
            MessageBody::Data(_) => MessageKind::Data,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match &self.body {
            MessageBody::Data(data) => Some(data),
            MessageBody::Text(_) => None,
        }
    }
}
