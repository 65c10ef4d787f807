//! Bus message envelope.
//!
//! A [`Message`] is an owned, immutable projection of one native bus
//! message. The dispatcher builds it while the native message is borrowed,
//! so the envelope never holds an engine resource and there is nothing for
//! the consumer to release.

use crate::engine::NativeMessage;
use std::fmt;

/// Classification of a bus message.
///
/// Discriminants follow the engine's message-type bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Unknown,
    Eos,
    Error,
    Warning,
    Info,
    Tag,
    Buffering,
    StateChanged,
    /// Wildcard matching every type
    Any,
}

impl MessageType {
    /// Engine bit value for this type
    pub fn bits(self) -> u32 {
        match self {
            MessageType::Unknown => 0,
            MessageType::Eos => 1,
            MessageType::Error => 1 << 1,
            MessageType::Warning => 1 << 2,
            MessageType::Info => 1 << 3,
            MessageType::Tag => 1 << 4,
            MessageType::Buffering => 1 << 5,
            MessageType::StateChanged => 1 << 6,
            MessageType::Any => u32::MAX,
        }
    }

    /// Map an engine bit value back to a type. Values outside the
    /// enumeration classify as [`MessageType::Unknown`].
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => MessageType::Eos,
            2 => MessageType::Error,
            4 => MessageType::Warning,
            8 => MessageType::Info,
            16 => MessageType::Tag,
            32 => MessageType::Buffering,
            64 => MessageType::StateChanged,
            u32::MAX => MessageType::Any,
            _ => MessageType::Unknown,
        }
    }

    /// Engine name of the type
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Unknown => "unknown",
            MessageType::Eos => "eos",
            MessageType::Error => "error",
            MessageType::Warning => "warning",
            MessageType::Info => "info",
            MessageType::Tag => "tag",
            MessageType::Buffering => "buffering",
            MessageType::StateChanged => "state-changed",
            MessageType::Any => "any",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One bus message delivered to a pipeline subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MessageType,
    timestamp: u64,
    type_name: String,
    source: Option<String>,
    detail: Option<String>,
}

impl Message {
    /// Build an envelope from a borrowed native message.
    pub fn from_native(native: &dyn NativeMessage) -> Self {
        Self {
            msg_type: native.message_type(),
            timestamp: native.timestamp(),
            type_name: native.type_name(),
            source: native.source_name(),
            detail: native.detail(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    /// Engine-defined timestamp (nanoseconds for GStreamer)
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Name of the object that posted the message, when known
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Human-readable payload (error text, state transition, ...)
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.msg_type == MessageType::Error
    }

    pub fn is_eos(&self) -> bool {
        self.msg_type == MessageType::Eos
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.type_name)?;
        if let Some(source) = &self.source {
            write!(f, " from {}", source)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}
