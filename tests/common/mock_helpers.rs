//! Mock construction helpers

use crossbeam_channel::Receiver;
use media_bridge::engine::NativeMessage;
use media_bridge::MessageType;
use std::time::Duration;

/// Bus message stand-in for dispatching from test threads
pub struct TestMessage {
    pub msg_type: MessageType,
    pub timestamp: u64,
}

impl TestMessage {
    pub fn new(msg_type: MessageType, timestamp: u64) -> Self {
        Self {
            msg_type,
            timestamp,
        }
    }
}

impl NativeMessage for TestMessage {
    fn message_type(&self) -> MessageType {
        self.msg_type
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn source_name(&self) -> Option<String> {
        Some("test".to_string())
    }
}

/// Receive up to `n` items, giving up after `timeout` per item
pub fn recv_n<T>(rx: &Receiver<T>, n: usize, timeout: Duration) -> Vec<T> {
    let mut items = Vec::with_capacity(n);
    while items.len() < n {
        match rx.recv_timeout(timeout) {
            Ok(item) => items.push(item),
            Err(_) => break,
        }
    }
    items
}
