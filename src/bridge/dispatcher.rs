//! Callback dispatcher.
//!
//! Entry points called by native engine threads, at arbitrary times and on
//! arbitrary threads. Each one takes the registry lock, looks the target up
//! and acts on it inside the same critical section, which makes dispatch
//! and deregistration mutually exclusive.
//!
//! Nothing here returns an error: a callback for an id that is gone is the
//! expected result of teardown racing with in-flight native work, so it is
//! logged and dropped.
//!
//! # Full queues
//!
//! Under [`OverflowPolicy::Block`](crate::config::OverflowPolicy::Block) the
//! native thread stalls until the reader makes room. The lock is released
//! between attempts and every attempt repeats the lookup, so a concurrent
//! `stop()` always gets through and the pending payload is then discarded.

use crate::bridge::id::{ElementId, PipelineId};
use crate::bridge::message::Message;
use crate::bridge::registry::{Counters, Offer, Registry};
use crate::engine::NativeMessage;
use crate::error::BridgeError;
use std::sync::Arc;
use std::thread;

/// Outcome of one locked attempt to deliver a payload
enum Attempt<T> {
    Done,
    Retry(T),
}

/// Reverse channel from native threads into delivery queues.
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A sink produced a buffer.
    ///
    /// The buffer is borrowed from the engine, which keeps ownership and
    /// releases it once this returns, delivered or not.
    pub fn on_sink_buffer(&self, buffer: &[u8], element: ElementId) {
        let mut payload = buffer.to_vec();
        loop {
            match self.try_deliver_buffer(payload, element) {
                Attempt::Done => return,
                Attempt::Retry(back) => {
                    payload = back;
                    thread::sleep(self.registry.full_queue_retry());
                }
            }
        }
    }

    fn try_deliver_buffer(&self, payload: Vec<u8>, element: ElementId) -> Attempt<Vec<u8>> {
        let policy = self.registry.overflow_policy();
        let counters = self.registry.counters();
        let inner = self.registry.lock();

        let Some(slot) = inner.elements.get(&element) else {
            Counters::bump(&counters.stale_discarded);
            tracing::debug!(
                "Discarding buffer of {} bytes: {}",
                payload.len(),
                BridgeError::UnknownId(element.raw())
            );
            return Attempt::Done;
        };
        if slot.terminated {
            tracing::trace!("Discarding buffer for terminated {}", element);
            return Attempt::Done;
        }
        let Some(queue) = slot.buffers.as_ref() else {
            tracing::trace!("Discarding buffer for {} with no reader", element);
            return Attempt::Done;
        };

        match queue.offer(payload, policy) {
            Offer::Delivered => {
                Counters::bump(&counters.buffers_delivered);
                Attempt::Done
            }
            Offer::Evicted => {
                Counters::bump(&counters.buffers_delivered);
                Counters::bump(&counters.dropped);
                tracing::warn!("Buffer queue of {} full, dropped oldest buffer", element);
                Attempt::Done
            }
            Offer::Full(back) => Attempt::Retry(back),
            Offer::Closed => Attempt::Done,
        }
    }

    /// A sink reached end-of-stream: terminate the element and close its
    /// queue, once.
    pub fn on_sink_eos(&self, element: ElementId) {
        let counters = self.registry.counters();
        let mut inner = self.registry.lock();

        match inner.elements.get_mut(&element) {
            Some(slot) => {
                if slot.terminate() {
                    Counters::bump(&counters.queues_closed);
                    tracing::debug!("End of stream on {} ({})", element, slot.name);
                }
            }
            None => {
                Counters::bump(&counters.stale_discarded);
                tracing::debug!(
                    "Discarding end of stream: {}",
                    BridgeError::UnknownId(element.raw())
                );
            }
        }
    }

    /// A pipeline's bus posted a message.
    ///
    /// The native message is only borrowed; the envelope queued for the
    /// reader is an owned copy.
    pub fn on_bus_message(&self, native: &dyn NativeMessage, pipeline: PipelineId) {
        let mut message = Message::from_native(native);
        loop {
            match self.try_deliver_message(message, pipeline) {
                Attempt::Done => return,
                Attempt::Retry(back) => {
                    message = back;
                    thread::sleep(self.registry.full_queue_retry());
                }
            }
        }
    }

    fn try_deliver_message(&self, message: Message, pipeline: PipelineId) -> Attempt<Message> {
        let policy = self.registry.overflow_policy();
        let counters = self.registry.counters();
        let inner = self.registry.lock();

        let Some(slot) = inner.pipelines.get(&pipeline) else {
            Counters::bump(&counters.stale_discarded);
            tracing::debug!(
                "Discarding {} message: {}",
                message.type_name(),
                BridgeError::UnknownId(pipeline.raw())
            );
            return Attempt::Done;
        };
        let Some(queue) = slot.messages.as_ref() else {
            return Attempt::Done;
        };

        match queue.offer(message, policy) {
            Offer::Delivered => {
                Counters::bump(&counters.messages_delivered);
                Attempt::Done
            }
            Offer::Evicted => {
                Counters::bump(&counters.messages_delivered);
                Counters::bump(&counters.dropped);
                tracing::warn!("Message queue of {} full, dropped oldest message", pipeline);
                Attempt::Done
            }
            Offer::Full(back) => Attempt::Retry(back),
            Offer::Closed => Attempt::Done,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::MessageType;
    use crate::config::{BridgeConfig, OverflowPolicy};
    use std::time::Duration;

    struct StateChanged(u64);

    impl NativeMessage for StateChanged {
        fn message_type(&self) -> MessageType {
            MessageType::StateChanged
        }
        fn timestamp(&self) -> u64 {
            self.0
        }
    }

    fn dispatcher_with(config: BridgeConfig) -> Dispatcher {
        Dispatcher::new(Arc::new(Registry::new(&config)))
    }

    #[test]
    fn test_buffers_arrive_in_order() {
        let dispatcher = dispatcher_with(BridgeConfig::default());
        let registry = dispatcher.registry().clone();
        let id = registry.register_element("sink");
        let (rx, _) = registry.ensure_element_queue(id).unwrap();

        dispatcher.on_sink_buffer(b"B1", id);
        dispatcher.on_sink_buffer(b"B2", id);
        dispatcher.on_sink_buffer(b"B3", id);

        assert_eq!(rx.try_recv().unwrap(), b"B1".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"B2".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"B3".to_vec());
        assert_eq!(registry.stats().buffers_delivered, 3);
    }

    #[test]
    fn test_unknown_id_is_discarded() {
        let dispatcher = dispatcher_with(BridgeConfig::default());
        dispatcher.on_sink_buffer(b"late", ElementId(99));
        dispatcher.on_sink_eos(ElementId(99));
        dispatcher.on_bus_message(&StateChanged(1), PipelineId(98));
        assert_eq!(dispatcher.registry().stats().stale_discarded, 3);
    }

    #[test]
    fn test_buffer_without_reader_is_dropped() {
        let dispatcher = dispatcher_with(BridgeConfig::default());
        let id = dispatcher.registry().register_element("sink");
        dispatcher.on_sink_buffer(b"nobody", id);

        let stats = dispatcher.registry().stats();
        assert_eq!(stats.buffers_delivered, 0);
        assert_eq!(stats.stale_discarded, 0);
    }

    #[test]
    fn test_eos_closes_once_and_blocks_later_buffers() {
        let dispatcher = dispatcher_with(BridgeConfig::default());
        let registry = dispatcher.registry().clone();
        let id = registry.register_element("sink");
        let (rx, _) = registry.ensure_element_queue(id).unwrap();

        dispatcher.on_sink_buffer(b"last", id);
        dispatcher.on_sink_eos(id);
        dispatcher.on_sink_eos(id);
        dispatcher.on_sink_buffer(b"after", id);
        registry.deregister_element(id);

        assert_eq!(rx.recv().unwrap(), b"last".to_vec());
        assert!(rx.recv().is_err());
        assert_eq!(registry.stats().queues_closed, 1);
    }

    #[test]
    fn test_eos_without_queue_leaves_element_live() {
        let dispatcher = dispatcher_with(BridgeConfig::default());
        let registry = dispatcher.registry().clone();
        let id = registry.register_element("sink");

        dispatcher.on_sink_eos(id);
        assert_eq!(registry.is_element_terminated(id), Some(false));
        assert_eq!(registry.stats().queues_closed, 0);
    }

    #[test]
    fn test_bus_message_needs_subscription() {
        let dispatcher = dispatcher_with(BridgeConfig::default());
        let registry = dispatcher.registry().clone();
        let id = registry.register_pipeline();

        dispatcher.on_bus_message(&StateChanged(1), id);
        let (rx, _) = registry.ensure_message_queue(id).unwrap();
        dispatcher.on_bus_message(&StateChanged(2), id);

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.timestamp(), 2);
        assert_eq!(msg.type_name(), "state-changed");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let dispatcher = dispatcher_with(BridgeConfig {
            buffer_queue_capacity: 2,
            overflow: OverflowPolicy::DropOldest,
            ..BridgeConfig::default()
        });
        let registry = dispatcher.registry().clone();
        let id = registry.register_element("sink");
        let (rx, _) = registry.ensure_element_queue(id).unwrap();

        for payload in [b"1", b"2", b"3", b"4"] {
            dispatcher.on_sink_buffer(payload, id);
        }

        assert_eq!(rx.try_recv().unwrap(), b"3".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"4".to_vec());
        assert_eq!(registry.stats().dropped, 2);
    }

    #[test]
    fn test_blocked_delivery_resumes_when_reader_drains() {
        let dispatcher = dispatcher_with(BridgeConfig {
            buffer_queue_capacity: 1,
            ..BridgeConfig::default()
        });
        let registry = dispatcher.registry().clone();
        let id = registry.register_element("sink");
        let (rx, _) = registry.ensure_element_queue(id).unwrap();

        dispatcher.on_sink_buffer(b"first", id);
        let native = dispatcher.clone();
        let producer = thread::spawn(move || native.on_sink_buffer(b"second", id));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.recv().unwrap(), b"first".to_vec());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            b"second".to_vec()
        );
        producer.join().unwrap();
    }

    #[test]
    fn test_stop_releases_blocked_delivery() {
        let dispatcher = dispatcher_with(BridgeConfig {
            buffer_queue_capacity: 1,
            ..BridgeConfig::default()
        });
        let registry = dispatcher.registry().clone();
        let id = registry.register_element("sink");
        let (rx, _) = registry.ensure_element_queue(id).unwrap();

        dispatcher.on_sink_buffer(b"first", id);
        let native = dispatcher.clone();
        let producer = thread::spawn(move || native.on_sink_buffer(b"never", id));

        thread::sleep(Duration::from_millis(20));
        assert!(registry.deregister_element(id));
        producer.join().unwrap();

        assert_eq!(rx.recv().unwrap(), b"first".to_vec());
        assert!(rx.recv().is_err());
    }
}
