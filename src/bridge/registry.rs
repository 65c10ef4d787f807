//! Opaque handle registry.
//!
//! The registry maps ids to the dispatch-side state of every live bridge
//! object: its delivery queue and, for elements, the terminated flag. One
//! mutex guards both tables and the id counter. Registry mutation and every
//! dispatcher lookup-and-enqueue attempt run under that same lock, so no
//! callback can observe an id after its deregistration has returned.
//!
//! Closing a queue means dropping its only [`Sender`]. The sender never
//! leaves the lock, so once closed nothing can be enqueued again and readers
//! see disconnection after draining what is left.

use crate::bridge::id::{ElementId, HandleKind, PipelineId, FIRST_ID_BASE};
use crate::bridge::message::Message;
use crate::config::{BridgeConfig, OverflowPolicy};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of one enqueue attempt.
pub(crate) enum Offer<T> {
    /// Payload is in the queue
    Delivered,
    /// Payload is in the queue after evicting the oldest entry
    Evicted,
    /// Queue is full; the payload is handed back for a later attempt
    Full(T),
    /// Queue was already closed
    Closed,
}

/// Bounded delivery queue owned by a registry slot.
pub(crate) struct DeliveryQueue<T> {
    tx: Option<Sender<T>>,
    rx: Receiver<T>,
}

impl<T> DeliveryQueue<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx: Some(tx), rx }
    }

    fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Drop the sender. Returns true only for the call that actually closed it.
    fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }

    pub(crate) fn offer(&self, item: T, policy: OverflowPolicy) -> Offer<T> {
        let Some(tx) = &self.tx else {
            return Offer::Closed;
        };
        let mut item = item;
        let mut evicted = false;
        loop {
            match tx.try_send(item) {
                Ok(()) if evicted => return Offer::Evicted,
                Ok(()) => return Offer::Delivered,
                Err(TrySendError::Disconnected(_)) => return Offer::Closed,
                Err(TrySendError::Full(back)) => match policy {
                    OverflowPolicy::Block => return Offer::Full(back),
                    OverflowPolicy::DropOldest => {
                        // A reader may empty the queue concurrently; either way
                        // there is room for the retry.
                        let _ = self.rx.try_recv();
                        evicted = true;
                        item = back;
                    }
                },
            }
        }
    }
}

pub(crate) struct PipelineSlot {
    pub(crate) messages: Option<DeliveryQueue<Message>>,
}

pub(crate) struct ElementSlot {
    pub(crate) name: String,
    pub(crate) buffers: Option<DeliveryQueue<Vec<u8>>>,
    pub(crate) terminated: bool,
}

impl ElementSlot {
    /// Set terminated and close the queue, once. Returns true if a queue
    /// was closed by this call.
    pub(crate) fn terminate(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        match self.buffers.as_mut() {
            Some(queue) => {
                self.terminated = true;
                queue.close()
            }
            None => false,
        }
    }
}

/// Tables guarded by the registry lock
pub(crate) struct RegistryInner {
    next_id: u64,
    pub(crate) pipelines: HashMap<PipelineId, PipelineSlot>,
    pub(crate) elements: HashMap<ElementId, ElementSlot>,
}

impl RegistryInner {
    /// The counter is 64-bit so it cannot wrap while the process runs.
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    registered: AtomicU64,
    deregistered: AtomicU64,
    pub(crate) buffers_delivered: AtomicU64,
    pub(crate) messages_delivered: AtomicU64,
    pub(crate) stale_discarded: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) queues_closed: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of registry activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Objects ever registered
    pub registered: u64,
    /// Objects removed by an explicit stop
    pub deregistered: u64,
    /// Buffers enqueued by the dispatcher
    pub buffers_delivered: u64,
    /// Bus messages enqueued by the dispatcher
    pub messages_delivered: u64,
    /// Callbacks for ids that were no longer registered
    pub stale_discarded: u64,
    /// Payloads evicted by [`OverflowPolicy::DropOldest`]
    pub dropped: u64,
    /// Delivery queues closed
    pub queues_closed: u64,
}

/// Id to bridge-object table shared by bridges and the dispatcher
pub struct Registry {
    inner: Mutex<RegistryInner>,
    counters: Counters,
    message_capacity: usize,
    buffer_capacity: usize,
    overflow: OverflowPolicy,
    full_queue_retry: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}

impl Registry {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: FIRST_ID_BASE,
                pipelines: HashMap::new(),
                elements: HashMap::new(),
            }),
            counters: Counters::default(),
            message_capacity: config.message_queue_capacity.max(1),
            buffer_capacity: config.buffer_queue_capacity.max(1),
            overflow: config.overflow,
            full_queue_retry: config.full_queue_retry(),
        }
    }

    /// Acquire the registry lock. Poisoning is ignored: every critical
    /// section leaves the tables consistent before it can panic.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub(crate) fn full_queue_retry(&self) -> Duration {
        self.full_queue_retry
    }

    /// Register a new pipeline and return its id
    pub fn register_pipeline(&self) -> PipelineId {
        let mut inner = self.lock();
        let id = PipelineId(inner.allocate_id());
        inner.pipelines.insert(id, PipelineSlot { messages: None });
        Counters::bump(&self.counters.registered);
        id
    }

    /// Register a new element and return its id
    pub fn register_element(&self, name: &str) -> ElementId {
        let mut inner = self.lock();
        let id = ElementId(inner.allocate_id());
        inner.elements.insert(
            id,
            ElementSlot {
                name: name.to_string(),
                buffers: None,
                terminated: false,
            },
        );
        Counters::bump(&self.counters.registered);
        id
    }

    /// Resolve a raw id against both tables, pipelines first
    pub fn lookup(&self, raw: u64) -> Option<HandleKind> {
        let inner = self.lock();
        if inner.pipelines.contains_key(&PipelineId(raw)) {
            Some(HandleKind::Pipeline(PipelineId(raw)))
        } else if inner.elements.contains_key(&ElementId(raw)) {
            Some(HandleKind::Element(ElementId(raw)))
        } else {
            None
        }
    }

    pub fn contains_pipeline(&self, id: PipelineId) -> bool {
        self.lock().pipelines.contains_key(&id)
    }

    pub fn contains_element(&self, id: ElementId) -> bool {
        self.lock().elements.contains_key(&id)
    }

    /// Name an element was registered under
    pub fn element_name(&self, id: ElementId) -> Option<String> {
        self.lock().elements.get(&id).map(|slot| slot.name.clone())
    }

    /// Terminated flag of a registered element
    pub fn is_element_terminated(&self, id: ElementId) -> Option<bool> {
        self.lock().elements.get(&id).map(|slot| slot.terminated)
    }

    /// Remove a pipeline and close its message queue, if any.
    ///
    /// Returns false when the id was not registered.
    pub fn deregister_pipeline(&self, id: PipelineId) -> bool {
        let mut inner = self.lock();
        let Some(mut slot) = inner.pipelines.remove(&id) else {
            return false;
        };
        if let Some(queue) = slot.messages.as_mut() {
            if queue.close() {
                Counters::bump(&self.counters.queues_closed);
            }
        }
        Counters::bump(&self.counters.deregistered);
        true
    }

    /// Remove an element and, unless end-of-stream already did it, close
    /// its buffer queue.
    ///
    /// Returns false when the id was not registered.
    pub fn deregister_element(&self, id: ElementId) -> bool {
        let mut inner = self.lock();
        let Some(mut slot) = inner.elements.remove(&id) else {
            return false;
        };
        if slot.terminate() {
            Counters::bump(&self.counters.queues_closed);
        }
        Counters::bump(&self.counters.deregistered);
        true
    }

    /// Mark an element terminated and close its queue exactly once.
    ///
    /// Returns true if this call closed the queue.
    pub fn close_element_queue(&self, id: ElementId) -> bool {
        let mut inner = self.lock();
        let closed = inner
            .elements
            .get_mut(&id)
            .map(ElementSlot::terminate)
            .unwrap_or(false);
        if closed {
            Counters::bump(&self.counters.queues_closed);
        }
        closed
    }

    /// Get or lazily create an element's buffer queue.
    ///
    /// Returns the reader and whether the queue was created by this call,
    /// or `None` if the element is not registered.
    pub fn ensure_element_queue(&self, id: ElementId) -> Option<(Receiver<Vec<u8>>, bool)> {
        let mut inner = self.lock();
        let slot = inner.elements.get_mut(&id)?;
        match &slot.buffers {
            Some(queue) => Some((queue.receiver(), false)),
            None => {
                let queue = DeliveryQueue::new(self.buffer_capacity);
                let rx = queue.receiver();
                slot.buffers = Some(queue);
                Some((rx, true))
            }
        }
    }

    /// Get or lazily create a pipeline's bus message queue.
    ///
    /// Returns the reader and whether the queue was created by this call,
    /// or `None` if the pipeline is not registered.
    pub fn ensure_message_queue(&self, id: PipelineId) -> Option<(Receiver<Message>, bool)> {
        let mut inner = self.lock();
        let slot = inner.pipelines.get_mut(&id)?;
        match &slot.messages {
            Some(queue) => Some((queue.receiver(), false)),
            None => {
                let queue = DeliveryQueue::new(self.message_capacity);
                let rx = queue.receiver();
                slot.messages = Some(queue);
                Some((rx, true))
            }
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.lock().pipelines.len()
    }

    pub fn element_count(&self) -> usize {
        self.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.pipelines.is_empty() && inner.elements.is_empty()
    }

    /// Snapshot of the activity counters
    pub fn stats(&self) -> RegistryStats {
        let c = &self.counters;
        RegistryStats {
            registered: c.registered.load(Ordering::Relaxed),
            deregistered: c.deregistered.load(Ordering::Relaxed),
            buffers_delivered: c.buffers_delivered.load(Ordering::Relaxed),
            messages_delivered: c.messages_delivered.load(Ordering::Relaxed),
            stale_discarded: c.stale_discarded.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            queues_closed: c.queues_closed.load(Ordering::Relaxed),
        }
    }
}
