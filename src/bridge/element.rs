//! Stream element bridge.

use crate::bridge::dispatcher::Dispatcher;
use crate::bridge::id::ElementId;
use crate::bridge::registry::Registry;
use crate::engine::NativeElement;
use crossbeam_channel::{bounded, Receiver};
use std::sync::Arc;

/// Host-side handle to one native processing unit.
///
/// Obtained from [`Pipeline::find_element`](super::Pipeline::find_element).
/// The element does not keep its pipeline alive; using it after the
/// pipeline was stopped is the caller's responsibility. Dropping the handle
/// does not tear anything down: the element stays registered and its queue
/// keeps delivering until [`stop`](Self::stop) or end-of-stream.
pub struct Element {
    id: ElementId,
    name: String,
    native: Box<dyn NativeElement>,
    registry: Arc<Registry>,
    buffers: Option<Receiver<Vec<u8>>>,
    stopped: bool,
}

impl Element {
    /// Wrap a native element and register it for dispatch
    pub(crate) fn new(native: Box<dyn NativeElement>, registry: Arc<Registry>) -> Self {
        let name = native.name();
        let id = registry.register_element(&name);
        tracing::debug!("Registered element '{}' as {}", name, id);
        Self {
            id,
            name,
            native,
            registry,
            buffers: None,
            stopped: false,
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether end-of-stream or a stop has closed the delivery queue
    pub fn is_terminated(&self) -> bool {
        self.registry.is_element_terminated(self.id).unwrap_or(true)
    }

    /// Configure the accepted data format. Invalid caps are logged.
    pub fn set_capabilities(&self, caps: &str) {
        if let Err(e) = self.native.set_caps(caps) {
            tracing::warn!("Failed to set caps on '{}': {}", self.name, e);
        }
    }

    /// Hand a buffer to the native unit. Never waits on delivery queues.
    pub fn push(&self, buffer: &[u8]) {
        self.native.push_buffer(buffer);
    }

    /// Outbound buffer source.
    ///
    /// The first call creates the bounded queue and arms the native pull
    /// path; later calls return the same channel. After `stop()` the
    /// returned channel is disconnected.
    pub fn pull(&mut self) -> Receiver<Vec<u8>> {
        if let Some(rx) = &self.buffers {
            return rx.clone();
        }

        let Some((rx, created)) = self.registry.ensure_element_queue(self.id) else {
            // Deregistered: hand out a channel that is already closed.
            let (_, rx) = bounded(0);
            return rx;
        };

        // Arm outside the registry lock; the engine may call straight back.
        if created {
            tracing::debug!("Arming pull on '{}' ({})", self.name, self.id);
            self.native
                .arm_pull(self.id, Dispatcher::new(self.registry.clone()));
        }
        self.buffers = Some(rx.clone());
        rx
    }

    /// Deregister the element and close its queue if one exists.
    /// Calling it again does nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if self.registry.deregister_element(self.id) {
            tracing::debug!("Stopped element '{}' ({})", self.name, self.id);
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stopped", &self.stopped)
            .finish()
    }
}
