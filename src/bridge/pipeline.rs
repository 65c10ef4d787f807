//! Pipeline bridge.

use crate::bridge::dispatcher::Dispatcher;
use crate::bridge::element::Element;
use crate::bridge::id::PipelineId;
use crate::bridge::message::Message;
use crate::bridge::registry::Registry;
use crate::engine::{MediaEngine, NativeGraph};
use crate::error::{BridgeError, Result};
use crossbeam_channel::{bounded, Receiver};
use std::sync::Arc;

/// Host-side handle to one native processing graph.
///
/// State changes requested through [`start`](Self::start) and
/// [`pause`](Self::pause) complete asynchronously and are reported on the
/// message bus. The pipeline is torn down by [`stop`](Self::stop), or by
/// dropping it.
pub struct Pipeline {
    id: PipelineId,
    description: String,
    graph: Box<dyn NativeGraph>,
    registry: Arc<Registry>,
    messages: Option<Receiver<Message>>,
    torn_down: bool,
}

impl Pipeline {
    /// Build a graph from a textual description and register it.
    ///
    /// A description the engine rejects yields
    /// [`BridgeError::InvalidGraph`] and registers nothing.
    pub fn new(engine: &dyn MediaEngine, registry: Arc<Registry>, description: &str) -> Result<Self> {
        let graph = engine.parse_launch(description)?;
        let id = registry.register_pipeline();
        tracing::info!("Created {} from '{}'", id, description);
        Ok(Self {
            id,
            description: description.to_string(),
            graph,
            registry,
            messages: None,
            torn_down: false,
        })
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn start(&self) {
        tracing::debug!("Starting {}", self.id);
        self.graph.start();
    }

    pub fn pause(&self) {
        tracing::debug!("Pausing {}", self.id);
        self.graph.pause();
    }

    /// Request a graceful drain; an end-of-stream message follows on the bus
    pub fn send_end_of_stream(&self) {
        self.graph.send_eos();
    }

    /// Bus message source.
    ///
    /// The first call creates the bounded queue and starts the native bus
    /// watch; later calls return the same channel.
    pub fn subscribe_messages(&mut self) -> Receiver<Message> {
        if let Some(rx) = &self.messages {
            return rx.clone();
        }

        let Some((rx, created)) = self.registry.ensure_message_queue(self.id) else {
            let (_, rx) = bounded(0);
            return rx;
        };
        if created {
            self.graph
                .watch_bus(self.id, Dispatcher::new(self.registry.clone()));
        }
        self.messages = Some(rx.clone());
        rx
    }

    pub fn delay(&self) -> u64 {
        self.graph.delay()
    }

    pub fn set_delay(&self, delay: u64) {
        self.graph.set_delay(delay);
    }

    pub fn latency(&self) -> u64 {
        self.graph.latency()
    }

    pub fn set_latency(&self, latency: u64) {
        self.graph.set_latency(latency);
    }

    pub fn auto_flush_bus(&self) -> bool {
        self.graph.auto_flush_bus()
    }

    pub fn set_auto_flush_bus(&self, flush: bool) {
        self.graph.set_auto_flush_bus(flush);
    }

    /// Look up a named unit. A miss is routine and returns `None`.
    pub fn find_element(&self, name: &str) -> Option<Element> {
        match self.graph.find_element(name) {
            Some(native) => Some(Element::new(native, self.registry.clone())),
            None => {
                tracing::debug!("No element '{}' in {}", name, self.id);
                None
            }
        }
    }

    /// Like [`find_element`](Self::find_element), for callers that need it
    pub fn element(&self, name: &str) -> Result<Element> {
        self.find_element(name)
            .ok_or_else(|| BridgeError::ElementNotFound(name.to_string()))
    }

    /// Tear the pipeline down: deregister, close the message queue, stop
    /// the native graph, then release it.
    pub fn stop(mut self) {
        self.teardown();
        // `self` drops here, releasing the native graph last.
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        // Deregistration closes the queue in the same critical section, so
        // no callback can reach this id once native stop begins.
        self.registry.deregister_pipeline(self.id);
        self.graph.stop();
        tracing::info!("Stopped {}", self.id);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::debug!("{} dropped without stop", self.id);
            self.teardown();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish()
    }
}
