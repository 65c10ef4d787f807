//! Bridge between native engine threads and host-side delivery queues.
//!
//! # Architecture
//!
//! ```text
//!  host threads                          native engine threads
//!  ────────────                          ─────────────────────
//!  Pipeline ── commands ──────────────►  NativeGraph
//!  Element  ── push / arm pull ───────►  NativeElement
//!     ▲                                        │
//!     │ Receiver<Vec<u8>>                      │ buffer / eos / bus message
//!     │ Receiver<Message>                      ▼
//!  delivery queues ◄── enqueue ─────────  Dispatcher ──► Registry (one lock)
//! ```
//!
//! # Design
//!
//! - **Id indirection** - native callbacks carry only a `u64` id; the
//!   [`Registry`] resolves it.
//! - **One lock** - registration, deregistration, terminated flags and every
//!   dispatch attempt share the registry mutex.
//! - **Lazy queues** - a queue exists only after the host asks for it with
//!   [`Element::pull`] or [`Pipeline::subscribe_messages`].
//! - **Injectable registry** - a [`MediaBridge`] owns one `Arc<Registry>`;
//!   tests can build as many independent bridges as they like.

pub mod dispatcher;
pub mod element;
pub mod id;
pub mod message;
pub mod pipeline;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use element::Element;
pub use id::{ElementId, HandleKind, PipelineId};
pub use message::{Message, MessageType};
pub use pipeline::Pipeline;
pub use registry::{Registry, RegistryStats};

use crate::config::BridgeConfig;
use crate::engine::{self, MediaEngine};
use crate::error::{Result, ResultExt};
use std::path::Path;
use std::sync::Arc;

/// Entry point tying an engine, a registry and a configuration together.
pub struct MediaBridge {
    engine: Arc<dyn MediaEngine>,
    registry: Arc<Registry>,
    config: BridgeConfig,
}

impl MediaBridge {
    /// Initialize the engine, scan configured plugin paths and check the
    /// required plugins.
    pub fn new(engine: Arc<dyn MediaEngine>, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        engine.init().context("Engine initialization failed")?;

        for path in &config.plugin_paths {
            engine::scan_path_for_plugins(engine.as_ref(), path);
        }
        engine::check_plugins(engine.as_ref(), &config.required_plugins)?;

        let registry = Arc::new(Registry::new(&config));
        tracing::info!(
            "Media bridge ready (buffer queue {}, message queue {}, overflow {:?})",
            config.buffer_queue_capacity,
            config.message_queue_capacity,
            config.overflow
        );

        Ok(Self {
            engine,
            registry,
            config,
        })
    }

    /// Bridge over the in-process mock engine
    #[cfg(feature = "mock-engine")]
    pub fn with_mock_engine(config: BridgeConfig) -> Result<Self> {
        let engine = Arc::new(engine::MockEngine::with_settings(config.mock.clone()));
        Self::new(engine, config)
    }

    /// Bridge over GStreamer
    #[cfg(feature = "gstreamer")]
    pub fn with_gstreamer(config: BridgeConfig) -> Result<Self> {
        Self::new(Arc::new(engine::GstEngine::new()), config)
    }

    /// Build and register a pipeline from a textual description
    pub fn parse_pipeline(&self, description: &str) -> Result<Pipeline> {
        Pipeline::new(self.engine.as_ref(), self.registry.clone(), description)
    }

    /// Fail with `PluginNotFound` naming the first missing plugin
    pub fn check_plugins<S: AsRef<str>>(&self, plugins: &[S]) -> Result<()> {
        engine::check_plugins(self.engine.as_ref(), plugins)
    }

    /// Scan a directory for native plugins
    pub fn scan_path_for_plugins(&self, directory: impl AsRef<Path>) -> bool {
        engine::scan_path_for_plugins(self.engine.as_ref(), directory.as_ref())
    }

    /// Run the engine event loop on the calling thread until
    /// [`quit_main_loop`](Self::quit_main_loop)
    pub fn run_main_loop(&self) {
        tracing::debug!("Entering engine main loop");
        self.engine.run_main_loop();
        tracing::debug!("Engine main loop returned");
    }

    pub fn quit_main_loop(&self) {
        self.engine.quit_main_loop();
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}
