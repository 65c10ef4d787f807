//! # media-bridge: Native Media Pipeline Bridge
//!
//! Connects a callback-driven native media-pipeline engine to host code that
//! consumes data through blocking queues. Native streaming threads never see
//! host objects: callbacks carry a small integer id that the bridge resolves
//! through one lock-protected [`Registry`] before enqueueing a copy of the
//! payload.
//!
//! ## Architecture
//!
//! - **Engine**: the [`engine`] traits describe the native command surface;
//!   an in-process mock engine and a GStreamer backend implement them
//! - **Bridge**: [`Pipeline`] and [`Element`] wrap native handles, the
//!   [`Dispatcher`] routes native callbacks to delivery queues
//! - **Communication**: bounded crossbeam channels per element and per
//!   pipeline, created lazily on first `pull` / `subscribe_messages`
//!
//! ## Configuration
//!
//! [`BridgeConfig`] is stored as TOML (or JSON) under the platform config
//! directory, `media-bridge/config.toml`.
//!
//! ## Example
//!
//! ```ignore
//! use media_bridge::{BridgeConfig, MediaBridge};
//!
//! let bridge = MediaBridge::with_mock_engine(BridgeConfig::default())?;
//! let pipeline = bridge.parse_pipeline("videotestsrc ! appsink name=sink")?;
//! let mut sink = pipeline.element("sink")?;
//! let buffers = sink.pull();
//! pipeline.start();
//!
//! let frame = buffers.recv()?;
//! assert!(!frame.is_empty());
//!
//! sink.stop();
//! pipeline.stop();
//! ```

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;

// Re-export commonly used types
pub use bridge::{
    Dispatcher, Element, ElementId, MediaBridge, Message, MessageType, Pipeline, PipelineId,
    Registry, RegistryStats,
};
pub use config::{BridgeConfig, OverflowPolicy};
pub use error::{BridgeError, Result};
