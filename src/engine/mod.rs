//! Native engine interface
//!
//! This module describes the narrow command surface the bridge needs from a
//! media-pipeline engine. Engines implement these traits; the bridge never
//! touches engine internals beyond them.
//!
//! # Threading
//!
//! Native objects are engine handles that may be used from any host thread,
//! so every command takes `&self`. Engines call back into the bridge from
//! their own worker threads through the [`Dispatcher`] handed to
//! [`NativeGraph::watch_bus`] and [`NativeElement::arm_pull`].
//!
//! # Implementations
//!
//! - [`mock::MockEngine`] - in-process engine for tests (feature `mock-engine`)
//! - [`gst::GstEngine`] - GStreamer backend (feature `gstreamer`)

#[cfg(feature = "gstreamer")]
pub mod gst;
#[cfg(feature = "mock-engine")]
pub mod mock;
pub mod plugins;

use crate::bridge::{Dispatcher, ElementId, MessageType, PipelineId};
use crate::error::Result;
use std::path::Path;

#[cfg(feature = "gstreamer")]
pub use gst::GstEngine;
#[cfg(feature = "mock-engine")]
pub use mock::MockEngine;
pub use plugins::{check_plugins, scan_path_for_plugins};

/// Clock value meaning "no time", as used by latency queries.
pub const CLOCK_TIME_NONE: u64 = u64::MAX;

/// Process-wide engine operations
#[cfg_attr(test, mockall::automock)]
pub trait MediaEngine: Send + Sync {
    /// One-time engine initialization. Calling it again is harmless.
    fn init(&self) -> Result<()>;

    /// Build a graph from a textual description.
    ///
    /// Fails with [`BridgeError::InvalidGraph`](crate::BridgeError::InvalidGraph)
    /// when the description cannot be realized.
    fn parse_launch(&self, description: &str) -> Result<Box<dyn NativeGraph>>;

    /// Scan a directory for loadable plugins. Returns true if the plugin
    /// registry changed.
    fn scan_path(&self, directory: &Path) -> bool;

    /// Check whether a plugin is available
    fn has_plugin(&self, name: &str) -> bool;

    /// Run the engine event loop until [`MediaEngine::quit_main_loop`].
    ///
    /// Some native plugins require this on the process's initial thread.
    fn run_main_loop(&self);

    /// Ask a running (or the next) event loop to return
    fn quit_main_loop(&self);
}

/// Commands on one native processing graph
#[cfg_attr(test, mockall::automock)]
pub trait NativeGraph: Send {
    /// Request the playing state; completion is reported on the bus
    fn start(&self);

    /// Request the paused state
    fn pause(&self);

    /// Bring the graph down to its null state
    fn stop(&self);

    /// Inject end-of-stream for a graceful drain
    fn send_eos(&self);

    fn delay(&self) -> u64;

    fn set_delay(&self, delay: u64);

    /// Configured latency, or [`CLOCK_TIME_NONE`] when unset
    fn latency(&self) -> u64;

    fn set_latency(&self, latency: u64);

    fn auto_flush_bus(&self) -> bool;

    fn set_auto_flush_bus(&self, flush: bool);

    /// Look up a named unit inside the graph
    fn find_element(&self, name: &str) -> Option<Box<dyn NativeElement>>;

    /// Start delivering bus messages for `pipeline` to the dispatcher
    fn watch_bus(&self, pipeline: PipelineId, dispatcher: Dispatcher);
}

/// Commands on one native processing unit
#[cfg_attr(test, mockall::automock)]
pub trait NativeElement: Send {
    fn name(&self) -> String;

    /// Configure the accepted data format
    fn set_caps(&self, caps: &str) -> Result<()>;

    /// Hand an inbound buffer to the unit
    fn push_buffer(&self, data: &[u8]);

    /// Start delivering outbound buffers and end-of-stream for `element`
    fn arm_pull(&self, element: ElementId, dispatcher: Dispatcher);
}

/// Read access to one native bus message, valid for the duration of a
/// dispatcher callback
pub trait NativeMessage {
    fn message_type(&self) -> MessageType;

    fn timestamp(&self) -> u64;

    fn type_name(&self) -> String {
        self.message_type().name().to_string()
    }

    fn source_name(&self) -> Option<String> {
        None
    }

    fn detail(&self) -> Option<String> {
        None
    }
}
