//! GStreamer backend
//!
//! Implements the engine traits on top of `gstreamer-rs`. Graphs come from
//! `gst_parse_launch`, bus messages are delivered by a bus watch on the GLib
//! main context, and outbound buffers by `appsink` callbacks on GStreamer
//! streaming threads.
//!
//! Enable with the `gstreamer` feature. The host must run
//! [`MediaEngine::run_main_loop`] for bus watches to fire.

use crate::bridge::{Dispatcher, ElementId, MessageType, PipelineId};
use crate::engine::{MediaEngine, NativeElement, NativeGraph, NativeMessage, CLOCK_TIME_NONE};
use crate::error::{BridgeError, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Engine backed by the process-wide GStreamer instance
pub struct GstEngine {
    main_loop: glib::MainLoop,
    /// Set by `quit_main_loop`, consumed when `run_main_loop` returns.
    /// `g_main_loop_quit` is lost if it lands before the loop runs.
    quit_requested: Arc<AtomicBool>,
}

impl Default for GstEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GstEngine {
    pub fn new() -> Self {
        Self {
            main_loop: glib::MainLoop::new(None, false),
            quit_requested: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MediaEngine for GstEngine {
    fn init(&self) -> Result<()> {
        gst::init().map_err(|e| BridgeError::Engine(e.to_string()))?;
        tracing::info!("GStreamer {} initialized", gst::version_string());
        Ok(())
    }

    fn parse_launch(&self, description: &str) -> Result<Box<dyn NativeGraph>> {
        let element = gst::parse::launch(description)
            .map_err(|e| BridgeError::InvalidGraph(e.to_string()))?;
        let pipeline = element.downcast::<gst::Pipeline>().map_err(|element| {
            BridgeError::InvalidGraph(format!(
                "description produced a single element \"{}\", not a pipeline",
                element.name()
            ))
        })?;
        Ok(Box::new(GstGraph {
            pipeline,
            bus_watch: Mutex::new(None),
        }))
    }

    fn scan_path(&self, directory: &Path) -> bool {
        gst::Registry::get().scan_path(directory)
    }

    fn has_plugin(&self, name: &str) -> bool {
        gst::Registry::get().find_plugin(name).is_some()
    }

    fn run_main_loop(&self) {
        // Runs on the first loop iteration, so an earlier quit still counts.
        let main_loop = self.main_loop.clone();
        let quit_requested = self.quit_requested.clone();
        glib::idle_add_once(move || {
            if quit_requested.load(Ordering::SeqCst) {
                main_loop.quit();
            }
        });
        self.main_loop.run();
        self.quit_requested.store(false, Ordering::SeqCst);
    }

    fn quit_main_loop(&self) {
        self.quit_requested.store(true, Ordering::SeqCst);
        self.main_loop.quit();
    }
}

// ==================== Graph ====================

pub struct GstGraph {
    pipeline: gst::Pipeline,
    bus_watch: Mutex<Option<gst::bus::BusWatchGuard>>,
}

impl GstGraph {
    fn set_state(&self, state: gst::State) {
        if let Err(e) = self.pipeline.set_state(state) {
            tracing::warn!("{} failed to change to {:?}: {}", self.pipeline.name(), state, e);
        }
    }
}

impl NativeGraph for GstGraph {
    fn start(&self) {
        self.set_state(gst::State::Playing);
    }

    fn pause(&self) {
        self.set_state(gst::State::Paused);
    }

    fn stop(&self) {
        self.set_state(gst::State::Null);
        self.bus_watch
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    fn send_eos(&self) {
        if !self.pipeline.send_event(gst::event::Eos::new()) {
            tracing::warn!("{} did not accept EOS", self.pipeline.name());
        }
    }

    fn delay(&self) -> u64 {
        self.pipeline.delay().nseconds()
    }

    fn set_delay(&self, delay: u64) {
        self.pipeline.set_delay(gst::ClockTime::from_nseconds(delay));
    }

    fn latency(&self) -> u64 {
        self.pipeline
            .latency()
            .map_or(CLOCK_TIME_NONE, |latency| latency.nseconds())
    }

    fn set_latency(&self, latency: u64) {
        let latency = (latency != CLOCK_TIME_NONE).then(|| gst::ClockTime::from_nseconds(latency));
        self.pipeline.set_latency(latency);
    }

    fn auto_flush_bus(&self) -> bool {
        self.pipeline.is_auto_flush_bus()
    }

    fn set_auto_flush_bus(&self, flush: bool) {
        self.pipeline.set_auto_flush_bus(flush);
    }

    fn find_element(&self, name: &str) -> Option<Box<dyn NativeElement>> {
        let element = self.pipeline.by_name(name)?;
        Some(Box::new(GstElement { element }))
    }

    fn watch_bus(&self, pipeline: PipelineId, dispatcher: Dispatcher) {
        let Some(bus) = self.pipeline.bus() else {
            tracing::warn!("{} has no bus", self.pipeline.name());
            return;
        };
        let watch = bus.add_watch(move |_, message| {
            dispatcher.on_bus_message(&GstBusMessage(message), pipeline);
            glib::ControlFlow::Continue
        });
        match watch {
            Ok(guard) => {
                *self
                    .bus_watch
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(guard);
            }
            Err(e) => tracing::error!("Failed to watch bus of {}: {}", pipeline, e),
        }
    }
}

// ==================== Elements ====================

pub struct GstElement {
    element: gst::Element,
}

impl NativeElement for GstElement {
    fn name(&self) -> String {
        self.element.name().to_string()
    }

    fn set_caps(&self, caps: &str) -> Result<()> {
        if self.element.find_property("caps").is_none() {
            return Err(BridgeError::Engine(format!(
                "element \"{}\" has no property \"caps\"",
                self.element.name()
            )));
        }
        let caps = caps
            .parse::<gst::Caps>()
            .map_err(|e| BridgeError::Engine(format!("could not parse caps \"{}\": {}", caps, e)))?;
        self.element.set_property("caps", &caps);
        Ok(())
    }

    fn push_buffer(&self, data: &[u8]) {
        let Some(src) = self.element.downcast_ref::<gst_app::AppSrc>() else {
            tracing::warn!("Cannot push into \"{}\": not an appsrc", self.element.name());
            return;
        };
        if let Err(e) = src.push_buffer(gst::Buffer::from_slice(data.to_vec())) {
            tracing::warn!("Push into \"{}\" failed: {:?}", self.element.name(), e);
        }
    }

    fn arm_pull(&self, element: ElementId, dispatcher: Dispatcher) {
        let Some(sink) = self.element.downcast_ref::<gst_app::AppSink>() else {
            tracing::warn!("Cannot pull from \"{}\": not an appsink", self.element.name());
            return;
        };

        let on_eos = dispatcher.clone();
        sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    dispatcher.on_sink_buffer(map.as_slice(), element);
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_| on_eos.on_sink_eos(element))
                .build(),
        );
    }
}

// ==================== Bus Messages ====================

struct GstBusMessage<'a>(&'a gst::Message);

impl NativeMessage for GstBusMessage<'_> {
    fn message_type(&self) -> MessageType {
        use gst::MessageView;
        match self.0.view() {
            MessageView::Eos(_) => MessageType::Eos,
            MessageView::Error(_) => MessageType::Error,
            MessageView::Warning(_) => MessageType::Warning,
            MessageView::Info(_) => MessageType::Info,
            MessageView::Tag(_) => MessageType::Tag,
            MessageView::Buffering(_) => MessageType::Buffering,
            MessageView::StateChanged(_) => MessageType::StateChanged,
            _ => MessageType::Unknown,
        }
    }

    fn timestamp(&self) -> u64 {
        // SAFETY: the message is alive for the duration of the watch
        // callback and `timestamp` is a plain field of the C struct.
        unsafe { (*self.0.as_ptr()).timestamp }
    }

    fn source_name(&self) -> Option<String> {
        self.0.src().map(|src| src.name().to_string())
    }

    fn detail(&self) -> Option<String> {
        use gst::MessageView;
        match self.0.view() {
            MessageView::Error(err) => Some(match err.debug() {
                Some(debug) => format!("{} ({})", err.error(), debug),
                None => err.error().to_string(),
            }),
            MessageView::Warning(warning) => Some(warning.error().to_string()),
            MessageView::Info(info) => Some(info.error().to_string()),
            MessageView::Buffering(buffering) => Some(format!("{}%", buffering.percent())),
            MessageView::StateChanged(change) => {
                Some(format!("{:?} -> {:?}", change.old(), change.current()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::thread;
    use std::time::Duration;

    // Both loops run on the process-wide default main context.
    #[test]
    #[serial]
    fn test_quit_before_run_returns_immediately() {
        let engine = GstEngine::new();
        engine.quit_main_loop();
        engine.run_main_loop();
        assert!(!engine.quit_requested.load(Ordering::SeqCst));
    }

    #[test]
    #[serial]
    fn test_quit_from_other_thread_stops_running_loop() {
        let engine = Arc::new(GstEngine::new());
        let quitter = {
            let engine = engine.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                engine.quit_main_loop();
            })
        };
        engine.run_main_loop();
        quitter.join().unwrap();
    }
}
