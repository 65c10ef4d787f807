//! Mock Engine Implementation for Testing
//!
//! This module provides an in-process media engine that behaves like a
//! native one from the bridge's point of view: graphs are built from
//! textual descriptions, data flows on engine-owned streaming threads, bus
//! messages are posted from a separate bus thread, and everything reaches
//! the host through the [`Dispatcher`].
//!
//! # Graph Language
//!
//! A description is a linear chain of elements separated by `!`:
//!
//! ```text
//! videotestsrc num-buffers=5 ! videoconvert ! appsink name=sink
//! ```
//!
//! Each element is a factory name followed by `key=value` properties.
//! `name` overrides the default `<factory><n>` name, `num-buffers` limits
//! test sources. Sources must come first and sinks last. Values may be
//! double-quoted to carry spaces or `!`, as in
//! `capsfilter caps="video/x-raw, format=RGB"`.
//!
//! | Factory | Plugin | Role |
//! |---------|--------|------|
//! | `videotestsrc`, `audiotestsrc`, `fakesrc` | `videotestsrc`, `audiotestsrc`, `coreelements` | generated source |
//! | `appsrc` | `app` | source fed by `push` |
//! | `identity`, `queue`, `capsfilter`, `videoconvert`, `audioconvert` | various | pass-through |
//! | `appsink` | `app` | sink read with `pull` |
//! | `fakesink` | `coreelements` | discarding sink |
//!
//! # Buffers
//!
//! Generated buffers are `buffer_size` bytes (at least 8) and start with the
//! little-endian sequence number of the buffer, readable with
//! [`MockEngine::sequence_number`].
//!
//! # Enabling
//!
//! The mock engine is part of the default `mock-engine` feature.

use crate::bridge::{Dispatcher, ElementId, MessageType, PipelineId};
use crate::config::MockSettings;
use crate::engine::{MediaEngine, NativeElement, NativeGraph, NativeMessage, CLOCK_TIME_NONE};
use crate::error::{BridgeError, Result};
use crossbeam_channel::{unbounded, Sender};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

/// Plugins available before any path scan
pub const DEFAULT_PLUGINS: &[&str] = &[
    "coreelements",
    "app",
    "videotestsrc",
    "audiotestsrc",
    "videoconvert",
    "audioconvert",
];

/// Plugin file suffixes recognized by [`MockEngine::scan_path`]
const PLUGIN_SUFFIXES: &[&str] = &[".so", ".dylib", ".dll"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    TestSource,
    AppSource,
    Filter,
    AppSink,
    FakeSink,
}

impl Role {
    fn is_source(self) -> bool {
        matches!(self, Role::TestSource | Role::AppSource)
    }

    fn is_sink(self) -> bool {
        matches!(self, Role::AppSink | Role::FakeSink)
    }

    fn accepts_caps(self) -> bool {
        matches!(self, Role::AppSource | Role::AppSink | Role::Filter)
    }
}

/// (factory, plugin, role)
const FACTORIES: &[(&str, &str, Role)] = &[
    ("videotestsrc", "videotestsrc", Role::TestSource),
    ("audiotestsrc", "audiotestsrc", Role::TestSource),
    ("fakesrc", "coreelements", Role::TestSource),
    ("appsrc", "app", Role::AppSource),
    ("identity", "coreelements", Role::Filter),
    ("queue", "coreelements", Role::Filter),
    ("capsfilter", "coreelements", Role::Filter),
    ("videoconvert", "videoconvert", Role::Filter),
    ("audioconvert", "audioconvert", Role::Filter),
    ("appsink", "app", Role::AppSink),
    ("fakesink", "coreelements", Role::FakeSink),
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==================== Graph Description ====================

#[derive(Debug, Clone)]
struct ElementSpec {
    name: String,
    role: Role,
    properties: HashMap<String, String>,
}

fn invalid(message: impl Into<String>) -> BridgeError {
    BridgeError::InvalidGraph(message.into())
}

fn parse_description(description: &str, plugins: &HashSet<String>) -> Result<Vec<ElementSpec>> {
    let description = description.trim();
    if description.is_empty() {
        return Err(invalid("empty pipeline not allowed"));
    }

    let segments: Vec<&str> = split_outside_quotes(description, |c| c == '!')?
        .into_iter()
        .map(str::trim)
        .collect();
    let last = segments.len() - 1;
    let mut counters: HashMap<&str, usize> = HashMap::new();
    let mut names = HashSet::new();
    let mut specs = Vec::with_capacity(segments.len());

    for (index, segment) in segments.iter().enumerate() {
        let mut tokens = split_outside_quotes(segment, char::is_whitespace)?
            .into_iter()
            .filter(|token| !token.is_empty());
        let Some(factory_name) = tokens.next() else {
            return Err(invalid(format!(
                "syntax error: empty element at position {}",
                index
            )));
        };
        let Some(&(factory, plugin, role)) = FACTORIES.iter().find(|(f, _, _)| *f == factory_name)
        else {
            return Err(invalid(format!("no element \"{}\"", factory_name)));
        };
        if !plugins.contains(plugin) {
            return Err(invalid(format!(
                "no element \"{}\" (plugin {} not loaded)",
                factory, plugin
            )));
        }

        let mut properties = HashMap::new();
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                return Err(invalid(format!(
                    "could not set property \"{}\" in element \"{}\"",
                    token, factory
                )));
            };
            properties.insert(key.to_string(), value.trim_matches('"').to_string());
        }

        let name = match properties.remove("name") {
            Some(name) => name,
            None => {
                let n = counters.entry(factory).or_insert(0);
                let name = format!("{}{}", factory, n);
                *n += 1;
                name
            }
        };
        if !names.insert(name.clone()) {
            return Err(invalid(format!("duplicate element name \"{}\"", name)));
        }
        if (role.is_source() && index != 0) || (role.is_sink() && index != last) {
            return Err(invalid(format!("could not link element \"{}\"", name)));
        }

        specs.push(ElementSpec {
            name,
            role,
            properties,
        });
    }

    Ok(specs)
}

/// Split on `is_separator`, ignoring separators inside double quotes.
/// Empty pieces are kept.
fn split_outside_quotes(text: &str, is_separator: impl Fn(char) -> bool) -> Result<Vec<&str>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (at, c) in text.char_indices() {
        if c == '"' {
            quoted = !quoted;
        } else if !quoted && is_separator(c) {
            pieces.push(&text[start..at]);
            start = at + c.len_utf8();
        }
    }
    if quoted {
        return Err(invalid(format!("unterminated quote in \"{}\"", text)));
    }
    pieces.push(&text[start..]);
    Ok(pieces)
}

fn plugin_name_from_file(file_name: &str) -> Option<String> {
    let stem = PLUGIN_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))?;
    let name = stem
        .strip_prefix("libgst")
        .or_else(|| stem.strip_prefix("gst"))?;
    (!name.is_empty()).then(|| name.to_string())
}

fn validate_caps(caps: &str) -> Result<()> {
    let mut fields = caps.split(',').map(str::trim);
    let media_type = fields.next().unwrap_or_default();
    let well_formed = media_type.split_once('/').is_some_and(|(major, minor)| {
        !major.is_empty() && !minor.is_empty()
    }) && fields.all(|field| field.split_once('=').is_some_and(|(k, _)| !k.is_empty()));

    if well_formed {
        Ok(())
    } else {
        Err(BridgeError::Engine(format!("could not parse caps \"{}\"", caps)))
    }
}

// ==================== Bus Messages ====================

/// Message posted on a mock graph's bus
#[derive(Debug, Clone)]
pub struct MockMessage {
    msg_type: MessageType,
    timestamp: u64,
    source: String,
    detail: Option<String>,
}

impl NativeMessage for MockMessage {
    fn message_type(&self) -> MessageType {
        self.msg_type
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn source_name(&self) -> Option<String> {
        Some(self.source.clone())
    }

    fn detail(&self) -> Option<String> {
        self.detail.clone()
    }
}

// ==================== Graph ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Null,
    Paused,
    Playing,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Null => "NULL",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SourceKind {
    Test { num_buffers: Option<u64> },
    App,
    Idle,
}

enum Action {
    Buffer(Vec<u8>),
    Eos,
}

struct GraphState {
    state: State,
    eos_pending: bool,
    eos_sent: bool,
    streaming: bool,
    delay: u64,
    latency: u64,
    auto_flush_bus: bool,
    sink: Option<(ElementId, Dispatcher)>,
    bus: Option<Sender<MockMessage>>,
    pushed: VecDeque<Vec<u8>>,
}

struct GraphShared {
    name: String,
    specs: Vec<ElementSpec>,
    source: SourceKind,
    settings: MockSettings,
    clock: Instant,
    state: Mutex<GraphState>,
    wake: Condvar,
}

impl GraphShared {
    fn now(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }

    fn post(&self, st: &GraphState, msg_type: MessageType, detail: Option<String>) {
        if let Some(bus) = &st.bus {
            let _ = bus.send(MockMessage {
                msg_type,
                timestamp: self.now(),
                source: self.name.clone(),
                detail,
            });
        }
    }

    fn generate(&self, sequence: u64) -> Vec<u8> {
        let mut buffer = vec![sequence as u8; self.settings.buffer_size.max(8)];
        buffer[..8].copy_from_slice(&sequence.to_le_bytes());
        buffer
    }

    /// Block until there is something to stream. `None` once the graph is
    /// back in the null state.
    fn next_action(&self, produced: u64) -> Option<Action> {
        let mut st = lock(&self.state);
        loop {
            if st.state == State::Null {
                st.streaming = false;
                return None;
            }
            let playing = st.state == State::Playing && !st.eos_sent;
            if playing {
                if let Some(buffer) = st.pushed.pop_front() {
                    return Some(Action::Buffer(buffer));
                }
            }
            // EOS is serialized behind buffers already pushed.
            if st.eos_pending && st.pushed.is_empty() {
                st.eos_pending = false;
                st.eos_sent = true;
                return Some(Action::Eos);
            }
            if playing {
                if let SourceKind::Test { num_buffers } = self.source {
                    if num_buffers.map_or(true, |n| produced < n) {
                        return Some(Action::Buffer(self.generate(produced)));
                    }
                    st.eos_sent = true;
                    return Some(Action::Eos);
                }
            }
            st = self.wake.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn render(&self, buffer: &[u8]) {
        let sink = lock(&self.state).sink.clone();
        if let Some((element, dispatcher)) = sink {
            dispatcher.on_sink_buffer(buffer, element);
        }
    }

    fn finish(&self) {
        let sink = lock(&self.state).sink.clone();
        if let Some((element, dispatcher)) = sink {
            dispatcher.on_sink_eos(element);
        }
        let st = lock(&self.state);
        self.post(&st, MessageType::Eos, None);
    }
}

fn streaming_loop(shared: Arc<GraphShared>) {
    let interval = shared.settings.buffer_interval();
    let mut produced: u64 = 0;
    while let Some(action) = shared.next_action(produced) {
        match action {
            Action::Buffer(buffer) => {
                shared.render(&buffer);
                if matches!(shared.source, SourceKind::Test { .. }) {
                    produced += 1;
                    thread::sleep(interval);
                }
            }
            Action::Eos => shared.finish(),
        }
    }
    tracing::trace!("Streaming thread of {} exiting", shared.name);
}

/// Graph built by [`MockEngine`]
pub struct MockGraph {
    shared: Arc<GraphShared>,
}

impl MockGraph {
    fn new(name: String, specs: Vec<ElementSpec>, settings: MockSettings, clock: Instant) -> Result<Self> {
        let source = match specs.first() {
            Some(spec) if spec.role == Role::TestSource => {
                let num_buffers = match spec.properties.get("num-buffers") {
                    // Negative counts mean unlimited, as in the native property
                    Some(value) => match value.parse::<i64>() {
                        Ok(n) if n >= 0 => Some(n as u64),
                        Ok(_) => None,
                        Err(_) => {
                            return Err(invalid(format!(
                                "could not set property \"num-buffers\" to \"{}\"",
                                value
                            )))
                        }
                    },
                    None => None,
                };
                SourceKind::Test { num_buffers }
            }
            Some(spec) if spec.role == Role::AppSource => SourceKind::App,
            _ => SourceKind::Idle,
        };

        for spec in &specs {
            if let Some(caps) = spec.properties.get("caps") {
                validate_caps(caps).map_err(|_| {
                    invalid(format!("could not set caps \"{}\" on \"{}\"", caps, spec.name))
                })?;
            }
        }

        Ok(Self {
            shared: Arc::new(GraphShared {
                name,
                specs,
                source,
                settings,
                clock,
                state: Mutex::new(GraphState {
                    state: State::Null,
                    eos_pending: false,
                    eos_sent: false,
                    streaming: false,
                    delay: 0,
                    latency: CLOCK_TIME_NONE,
                    auto_flush_bus: true,
                    sink: None,
                    bus: None,
                    pushed: VecDeque::new(),
                }),
                wake: Condvar::new(),
            }),
        })
    }

    fn set_state(&self, target: State) {
        let mut st = lock(&self.shared.state);
        let old = st.state;
        if old == target {
            return;
        }
        st.state = target;

        if target == State::Null {
            st.eos_pending = false;
            st.eos_sent = false;
            st.pushed.clear();
        } else if !st.streaming {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-streaming", self.shared.name))
                .spawn(move || streaming_loop(shared));
            match spawned {
                Ok(_) => st.streaming = true,
                Err(e) => tracing::error!("Failed to spawn streaming thread: {}", e),
            }
        }

        self.shared.post(
            &st,
            MessageType::StateChanged,
            Some(format!("{} -> {}", old.name(), target.name())),
        );
        if target == State::Null {
            // Ends the bus thread once it has drained.
            st.bus = None;
        }
        self.shared.wake.notify_all();
    }
}

impl NativeGraph for MockGraph {
    fn start(&self) {
        self.set_state(State::Playing);
    }

    fn pause(&self) {
        self.set_state(State::Paused);
    }

    fn stop(&self) {
        self.set_state(State::Null);
    }

    fn send_eos(&self) {
        let mut st = lock(&self.shared.state);
        if !st.eos_sent {
            st.eos_pending = true;
            self.shared.wake.notify_all();
        }
    }

    fn delay(&self) -> u64 {
        lock(&self.shared.state).delay
    }

    fn set_delay(&self, delay: u64) {
        lock(&self.shared.state).delay = delay;
    }

    fn latency(&self) -> u64 {
        lock(&self.shared.state).latency
    }

    fn set_latency(&self, latency: u64) {
        lock(&self.shared.state).latency = latency;
    }

    fn auto_flush_bus(&self) -> bool {
        lock(&self.shared.state).auto_flush_bus
    }

    fn set_auto_flush_bus(&self, flush: bool) {
        lock(&self.shared.state).auto_flush_bus = flush;
    }

    fn find_element(&self, name: &str) -> Option<Box<dyn NativeElement>> {
        let spec = self.shared.specs.iter().find(|spec| spec.name == name)?;
        Some(Box::new(MockElement {
            shared: self.shared.clone(),
            name: spec.name.clone(),
            role: spec.role,
        }))
    }

    fn watch_bus(&self, pipeline: PipelineId, dispatcher: Dispatcher) {
        let mut st = lock(&self.shared.state);
        if st.bus.is_some() {
            tracing::warn!("Bus of {} is already watched", self.shared.name);
            return;
        }

        let (tx, rx) = unbounded::<MockMessage>();
        let spawned = thread::Builder::new()
            .name(format!("{}-bus", self.shared.name))
            .spawn(move || {
                for message in rx {
                    dispatcher.on_bus_message(&message, pipeline);
                }
            });
        match spawned {
            Ok(_) => st.bus = Some(tx),
            Err(e) => tracing::error!("Failed to spawn bus thread: {}", e),
        }
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        let mut st = lock(&self.shared.state);
        if st.state != State::Null {
            tracing::warn!("{} released while not in NULL state", self.shared.name);
            st.state = State::Null;
        }
        st.bus = None;
        self.shared.wake.notify_all();
    }
}

// ==================== Elements ====================

/// Element handle returned by [`MockGraph`]
pub struct MockElement {
    shared: Arc<GraphShared>,
    name: String,
    role: Role,
}

impl NativeElement for MockElement {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_caps(&self, caps: &str) -> Result<()> {
        if !self.role.accepts_caps() {
            return Err(BridgeError::Engine(format!(
                "element \"{}\" has no property \"caps\"",
                self.name
            )));
        }
        validate_caps(caps)?;
        tracing::debug!("Caps of \"{}\" set to {}", self.name, caps);
        Ok(())
    }

    fn push_buffer(&self, data: &[u8]) {
        if self.role != Role::AppSource {
            tracing::warn!("Cannot push into \"{}\": not an appsrc", self.name);
            return;
        }
        let mut st = lock(&self.shared.state);
        if st.eos_sent || st.eos_pending {
            tracing::warn!("Dropping buffer pushed into \"{}\" after EOS", self.name);
            return;
        }
        st.pushed.push_back(data.to_vec());
        self.shared.wake.notify_all();
    }

    fn arm_pull(&self, element: ElementId, dispatcher: Dispatcher) {
        if self.role != Role::AppSink {
            tracing::warn!("Cannot pull from \"{}\": not an appsink", self.name);
            return;
        }
        lock(&self.shared.state).sink = Some((element, dispatcher));
    }
}

// ==================== Engine ====================

struct MainLoopState {
    running: bool,
    quit_requested: bool,
}

/// In-process engine for tests and demos
pub struct MockEngine {
    settings: MockSettings,
    plugins: Mutex<HashSet<String>>,
    init_calls: AtomicUsize,
    graphs_built: AtomicUsize,
    main_loop: Mutex<MainLoopState>,
    main_loop_wake: Condvar,
    clock: Instant,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_settings(MockSettings::default())
    }

    pub fn with_settings(settings: MockSettings) -> Self {
        Self {
            settings,
            plugins: Mutex::new(DEFAULT_PLUGINS.iter().map(|p| p.to_string()).collect()),
            init_calls: AtomicUsize::new(0),
            graphs_built: AtomicUsize::new(0),
            main_loop: Mutex::new(MainLoopState {
                running: false,
                quit_requested: false,
            }),
            main_loop_wake: Condvar::new(),
            clock: Instant::now(),
        }
    }

    /// Replace the available plugin set
    pub fn with_plugins<I, S>(self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.plugins) = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// Remove one plugin from the available set
    pub fn without_plugin(self, plugin: &str) -> Self {
        lock(&self.plugins).remove(plugin);
        self
    }

    /// Sorted names of the available plugins
    pub fn plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = lock(&self.plugins).iter().cloned().collect();
        plugins.sort();
        plugins
    }

    /// Number of times `init` was called
    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn is_main_loop_running(&self) -> bool {
        lock(&self.main_loop).running
    }

    /// Sequence number stamped into a generated buffer
    pub fn sequence_number(buffer: &[u8]) -> Option<u64> {
        let head: [u8; 8] = buffer.get(..8)?.try_into().ok()?;
        Some(u64::from_le_bytes(head))
    }
}

impl MediaEngine for MockEngine {
    fn init(&self) -> Result<()> {
        if self.init_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::info!("Mock engine initialized");
        }
        Ok(())
    }

    fn parse_launch(&self, description: &str) -> Result<Box<dyn NativeGraph>> {
        let specs = parse_description(description, &lock(&self.plugins))?;
        let name = format!("pipeline{}", self.graphs_built.fetch_add(1, Ordering::SeqCst));
        tracing::debug!("Mock graph {} with {} elements", name, specs.len());
        let graph = MockGraph::new(name, specs, self.settings.clone(), self.clock)?;
        Ok(Box::new(graph))
    }

    fn scan_path(&self, directory: &Path) -> bool {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot scan {}: {}", directory.display(), e);
                return false;
            }
        };

        let mut plugins = lock(&self.plugins);
        let mut changed = false;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(plugin) = file_name.to_str().and_then(plugin_name_from_file) else {
                continue;
            };
            if plugins.insert(plugin.clone()) {
                tracing::debug!("Registered plugin {} from {}", plugin, directory.display());
                changed = true;
            }
        }
        changed
    }

    fn has_plugin(&self, name: &str) -> bool {
        lock(&self.plugins).contains(name)
    }

    fn run_main_loop(&self) {
        let mut st = lock(&self.main_loop);
        st.running = true;
        while !st.quit_requested {
            st = self
                .main_loop_wake
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
        st.quit_requested = false;
        st.running = false;
    }

    fn quit_main_loop(&self) {
        lock(&self.main_loop).quit_requested = true;
        self.main_loop_wake.notify_all();
    }
}
