//! Integration tests for pipeline and element bridges over the mock engine
//!
//! These tests validate the host-facing workflow:
//! - Construction from descriptions and element lookup
//! - Buffer delivery through `pull` and `push`
//! - Bus subscription and end-of-stream
//! - Teardown ordering and stale callbacks

#![cfg(feature = "mock-engine")]

mod common;

use common::builders::ConfigBuilder;
use common::mock_helpers::{recv_n, TestMessage};
use common::{test_timeout, wait_until};
use media_bridge::engine::MockEngine;
use media_bridge::{BridgeError, MessageType};
use std::time::Duration;

#[test]
fn test_videotestsrc_delivers_buffers() {
    let bridge = ConfigBuilder::new().bridge();
    let pipeline = bridge
        .parse_pipeline("videotestsrc ! appsink name=sink")
        .unwrap();

    let mut sink = pipeline.find_element("sink").expect("sink exists");
    let buffers = sink.pull();
    pipeline.start();

    let buffer = buffers.recv_timeout(test_timeout()).expect("a buffer");
    assert!(!buffer.is_empty());
    assert_eq!(MockEngine::sequence_number(&buffer), Some(0));

    sink.stop();
    pipeline.stop();
    assert!(bridge.registry().is_empty());
}

#[test]
fn test_pull_through_temporary_element_keeps_delivering() {
    let bridge = ConfigBuilder::new().bridge();
    let pipeline = bridge
        .parse_pipeline("videotestsrc num-buffers=2 ! appsink name=sink")
        .unwrap();

    let buffers = pipeline.find_element("sink").unwrap().pull();
    assert_eq!(bridge.registry().element_count(), 1);
    pipeline.start();

    let sequence: Vec<u64> = buffers
        .iter()
        .filter_map(|buffer| MockEngine::sequence_number(&buffer))
        .collect();
    assert_eq!(sequence, vec![0, 1]);
    // Only end-of-stream closed the queue; the handle going away did not.
    assert_eq!(bridge.registry().stats().queues_closed, 1);
    assert_eq!(bridge.registry().element_count(), 1);

    pipeline.stop();
}

#[test]
fn test_malformed_descriptions_register_nothing() {
    let bridge = ConfigBuilder::new().bridge();

    for description in ["", "nosuchelement ! appsink", "videotestsrc ! ! appsink"] {
        let err = bridge.parse_pipeline(description).unwrap_err();
        assert!(
            matches!(err, BridgeError::InvalidGraph(_)),
            "{:?} gave {:?}",
            description,
            err
        );
    }
    assert!(bridge.registry().is_empty());
    assert_eq!(bridge.registry().stats().registered, 0);
}

#[test]
fn test_check_plugins() {
    let bridge = ConfigBuilder::new().bridge();

    let err = bridge.check_plugins(&["nonexistent-plugin-xyz"]).unwrap_err();
    assert!(matches!(err, BridgeError::PluginNotFound(name) if name == "nonexistent-plugin-xyz"));
    assert_eq!(
        err_message(&bridge.check_plugins(&["nonexistent-plugin-xyz"])),
        "Required plugin nonexistent-plugin-xyz not found"
    );

    let none: [&str; 0] = [];
    assert!(bridge.check_plugins(&none).is_ok());
    assert!(bridge.check_plugins(&["app", "coreelements"]).is_ok());
}

fn err_message(result: &media_bridge::Result<()>) -> String {
    match result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}

#[test]
fn test_element_stop_without_pull() {
    let bridge = ConfigBuilder::new().bridge();
    let pipeline = bridge
        .parse_pipeline("appsrc name=src ! appsink name=sink")
        .unwrap();

    let mut src = pipeline.element("src").unwrap();
    src.stop();

    assert!(!bridge.registry().contains_element(src.id()));
    assert_eq!(bridge.registry().stats().queues_closed, 0);
    pipeline.stop();
}

#[test]
fn test_pull_twice_returns_same_source() {
    let bridge = ConfigBuilder::new().bridge();
    let pipeline = bridge
        .parse_pipeline("videotestsrc ! appsink name=sink")
        .unwrap();

    let mut sink = pipeline.element("sink").unwrap();
    let first = sink.pull();
    let second = sink.pull();
    assert!(first.same_channel(&second));
    assert_eq!(first.capacity(), Some(10));

    pipeline.stop();
    sink.stop();
}

#[test]
fn test_appsrc_loopback_preserves_order() {
    let bridge = ConfigBuilder::new().bridge();
    let pipeline = bridge
        .parse_pipeline("appsrc name=src ! queue ! appsink name=sink")
        .unwrap();

    let mut src = pipeline.element("src").unwrap();
    let mut sink = pipeline.element("sink").unwrap();
    src.set_capabilities("video/x-raw,format=RGB,width=4,height=4");
    let buffers = sink.pull();
    pipeline.start();

    let frames: [&[u8]; 3] = [b"B1", b"B2", b"B3"];
    for frame in frames {
        src.push(frame);
    }
    let received = recv_n(&buffers, 3, test_timeout());
    assert_eq!(received, vec![b"B1".to_vec(), b"B2".to_vec(), b"B3".to_vec()]);

    pipeline.send_end_of_stream();
    assert!(buffers.recv_timeout(test_timeout()).is_err());
    assert!(sink.is_terminated());

    src.stop();
    sink.stop();
    pipeline.stop();
    assert!(bridge.registry().is_empty());
}

#[test]
fn test_num_buffers_ends_stream_and_posts_eos() {
    let bridge = ConfigBuilder::new().bridge();
    let mut pipeline = bridge
        .parse_pipeline("videotestsrc num-buffers=3 ! videoconvert ! appsink name=sink")
        .unwrap();

    let messages = pipeline.subscribe_messages();
    let mut sink = pipeline.element("sink").unwrap();
    let buffers = sink.pull();
    pipeline.start();

    let sequence: Vec<u64> = buffers
        .iter()
        .filter_map(|buffer| MockEngine::sequence_number(&buffer))
        .collect();
    assert_eq!(sequence, vec![0, 1, 2]);

    let first = messages.recv_timeout(test_timeout()).unwrap();
    assert_eq!(first.message_type(), MessageType::StateChanged);
    assert_eq!(first.detail(), Some("NULL -> PLAYING"));
    let second = messages.recv_timeout(test_timeout()).unwrap();
    assert!(second.is_eos());
    assert_eq!(second.source(), Some("pipeline0"));

    // End-of-stream already closed the queue; stop must not close it again.
    sink.stop();
    pipeline.stop();
    assert_eq!(bridge.registry().stats().queues_closed, 2);
    assert!(messages.recv().is_err());
}

#[test]
fn test_stopped_pipeline_id_is_invisible() {
    let bridge = ConfigBuilder::new().bridge();
    let mut pipeline = bridge.parse_pipeline("fakesrc ! fakesink").unwrap();
    let id = pipeline.id();
    let messages = pipeline.subscribe_messages();

    pipeline.stop();
    let stale_before = bridge.registry().stats().stale_discarded;

    bridge
        .dispatcher()
        .on_bus_message(&TestMessage::new(MessageType::Error, 1), id);

    assert!(bridge.registry().lookup(id.raw()).is_none());
    assert_eq!(bridge.registry().stats().stale_discarded, stale_before + 1);
    // Only what the engine posted before the stop can be drained.
    assert!(messages.iter().all(|m| m.message_type() != MessageType::Error));
}

#[test]
fn test_stop_releases_blocked_streaming_thread() {
    let bridge = ConfigBuilder::new()
        .buffer_capacity(1)
        .buffer_interval_ms(0)
        .bridge();
    let pipeline = bridge
        .parse_pipeline("videotestsrc ! appsink name=sink")
        .unwrap();
    let mut sink = pipeline.element("sink").unwrap();
    let buffers = sink.pull();
    pipeline.start();

    // Nobody reads: the streaming thread ends up retrying on a full queue.
    assert!(wait_until(test_timeout(), || buffers.is_full()));
    std::thread::sleep(Duration::from_millis(10));

    sink.stop();
    pipeline.stop();
    assert!(bridge.registry().is_empty());
    assert_eq!(buffers.len(), 1);
}

#[test]
fn test_dropping_pipeline_tears_down() {
    let bridge = ConfigBuilder::new().bridge();
    {
        let mut pipeline = bridge
            .parse_pipeline("audiotestsrc ! audioconvert ! fakesink")
            .unwrap();
        let _messages = pipeline.subscribe_messages();
        pipeline.start();
        assert_eq!(bridge.registry().pipeline_count(), 1);
    }
    assert_eq!(bridge.registry().pipeline_count(), 0);
    assert_eq!(bridge.registry().stats().queues_closed, 1);
}

#[test]
fn test_parameters_on_mock_graph() {
    let bridge = ConfigBuilder::new().bridge();
    let pipeline = bridge.parse_pipeline("fakesrc ! identity ! fakesink").unwrap();

    assert_eq!(pipeline.latency(), media_bridge::engine::CLOCK_TIME_NONE);
    pipeline.set_latency(40_000_000);
    pipeline.set_delay(1_000);
    pipeline.set_auto_flush_bus(false);

    assert_eq!(pipeline.latency(), 40_000_000);
    assert_eq!(pipeline.delay(), 1_000);
    assert!(!pipeline.auto_flush_bus());
    pipeline.stop();
}

#[test]
fn test_pause_then_start_reports_both_transitions() {
    let bridge = ConfigBuilder::new().bridge();
    let mut pipeline = bridge.parse_pipeline("fakesrc ! fakesink").unwrap();
    let messages = pipeline.subscribe_messages();

    pipeline.pause();
    pipeline.start();

    let details: Vec<String> = recv_n(&messages, 2, test_timeout())
        .iter()
        .filter_map(|m| m.detail().map(str::to_string))
        .collect();
    assert_eq!(details, ["NULL -> PAUSED", "PAUSED -> PLAYING"]);
    pipeline.stop();
}
