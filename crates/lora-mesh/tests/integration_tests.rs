//! Integration tests for the LoRa mesh
//!
//! These tests drive complete nodes through the public API:
//! - Map processing and route learning
//! - Relaying over indirect routes
//! - Topology discovery triggered by unknown senders
//! - Multi-hop delivery over a simulated channel where not every node
//!   hears every other node
//! - Broadcast flooding with duplicate suppression

use bytes::Bytes;
use lora_mesh::test_utils::{direct_frame, forward_frame, map_frame, TestMesh, TestNode};
use lora_mesh::{
    DataFrame, Frame, FrameKind, InboundFrame, MeshConfigBuilder, MeshCore, MockRadio,
    NodeIdentity, RecordingEvents,
};
use std::time::Duration;

const A: u32 = 0x11111111;
const B: u32 = 0x22222222;
const C: u32 = 0x33333333;
const D: u32 = 0x44444444;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lora_mesh=debug,integration_tests=debug")
        .try_init();
}

fn standalone(address: u32) -> (TestNode, MockRadio, RecordingEvents) {
    let radio = MockRadio::new();
    let events = RecordingEvents::new();
    let core = MeshCore::new(
        radio.clone(),
        events.clone(),
        NodeIdentity::new(address),
        Default::default(),
    )
    .expect("valid config");
    (core, radio, events)
}

fn receive(core: &mut TestNode, raw: Bytes) {
    core.enqueue_rx(InboundFrame::new(raw, -85, 7))
        .expect("rx queue has room");
    core.process_pending();
}

fn decode_all(frames: &[Bytes]) -> Vec<Frame> {
    frames
        .iter()
        .map(|raw| Frame::decode(raw).expect("valid frame"))
        .collect()
}

fn count_kind(mesh: &TestMesh, kind: FrameKind) -> usize {
    mesh.transmissions()
        .iter()
        .filter(|(_, raw)| matches!(Frame::decode(raw), Ok(frame) if frame.kind() == kind))
        .count()
}

// ============================================================================
// Single node scenarios
// ============================================================================

#[test]
fn test_map_from_neighbor_adds_direct_and_indirect_routes() {
    init_tracing();
    let (mut a, _radio, events) = standalone(A);

    receive(&mut a, map_frame(B, &[(C, 0)]));

    let b = a.routing_table().get_route(B).expect("route to B");
    assert_eq!(b.first_hop, 0);
    let c = a.routing_table().get_route(C).expect("route to C");
    assert_eq!(c.first_hop, B);
    assert_eq!(c.hops, 1);
    assert_eq!(events.map_changed_count(), 1);
}

#[test]
fn test_forward_over_indirect_route_goes_to_first_hop() {
    init_tracing();
    let (mut a, radio, events) = standalone(A);
    receive(&mut a, map_frame(B, &[(C, 0)]));
    receive(&mut a, map_frame(D, &[]));

    receive(&mut a, forward_frame(A, C, D, b"reading"));

    assert!(events.data().is_empty(), "frame must not be delivered locally");
    let sent = decode_all(&radio.sent());
    assert_eq!(sent.len(), 1);
    let Frame::Data(relayed) = &sent[0] else {
        panic!("expected a data frame");
    };
    assert_eq!(relayed.kind, FrameKind::Forward);
    assert_eq!(relayed.dest, B);
    assert_eq!(relayed.final_destination(), C);
    assert_eq!(relayed.orig, D);
}

#[test]
fn test_direct_from_unknown_sender_triggers_map_request() {
    init_tracing();
    let (mut a, radio, events) = standalone(A);

    receive(&mut a, direct_frame(A, B, b"who am i"));

    let data = events.data();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].from, B);
    assert_eq!(data[0].rssi, -85);
    assert!(!data[0].was_broadcast);

    let sent = decode_all(&radio.sent());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), FrameKind::MapRequest);
    assert_eq!(a.stats().map_requests_sent, 1);
}

#[test]
fn test_known_sender_does_not_trigger_map_request() {
    let (mut a, radio, events) = standalone(A);
    receive(&mut a, map_frame(B, &[]));
    receive(&mut a, direct_frame(A, B, b"hello"));

    assert_eq!(events.data().len(), 1);
    assert!(radio.sent().is_empty());
}

#[test]
fn test_corrupt_frames_leave_state_untouched() {
    let (mut a, radio, events) = standalone(A);
    let map = map_frame(B, &[(C, 0)]);

    receive(&mut a, map.slice(..map.len() - 1));
    receive(&mut a, Bytes::from_static(b"LoR"));
    receive(&mut a, Bytes::from_static(b"\x00\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c"));

    assert!(a.routing_table().is_empty());
    assert!(events.data().is_empty());
    assert!(radio.sent().is_empty());
    assert_eq!(a.stats().malformed_frames, 3);
    assert_eq!(a.stats().frames_received, 3);
}

// ============================================================================
// Simulated mesh scenarios
// ============================================================================

#[test]
fn test_line_topology_learns_two_hop_routes() {
    init_tracing();
    let mut mesh = TestMesh::line(&[A, B, C]).unwrap();

    mesh.sync_all();
    let a = mesh.node(A).unwrap();
    assert!(a.routing_table().get_route(B).unwrap().is_direct());
    assert!(!a.routing_table().contains(C));

    mesh.sync_all();
    let a = mesh.node(A).unwrap();
    let c = a.routing_table().get_route(C).expect("A learned C");
    assert_eq!(c.first_hop, B);
    assert_eq!(c.hops, 1);

    let c_node = mesh.node(C).unwrap();
    let a_route = c_node.routing_table().get_route(A).expect("C learned A");
    assert_eq!(a_route.first_hop, B);

    let b = mesh.node(B).unwrap();
    assert!(b.routing_table().get_route(A).unwrap().is_direct());
    assert!(b.routing_table().get_route(C).unwrap().is_direct());
}

#[test]
fn test_multi_hop_delivery_through_relay() {
    init_tracing();
    let mut mesh = TestMesh::line(&[A, B, C]).unwrap();
    mesh.sync_all();
    mesh.sync_all();

    mesh.node_mut(A)
        .unwrap()
        .send_to_mesh(false, C, Bytes::from_static(b"21.5C"))
        .unwrap();
    mesh.settle();

    let received = mesh.node(C).unwrap().events().take_data();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from, A);
    assert_eq!(&received[0].payload[..], b"21.5C");
    assert!(!received[0].was_broadcast);

    assert_eq!(mesh.node(B).unwrap().stats().frames_forwarded, 1);
    assert!(mesh.node(B).unwrap().events().data().is_empty());
    assert!(mesh.node(A).unwrap().events().data().is_empty());
}

#[test]
fn test_three_hop_delivery() {
    init_tracing();
    let mut mesh = TestMesh::line(&[A, B, C, D]).unwrap();
    for _ in 0..3 {
        mesh.sync_all();
    }

    let route = mesh
        .node(A)
        .unwrap()
        .routing_table()
        .get_route(D)
        .expect("A learned D");
    assert_eq!(route.first_hop, B);
    assert_eq!(route.hops, 2);

    mesh.node_mut(D)
        .unwrap()
        .send_to_mesh(false, A, Bytes::from_static(b"far away"))
        .unwrap();
    mesh.settle();

    let received = mesh.node(A).unwrap().events().take_data();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from, D);
    assert_eq!(mesh.node(C).unwrap().stats().frames_forwarded, 1);
    assert_eq!(mesh.node(B).unwrap().stats().frames_forwarded, 1);
}

#[test]
fn test_broadcast_floods_once_per_node() {
    init_tracing();
    let mut mesh = TestMesh::line(&[A, B, C, D]).unwrap();
    for _ in 0..3 {
        mesh.sync_all();
    }
    let before = count_kind(&mesh, FrameKind::Broadcast);

    mesh.node_mut(A)
        .unwrap()
        .send_to_mesh(true, 0, Bytes::from_static(b"alarm"))
        .unwrap();
    mesh.settle();

    for address in [B, C, D] {
        let data = mesh.node(address).unwrap().events().take_data();
        assert_eq!(data.len(), 1, "node {:08X} delivers once", address);
        assert_eq!(data[0].from, A);
        assert!(data[0].was_broadcast);
    }
    assert!(mesh.node(A).unwrap().events().data().is_empty());

    // Originator plus one re-transmission per other node
    assert_eq!(count_kind(&mesh, FrameKind::Broadcast) - before, 4);
    assert_eq!(mesh.node(A).unwrap().stats().own_echoes, 1);
}

#[test]
fn test_broadcast_dedup_in_fully_connected_mesh() {
    init_tracing();
    let mut mesh = TestMesh::fully_connected(&[A, B, C]).unwrap();
    mesh.sync_all();

    mesh.node_mut(B)
        .unwrap()
        .send_to_mesh(true, 0, Bytes::from_static(b"ping"))
        .unwrap();
    mesh.settle();

    for address in [A, C] {
        let node = mesh.node(address).unwrap();
        assert_eq!(node.events().take_data().len(), 1);
        assert_eq!(node.stats().duplicate_broadcasts, 1);
    }
    assert_eq!(mesh.node(B).unwrap().stats().own_echoes, 2);
}

#[test]
fn test_map_request_pulls_neighbor_maps() {
    init_tracing();
    let mut mesh = TestMesh::line(&[A, B]).unwrap();

    mesh.node_mut(A).unwrap().send_map_request().unwrap();
    mesh.settle();

    assert!(mesh.node(A).unwrap().routing_table().contains(B));
    assert_eq!(mesh.node(B).unwrap().stats().maps_sent, 1);
    assert_eq!(mesh.node(A).unwrap().stats().own_echoes, 1);
}

#[test]
fn test_lost_link_is_aged_out() {
    init_tracing();
    let config = MeshConfigBuilder::new()
        .send_interval(Duration::from_millis(5))
        .build();
    assert_eq!(config.node_timeout(), Duration::from_millis(500));

    let mut mesh = TestMesh::new(&[A, B, C], config).unwrap();
    mesh.link(A, B);
    mesh.link(B, C);
    mesh.sync_all();
    mesh.sync_all();
    assert!(mesh.node(A).unwrap().routing_table().contains(C));

    mesh.unlink(B, C);
    std::thread::sleep(Duration::from_millis(600));
    mesh.sync_all();
    mesh.sync_all();

    let a = mesh.node(A).unwrap();
    assert!(a.routing_table().contains(B));
    assert!(!a.routing_table().contains(C));
    assert!(!mesh.node(B).unwrap().routing_table().contains(C));
}

#[test]
fn test_relay_rewrites_to_direct_for_neighbor() {
    let mut mesh = TestMesh::line(&[A, B, C]).unwrap();
    mesh.sync_all();
    mesh.sync_all();

    mesh.node_mut(A)
        .unwrap()
        .send_to_mesh(false, C, Bytes::from_static(b"x"))
        .unwrap();
    mesh.settle();

    let relayed: Vec<DataFrame> = mesh
        .transmissions()
        .iter()
        .filter(|(sender, _)| *sender == B)
        .filter_map(|(_, raw)| match Frame::decode(raw) {
            Ok(Frame::Data(data)) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].kind, FrameKind::Direct);
    assert_eq!(relayed[0].dest, C);
    assert_eq!(relayed[0].originator(), A);
}
