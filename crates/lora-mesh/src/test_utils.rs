//! Test utilities for exercising the mesh without hardware
//!
//! - [`MockRadio`] records transmitted frames and can pretend to be busy or
//!   refuse frames
//! - [`RecordingEvents`] records everything the core reports to the
//!   application
//! - [`TestMesh`] wires several cores together over a simulated shared
//!   channel where only linked nodes hear each other
//!
//! Both mocks are cheap to clone; clones share their recorded state, so a
//! test can keep a copy after handing the original to a core or service.
//!
//! # Example
//!
//! ```rust,ignore
//! use lora_mesh::test_utils::TestMesh;
//!
//! // A hears B, B hears C, A and C are out of range
//! let mut mesh = TestMesh::line(&[0x11111111, 0x22222222, 0x33333333])?;
//! mesh.sync_all();
//! mesh.sync_all();
//! let route = mesh.node(0x11111111).unwrap().routing_table().get_route(0x33333333);
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::config::MeshConfig;
use crate::error::Result;
use crate::frame::{DataFrame, Frame, MapEntry, MapFrame};
use crate::identity::NodeIdentity;
use crate::interface::{MeshData, MeshEvents, RadioTransport};
use crate::node::{MeshCore, MeshEvent};
use crate::queue::InboundFrame;

/// Upper bound on delivery rounds in [`TestMesh::settle`]
const MAX_SETTLE_ROUNDS: usize = 64;

/// Link quality reported for frames crossing the simulated channel
const SIM_RSSI: i16 = -60;
const SIM_SNR: i8 = 9;

#[derive(Debug, Default)]
struct RadioState {
    sent: Vec<Bytes>,
    busy: bool,
    reject: bool,
}

/// Radio that records frames instead of transmitting them
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MockRadio {
    /// Create an idle radio
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a transmission is in progress
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Refuse every frame handed to the radio
    pub fn set_reject(&self, reject: bool) {
        self.state.lock().reject = reject;
    }

    /// Frames accepted so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    /// Take the frames accepted so far
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.lock().sent)
    }
}

impl RadioTransport for MockRadio {
    fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    fn send(&mut self, frame: &[u8]) -> bool {
        let mut state = self.state.lock();
        if state.reject {
            return false;
        }
        state.sent.push(Bytes::copy_from_slice(frame));
        true
    }
}

#[derive(Debug, Default)]
struct EventLog {
    data: Vec<MeshData>,
    map_changes: usize,
}

/// Event sink that records notifications
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    log: Arc<Mutex<EventLog>>,
}

impl RecordingEvents {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Data delivered so far
    pub fn data(&self) -> Vec<MeshData> {
        self.log.lock().data.clone()
    }

    /// Take the data delivered so far
    pub fn take_data(&self) -> Vec<MeshData> {
        std::mem::take(&mut self.log.lock().data)
    }

    /// Number of map change notifications
    pub fn map_changed_count(&self) -> usize {
        self.log.lock().map_changes
    }
}

impl MeshEvents for RecordingEvents {
    fn on_data(&mut self, data: MeshData) {
        self.log.lock().data.push(data);
    }

    fn on_map_changed(&mut self) {
        self.log.lock().map_changes += 1;
    }
}

// ===== Frame builders =====

/// Encoded map frame from `from` listing `(node_id, hops)` entries
pub fn map_frame(from: u32, entries: &[(u32, u8)]) -> Bytes {
    Frame::from(MapFrame {
        dest: 0,
        from,
        entries: entries
            .iter()
            .map(|&(node_id, hops)| MapEntry { node_id, hops })
            .collect(),
    })
    .encode()
}

/// Encoded direct frame
pub fn direct_frame(dest: u32, from: u32, payload: &[u8]) -> Bytes {
    Frame::from(DataFrame::direct(dest, from, Bytes::copy_from_slice(payload))).encode()
}

/// Encoded forward frame handed to `relay` for `final_dest`
pub fn forward_frame(relay: u32, final_dest: u32, orig: u32, payload: &[u8]) -> Bytes {
    Frame::from(DataFrame::forward(
        relay,
        final_dest,
        orig,
        Bytes::copy_from_slice(payload),
    ))
    .encode()
}

/// Encoded broadcast frame
pub fn broadcast_frame(broadcast_id: u32, from: u32, payload: &[u8]) -> Bytes {
    Frame::from(DataFrame::broadcast(
        broadcast_id,
        from,
        Bytes::copy_from_slice(payload),
    ))
    .encode()
}

/// Encoded map request frame
pub fn map_request_frame(broadcast_id: u32, from: u32) -> Bytes {
    Frame::from(DataFrame::map_request(broadcast_id, from)).encode()
}

// ===== Simulated mesh =====

/// Mesh node backed by the mocks
pub type TestNode = MeshCore<MockRadio, RecordingEvents>;

/// Several mesh nodes sharing a simulated radio channel
///
/// A frame transmitted by one node is received by every node linked to
/// it. Links are symmetric.
pub struct TestMesh {
    nodes: Vec<TestNode>,
    links: HashSet<(u32, u32)>,
    transmissions: Vec<(u32, Bytes)>,
}

impl TestMesh {
    /// Create unlinked nodes
    pub fn new(addresses: &[u32], config: MeshConfig) -> Result<Self> {
        let nodes = addresses
            .iter()
            .map(|&address| {
                MeshCore::new(
                    MockRadio::new(),
                    RecordingEvents::new(),
                    NodeIdentity::new(address),
                    config.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            nodes,
            links: HashSet::new(),
            transmissions: Vec::new(),
        })
    }

    /// Every node hears every other node
    pub fn fully_connected(addresses: &[u32]) -> Result<Self> {
        let mut mesh = Self::new(addresses, MeshConfig::default())?;
        for (idx, &a) in addresses.iter().enumerate() {
            for &b in &addresses[idx + 1..] {
                mesh.link(a, b);
            }
        }
        Ok(mesh)
    }

    /// Each node only hears its neighbors in the list
    pub fn line(addresses: &[u32]) -> Result<Self> {
        let mut mesh = Self::new(addresses, MeshConfig::default())?;
        for pair in addresses.windows(2) {
            mesh.link(pair[0], pair[1]);
        }
        Ok(mesh)
    }

    /// Put two nodes in radio range
    pub fn link(&mut self, a: u32, b: u32) {
        self.links.insert(Self::key(a, b));
    }

    /// Take two nodes out of radio range
    pub fn unlink(&mut self, a: u32, b: u32) {
        self.links.remove(&Self::key(a, b));
    }

    /// Check if two nodes hear each other
    pub fn in_range(&self, a: u32, b: u32) -> bool {
        self.links.contains(&Self::key(a, b))
    }

    /// Node with the given address
    pub fn node(&self, address: u32) -> Option<&TestNode> {
        self.nodes
            .iter()
            .find(|node| node.identity().address() == address)
    }

    /// Node with the given address, mutable
    pub fn node_mut(&mut self, address: u32) -> Option<&mut TestNode> {
        self.nodes
            .iter_mut()
            .find(|node| node.identity().address() == address)
    }

    /// Every frame put on the channel so far, with its sender
    pub fn transmissions(&self) -> &[(u32, Bytes)] {
        &self.transmissions
    }

    /// Fire the sync timer on every node and settle
    pub fn sync_all(&mut self) -> usize {
        for node in &mut self.nodes {
            node.raise(MeshEvent::SyncTimerFired);
        }
        self.settle()
    }

    /// Run all nodes and carry frames until the channel is quiet
    ///
    /// Returns the number of frame receptions.
    pub fn settle(&mut self) -> usize {
        let mut received = 0;
        for round in 0..MAX_SETTLE_ROUNDS {
            for node in &mut self.nodes {
                node.process_pending();
            }

            let in_flight: Vec<(u32, Bytes)> = self
                .nodes
                .iter()
                .flat_map(|node| {
                    let sender = node.identity().address();
                    node.radio()
                        .take_sent()
                        .into_iter()
                        .map(move |raw| (sender, raw))
                })
                .collect();
            if in_flight.is_empty() {
                trace!("Channel quiet after {} rounds", round);
                break;
            }

            for (sender, raw) in in_flight {
                for idx in 0..self.nodes.len() {
                    let receiver = self.nodes[idx].identity().address();
                    if receiver == sender || !self.in_range(sender, receiver) {
                        continue;
                    }
                    let node = &mut self.nodes[idx];
                    if node
                        .enqueue_rx(InboundFrame::new(raw.clone(), SIM_RSSI, SIM_SNR))
                        .is_ok()
                    {
                        received += 1;
                    }
                    node.process_pending();
                }
                self.transmissions.push((sender, raw));
            }
        }
        received
    }

    fn key(a: u32, b: u32) -> (u32, u32) {
        (a.min(b), a.max(b))
    }
}
