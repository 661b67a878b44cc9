//! Collaborator interfaces of the mesh core
//!
//! The core never talks to hardware or the application directly. It is
//! handed:
//!
//! - a [`RadioTransport`] that accepts frames for transmission
//! - a [`MeshEvents`] sink that receives application data and topology
//!   change notifications
//!
//! Received frames flow the other way: the radio driver's receive path
//! pushes them into the core's inbound queue.
//!
//! [`ChannelEvents`] is a ready-made sink that forwards notifications into
//! a tokio channel for hosted applications.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

/// Radio driver used to transmit frames
///
/// Both calls must return immediately; the dispatcher never waits on the
/// radio.
pub trait RadioTransport {
    /// Check if the radio is currently transmitting or receiving
    fn is_busy(&self) -> bool;

    /// Submit a frame for transmission
    ///
    /// Returns `false` if the driver refused the frame. The core does not
    /// retry refused frames.
    fn send(&mut self, frame: &[u8]) -> bool;
}

impl<R: RadioTransport + ?Sized> RadioTransport for Box<R> {
    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn send(&mut self, frame: &[u8]) -> bool {
        (**self).send(frame)
    }
}

/// Application data delivered by the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshData {
    /// Node that originated the data
    pub from: u32,
    /// Application payload
    pub payload: Bytes,
    /// Signal strength of the last hop in dBm
    pub rssi: i16,
    /// Signal to noise ratio of the last hop in dB
    pub snr: i8,
    /// Whether the data was flooded to all nodes
    pub was_broadcast: bool,
}

/// Consumer of mesh notifications
///
/// Called synchronously from the dispatcher, implementations must not
/// block.
pub trait MeshEvents {
    /// Data addressed to this node or broadcast to everyone arrived
    fn on_data(&mut self, data: MeshData);

    /// The routing table changed shape
    fn on_map_changed(&mut self) {}
}

impl<E: MeshEvents + ?Sized> MeshEvents for Box<E> {
    fn on_data(&mut self, data: MeshData) {
        (**self).on_data(data)
    }

    fn on_map_changed(&mut self) {
        (**self).on_map_changed()
    }
}

/// Notification forwarded by [`ChannelEvents`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshNotification {
    /// Application data arrived
    Data(MeshData),
    /// The routing table changed
    MapChanged,
}

/// [`MeshEvents`] sink that forwards into a bounded channel
///
/// A full or closed channel drops the notification.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::Sender<MeshNotification>,
}

impl ChannelEvents {
    /// Create a sink and the receiver for its notifications
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MeshNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn forward(&self, notification: MeshNotification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!("Dropping mesh notification: {}", e);
        }
    }
}

impl MeshEvents for ChannelEvents {
    fn on_data(&mut self, data: MeshData) {
        self.forward(MeshNotification::Data(data));
    }

    fn on_map_changed(&mut self) {
        self.forward(MeshNotification::MapChanged);
    }
}
