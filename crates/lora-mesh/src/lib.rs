//! LoRa mesh networking core
//!
//! This crate implements a small distance-vector mesh for single-channel
//! LoRa radios. Nodes learn the topology from periodic map broadcasts,
//! relay unicast data hop by hop and flood broadcasts with duplicate
//! suppression.
//!
//! # Architecture
//!
//! The crate is split in four layers:
//!
//! 1. **Routing Table** - known nodes, first hops and hop counts
//! 2. **Message Router** - frame classification, delivery, forwarding and
//!    broadcast loop prevention
//! 3. **Map Synchronizer** - periodic map broadcasts on an adaptive interval
//! 4. **Transport Boundary** - [`RadioTransport`] and [`MeshEvents`] traits
//!    implemented by the radio driver and the application
//!
//! [`MeshCore`] owns all of this state and is driven by [`MeshEvent`]s from
//! a single task. [`MeshService`] hosts it on tokio.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lora_mesh::{ChannelEvents, MeshConfigBuilder, MeshService, NodeIdentity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = NodeIdentity::from_dev_eui([0xAC, 0x1F, 0x09, 0xFF, 0x6F, 0xA6, 0xBC, 0x6C]);
//!     let config = MeshConfigBuilder::new()
//!         .send_interval(std::time::Duration::from_secs(60))
//!         .build();
//!
//!     let (events, mut notifications) = ChannelEvents::new(16);
//!     let (service, handle) = MeshService::new(MyRadio::open()?, events, identity, config)?;
//!     tokio::spawn(service.run());
//!
//!     handle.send(true, 0, "hello mesh".into()).await?;
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{:?}", notification);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Frame Types
//!
//! | Type | Name       | Handling                                            |
//! |------|------------|-----------------------------------------------------|
//! | 1    | Direct     | delivered if addressed to this node                 |
//! | 2    | Forward    | delivered at the final destination, relayed by the addressed relay |
//! | 3    | Broadcast  | flooded once and delivered                          |
//! | 4    | Map        | updates the routing table                           |
//! | 5    | MapRequest | flooded once, triggers a map sync                   |
//!
//! Frames are at most 256 bytes, see [`frame`] for the layout.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Wire level
pub mod config;
pub mod error;
pub mod frame;
pub mod identity;

// Routing state
pub mod history;
pub mod queue;
pub mod routing;
pub mod sync;

// Collaborators and dispatch
pub mod interface;
pub mod node;
pub mod service;

// Testing utilities
pub mod test_utils;

pub use config::{DeviceClass, MeshConfig, MeshConfigBuilder};
pub use error::{MeshError, Result};
pub use frame::{DataFrame, Frame, FrameKind, MapEntry, MapFrame};
pub use identity::{BroadcastIdAllocator, NodeIdentity};

pub use history::BroadcastHistory;
pub use queue::{BoundedQueue, InboundFrame, OutboundMessage};
pub use routing::{Route, RoutingTable};
pub use sync::MapSyncSchedule;

pub use interface::{ChannelEvents, MeshData, MeshEvents, MeshNotification, RadioTransport};
pub use node::{MeshCore, MeshEvent, MeshStats};
pub use service::{MeshCommand, MeshHandle, MeshService};

pub use test_utils::{MockRadio, RecordingEvents, TestMesh};

// Protocol constants re-exports
pub use config::{
    DATA_HEADER_LEN, MAP_END_MARKER, MAP_HEADER_LEN, MAX_DATA_PAYLOAD, MAX_FRAME_LEN,
    MAX_MAP_ENTRIES, MESH_MAGIC,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
