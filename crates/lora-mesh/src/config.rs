//! Configuration types for the mesh node
//!
//! This module holds the wire-level protocol constants and the
//! [`MeshConfig`] blob that a device persists between boots: table
//! capacity, queue sizes, map sync timing, the node's own send interval
//! and an optional static master node.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{MeshError, Result};
use crate::identity::NodeIdentity;

/// Marker bytes at the start of every mesh frame
pub const MESH_MAGIC: [u8; 3] = *b"LoR";

/// Maximum size of a single radio frame
pub const MAX_FRAME_LEN: usize = 256;

/// Size of a map frame before its node list
pub const MAP_HEADER_LEN: usize = 12;

/// Size of a data frame before its payload
pub const DATA_HEADER_LEN: usize = 16;

/// Size of one node entry in a map frame (4 byte id + 1 byte hop count)
pub const MAP_ENTRY_LEN: usize = 5;

/// Marker closing the node list of a map frame
pub const MAP_END_MARKER: [u8; MAP_ENTRY_LEN] = [0xAA, 0x55, 0x00, 0xFF, 0xAA];

/// Largest application payload that fits a data frame
pub const MAX_DATA_PAYLOAD: usize = MAX_FRAME_LEN - DATA_HEADER_LEN;

/// Number of node entries a map frame can carry next to its end marker
pub const MAX_MAP_ENTRIES: usize = (MAX_FRAME_LEN - MAP_HEADER_LEN) / MAP_ENTRY_LEN - 1;

/// Default routing table capacity
pub const DEFAULT_NODE_CAPACITY: usize = 30;

/// Default inbound queue size
pub const DEFAULT_RX_QUEUE_SIZE: usize = 4;

/// Default outbound queue size
pub const DEFAULT_TX_QUEUE_SIZE: usize = 2;

/// Default number of remembered broadcast ids
pub const DEFAULT_BROADCAST_HISTORY: usize = 10;

/// Map sync period right after boot
pub const INITIAL_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Map sync period once the mesh has settled
pub const STEADY_SYNC_INTERVAL: Duration = Duration::from_secs(600);

/// Number of fast map syncs before relaxing to the steady period
pub const INITIAL_SYNC_CYCLES: u8 = 10;

/// Node timeout used when the send interval is not configured
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Multiplier from the node's send interval to the route aging threshold
pub const NODE_TIMEOUT_FACTOR: u32 = 100;

/// Hardware class of the device, sets the routing table capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Small-RAM modules (RAK3172 class)
    Constrained,
    /// Everything else (RAK4630 class)
    Standard,
}

impl DeviceClass {
    /// Routing table capacity for this device class
    pub fn node_capacity(&self) -> usize {
        match self {
            DeviceClass::Constrained => 15,
            DeviceClass::Standard => DEFAULT_NODE_CAPACITY,
        }
    }
}

/// Main configuration for a mesh node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Routing table capacity
    #[serde(default = "default_node_capacity")]
    pub node_capacity: usize,

    /// Inbound frame queue size
    #[serde(default = "default_rx_queue_size")]
    pub rx_queue_size: usize,

    /// Outbound message queue size
    #[serde(default = "default_tx_queue_size")]
    pub tx_queue_size: usize,

    /// Number of broadcast ids remembered for loop prevention
    #[serde(default = "default_broadcast_history")]
    pub broadcast_history_size: usize,

    /// Map sync period right after boot
    #[serde(with = "humantime_serde", default = "default_initial_sync_interval")]
    pub initial_sync_interval: Duration,

    /// Map sync period after the initial cycles
    #[serde(with = "humantime_serde", default = "default_steady_sync_interval")]
    pub steady_sync_interval: Duration,

    /// Number of map syncs run at the initial period
    #[serde(default = "default_initial_sync_cycles")]
    pub initial_sync_cycles: u8,

    /// Application send interval of this node (zero if not sending)
    #[serde(with = "humantime_serde", default)]
    pub send_interval: Duration,

    /// Static master node that application data is sent to
    #[serde(default)]
    pub master_node: Option<u32>,
}

fn default_node_capacity() -> usize {
    DEFAULT_NODE_CAPACITY
}

fn default_rx_queue_size() -> usize {
    DEFAULT_RX_QUEUE_SIZE
}

fn default_tx_queue_size() -> usize {
    DEFAULT_TX_QUEUE_SIZE
}

fn default_broadcast_history() -> usize {
    DEFAULT_BROADCAST_HISTORY
}

fn default_initial_sync_interval() -> Duration {
    INITIAL_SYNC_INTERVAL
}

fn default_steady_sync_interval() -> Duration {
    STEADY_SYNC_INTERVAL
}

fn default_initial_sync_cycles() -> u8 {
    INITIAL_SYNC_CYCLES
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_capacity: DEFAULT_NODE_CAPACITY,
            rx_queue_size: DEFAULT_RX_QUEUE_SIZE,
            tx_queue_size: DEFAULT_TX_QUEUE_SIZE,
            broadcast_history_size: DEFAULT_BROADCAST_HISTORY,
            initial_sync_interval: INITIAL_SYNC_INTERVAL,
            steady_sync_interval: STEADY_SYNC_INTERVAL,
            initial_sync_cycles: INITIAL_SYNC_CYCLES,
            send_interval: Duration::ZERO,
            master_node: None,
        }
    }
}

impl MeshConfig {
    /// Age after which a route that was not refreshed is dropped
    ///
    /// All nodes are assumed to send on the same interval, so the local
    /// send interval stands in for everyone's.
    pub fn node_timeout(&self) -> Duration {
        if self.send_interval.is_zero() {
            DEFAULT_NODE_TIMEOUT
        } else {
            self.send_interval.saturating_mul(NODE_TIMEOUT_FACTOR)
        }
    }

    /// Check the configuration against the local identity
    pub fn validate(&self, identity: &NodeIdentity) -> Result<()> {
        if self.node_capacity == 0 || self.node_capacity > MAX_MAP_ENTRIES {
            return Err(MeshError::InvalidConfig(format!(
                "node_capacity must be between 1 and {}, got {}",
                MAX_MAP_ENTRIES, self.node_capacity
            )));
        }
        if self.rx_queue_size == 0 || self.tx_queue_size == 0 {
            return Err(MeshError::InvalidConfig(
                "queue sizes must be non-zero".to_string(),
            ));
        }
        if self.broadcast_history_size == 0 {
            return Err(MeshError::InvalidConfig(
                "broadcast_history_size must be non-zero".to_string(),
            ));
        }
        if self.initial_sync_interval.is_zero() || self.steady_sync_interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "sync intervals must be non-zero".to_string(),
            ));
        }
        if let Some(master) = self.master_node {
            if master == 0 || master == identity.address() {
                return Err(MeshError::InvalidMasterNode(master));
            }
        }
        Ok(())
    }

    /// Load a persisted configuration blob
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: MeshConfig = serde_json::from_str(&raw)?;
        debug!(
            path = %path.display(),
            send_interval = ?config.send_interval,
            master_node = ?config.master_node,
            "Loaded mesh configuration"
        );
        Ok(config)
    }

    /// Persist the configuration blob
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!(path = %path.display(), "Saved mesh configuration");
        Ok(())
    }
}

/// Builder for MeshConfig
#[derive(Debug, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the routing table for a device class
    pub fn device_class(mut self, class: DeviceClass) -> Self {
        self.config.node_capacity = class.node_capacity();
        self
    }

    /// Set routing table capacity
    pub fn node_capacity(mut self, capacity: usize) -> Self {
        self.config.node_capacity = capacity.min(MAX_MAP_ENTRIES);
        self
    }

    /// Set inbound queue size
    pub fn rx_queue_size(mut self, size: usize) -> Self {
        self.config.rx_queue_size = size;
        self
    }

    /// Set outbound queue size
    pub fn tx_queue_size(mut self, size: usize) -> Self {
        self.config.tx_queue_size = size;
        self
    }

    /// Set broadcast history size
    pub fn broadcast_history_size(mut self, size: usize) -> Self {
        self.config.broadcast_history_size = size;
        self
    }

    /// Set map sync timing
    pub fn sync_intervals(mut self, initial: Duration, steady: Duration, cycles: u8) -> Self {
        self.config.initial_sync_interval = initial;
        self.config.steady_sync_interval = steady;
        self.config.initial_sync_cycles = cycles;
        self
    }

    /// Set the node's application send interval
    pub fn send_interval(mut self, interval: Duration) -> Self {
        self.config.send_interval = interval;
        self
    }

    /// Set a static master node
    pub fn master_node(mut self, address: u32) -> Self {
        self.config.master_node = Some(address);
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeshConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
