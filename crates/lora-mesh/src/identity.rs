//! Node identity and broadcast id allocation
//!
//! Every node is addressed by a 32-bit id derived from a hardware
//! identifier. The top 24 bits of that address form the node's broadcast
//! group; the low byte of a broadcast id is a per-node sequence number.

use std::fmt;

/// Mask selecting the broadcast group part of an address
pub const BROADCAST_GROUP_MASK: u32 = 0xFFFF_FF00;

/// Identity of the local mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    address: u32,
}

impl NodeIdentity {
    /// Create an identity from a known node address
    pub fn new(address: u32) -> Self {
        Self { address }
    }

    /// Derive the node address from a LoRaWAN DevEUI
    ///
    /// The address is the last four DevEUI bytes read big-endian.
    pub fn from_dev_eui(dev_eui: [u8; 8]) -> Self {
        Self::new(u32::from_be_bytes([
            dev_eui[4], dev_eui[5], dev_eui[6], dev_eui[7],
        ]))
    }

    /// The node address
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Broadcast group of this node (top 24 bits of the address)
    pub fn broadcast_group(&self) -> u32 {
        self.address & BROADCAST_GROUP_MASK
    }

    /// Check if a broadcast id carries this node's group prefix
    ///
    /// Any node sharing the same top 24 address bits matches as well.
    pub fn owns_broadcast(&self, broadcast_id: u32) -> bool {
        broadcast_id & BROADCAST_GROUP_MASK == self.broadcast_group()
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.address)
    }
}

/// Hands out broadcast ids for frames originated by this node
///
/// Ids keep the node's broadcast group in the upper 24 bits and count up
/// in the low byte, wrapping from 0xFF back to 0x00.
#[derive(Debug, Clone)]
pub struct BroadcastIdAllocator {
    current: u32,
}

impl BroadcastIdAllocator {
    /// Create an allocator for a node
    pub fn new(identity: &NodeIdentity) -> Self {
        Self {
            current: identity.broadcast_group(),
        }
    }

    /// Allocate the next broadcast id
    pub fn next_id(&mut self) -> u32 {
        let seq = (self.current & 0xFF).wrapping_add(1) & 0xFF;
        self.current = (self.current & BROADCAST_GROUP_MASK) | seq;
        self.current
    }

    /// The most recently allocated id
    pub fn current(&self) -> u32 {
        self.current
    }
}
