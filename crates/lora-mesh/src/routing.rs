//! Routing table of known mesh nodes
//!
//! The table is a fixed-capacity list kept in insertion order. Each entry
//! records how to reach one node: directly (`first_hop == 0`) or through a
//! neighbor acting as relay, together with the hop count learned from that
//! neighbor's map.
//!
//! # Update rules
//!
//! - A direct entry always wins. A direct announcement for a known direct
//!   neighbor only refreshes its timestamp; indirect announcements for it
//!   are ignored.
//! - A direct announcement replaces an indirect entry.
//! - Between two indirect entries the lower hop count wins; ties keep the
//!   existing entry.
//! - Inserting a new node into a full table evicts the oldest entry.
//!
//! Replaced entries move to the end of the list, so "oldest" means least
//! recently inserted or replaced.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::DEFAULT_NODE_TIMEOUT;
use crate::frame::MapEntry;

/// How to reach one mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Address of the node
    pub node_id: u32,
    /// Neighbor relaying to the node, 0 if the node is a direct neighbor
    pub first_hop: u32,
    /// Number of hops to the node
    pub hops: u8,
    /// When the entry was last inserted or refreshed
    pub last_seen: Instant,
}

impl Route {
    /// Check if the node is in radio range
    pub fn is_direct(&self) -> bool {
        self.first_hop == 0
    }
}

/// Fixed-capacity routing table
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: Vec<Route>,
    capacity: usize,
    node_timeout: Duration,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new(capacity: usize) -> Self {
        Self::with_timeout(capacity, DEFAULT_NODE_TIMEOUT)
    }

    /// Create an empty table with a custom aging threshold
    pub fn with_timeout(capacity: usize, node_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            node_timeout,
        }
    }

    /// Add or update a node, returns `true` if the table changed
    pub fn add_node(&mut self, id: u32, first_hop: u32, hops: u8) -> bool {
        self.add_node_at(id, first_hop, hops, Instant::now())
    }

    /// [`add_node`](Self::add_node) with an explicit timestamp
    pub fn add_node_at(&mut self, id: u32, first_hop: u32, hops: u8, now: Instant) -> bool {
        if let Some(idx) = self.position(id) {
            let existing = &mut self.entries[idx];
            if existing.is_direct() {
                if first_hop == 0 {
                    existing.last_seen = now;
                }
                trace!("Node {:08X} already exists as direct", id);
                return false;
            }

            if first_hop == 0 {
                debug!("Node {:08X} was a sub, now direct", id);
            } else if existing.hops <= hops {
                trace!(
                    "Node {:08X} exists with {} hops, ignoring route with {}",
                    id,
                    existing.hops,
                    hops
                );
                return false;
            } else {
                debug!(
                    "Node {:08X} found with fewer hops ({} < {})",
                    id, hops, existing.hops
                );
            }
            self.entries.remove(idx);
        } else if self.entries.len() >= self.capacity {
            let evicted = self.entries.remove(0);
            debug!(
                "Routing table full, evicted {:08X} to make room for {:08X}",
                evicted.node_id, id
            );
        }

        self.entries.push(Route {
            node_id: id,
            first_hop,
            hops,
            last_seen: now,
        });
        debug!(
            "Added node {:08X} with first hop {:08X} and {} hops",
            id, first_hop, hops
        );
        true
    }

    /// Look up the route to a node
    pub fn get_route(&self, id: u32) -> Option<Route> {
        self.entries.iter().find(|route| route.node_id == id).copied()
    }

    /// Check if a node is known
    pub fn contains(&self, id: u32) -> bool {
        self.position(id).is_some()
    }

    /// Remove every node reached through `via`, returns how many were removed
    pub fn clear_subs(&mut self, via: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|route| {
            let keep = route.first_hop != via;
            if !keep {
                debug!(
                    "Removed node {:08X} with first hop {:08X}",
                    route.node_id, route.first_hop
                );
            }
            keep
        });
        before - self.entries.len()
    }

    /// Drop timed out and corrupt entries
    ///
    /// Returns `true` if the table was already up to date, `false` if
    /// anything was removed.
    pub fn clean_map(&mut self) -> bool {
        self.clean_map_at(Instant::now())
    }

    /// [`clean_map`](Self::clean_map) against an explicit clock reading
    pub fn clean_map_at(&mut self, now: Instant) -> bool {
        let expired: Vec<Route> = self
            .entries
            .iter()
            .filter(|route| self.is_expired(route, now))
            .copied()
            .collect();
        if expired.is_empty() {
            return true;
        }

        for route in &expired {
            debug!(
                "Node {:08X} with first hop {:08X} timed out or has too many hops",
                route.node_id, route.first_hop
            );
        }
        let lost_relays: Vec<u32> = expired
            .iter()
            .filter(|route| route.is_direct())
            .map(|route| route.node_id)
            .collect();

        self.entries.retain(|route| {
            !expired.iter().any(|gone| gone.node_id == route.node_id)
                && !lost_relays.contains(&route.first_hop)
        });
        false
    }

    /// The table as map entries for a map broadcast
    pub fn node_map(&self) -> Vec<MapEntry> {
        let map: Vec<MapEntry> = self
            .entries
            .iter()
            .map(|route| MapEntry {
                node_id: route.node_id,
                hops: route.hops,
            })
            .collect();
        trace!("Copied {} nodes into map", map.len());
        map
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no node is known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of nodes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry at a table position
    pub fn get(&self, index: usize) -> Option<&Route> {
        self.entries.get(index)
    }

    /// Iterate over entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.entries.iter()
    }

    /// Snapshot of all entries, oldest first
    pub fn routes(&self) -> Vec<Route> {
        self.entries.clone()
    }

    /// Aging threshold for entries
    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Change the aging threshold
    pub fn set_node_timeout(&mut self, timeout: Duration) {
        self.node_timeout = timeout;
    }

    fn position(&self, id: u32) -> Option<usize> {
        self.entries.iter().position(|route| route.node_id == id)
    }

    fn is_expired(&self, route: &Route, now: Instant) -> bool {
        now.saturating_duration_since(route.last_seen) > self.node_timeout
            || route.hops as usize > self.capacity
    }
}
