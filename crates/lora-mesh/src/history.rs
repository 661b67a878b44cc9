//! Broadcast history for flood loop prevention
//!
//! Every node re-transmits a broadcast the first time it hears it. The
//! history remembers the ids of the last few broadcasts handled so that
//! echoes from neighbors are dropped instead of flooding forever.
//!
//! Lookups do not refresh an id, so the history behaves as a ring: once
//! more distinct ids than its capacity were recorded, the oldest one is
//! forgotten.

use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::trace;

use crate::config::DEFAULT_BROADCAST_HISTORY;

/// Fixed-size set of recently handled broadcast ids
#[derive(Debug)]
pub struct BroadcastHistory {
    seen: LruCache<u32, ()>,
}

impl BroadcastHistory {
    /// Create a history remembering `capacity` ids
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Check an id and record it if it is new
    ///
    /// Returns `true` if the id was already handled.
    pub fn check_and_record(&mut self, broadcast_id: u32) -> bool {
        if self.seen.contains(&broadcast_id) {
            trace!("Broadcast {:08X} already handled", broadcast_id);
            return true;
        }
        self.record(broadcast_id);
        false
    }

    /// Record an id without checking it
    pub fn record(&mut self, broadcast_id: u32) {
        if let Some((evicted, ())) = self.seen.push(broadcast_id, ()) {
            if evicted != broadcast_id {
                trace!("Broadcast {:08X} dropped from history", evicted);
            }
        }
    }

    /// Check if an id was handled
    pub fn contains(&self, broadcast_id: u32) -> bool {
        self.seen.contains(&broadcast_id)
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no id is remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Maximum number of remembered ids
    pub fn capacity(&self) -> usize {
        self.seen.cap().get()
    }
}

impl Default for BroadcastHistory {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_HISTORY)
    }
}
