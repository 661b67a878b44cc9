//! Adaptive map sync interval
//!
//! Right after boot a node syncs its map often so that the mesh converges
//! quickly. After a fixed number of syncs it relaxes to a long steady
//! interval to save airtime; the switch is permanent.

use std::time::Duration;
use tracing::info;

use crate::config::MeshConfig;

/// Countdown from the initial to the steady sync interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSyncSchedule {
    initial: Duration,
    steady: Duration,
    remaining_cycles: u8,
}

impl MapSyncSchedule {
    /// Create a schedule
    pub fn new(initial: Duration, steady: Duration, cycles: u8) -> Self {
        Self {
            initial,
            steady,
            remaining_cycles: cycles,
        }
    }

    /// Create a schedule from the node configuration
    pub fn from_config(config: &MeshConfig) -> Self {
        Self::new(
            config.initial_sync_interval,
            config.steady_sync_interval,
            config.initial_sync_cycles,
        )
    }

    /// Interval until the next sync
    pub fn interval(&self) -> Duration {
        if self.remaining_cycles > 0 {
            self.initial
        } else {
            self.steady
        }
    }

    /// Count one completed sync, returns the interval to the next one
    pub fn on_sync(&mut self) -> Duration {
        if self.remaining_cycles > 0 {
            self.remaining_cycles -= 1;
            if self.remaining_cycles == 0 {
                info!(
                    "Switching map sync interval to {}",
                    humantime::format_duration(self.steady)
                );
            }
        }
        self.interval()
    }

    /// Syncs left at the initial interval
    pub fn remaining_cycles(&self) -> u8 {
        self.remaining_cycles
    }

    /// Check if the schedule settled on the steady interval
    pub fn is_steady(&self) -> bool {
        self.remaining_cycles == 0
    }
}

impl Default for MapSyncSchedule {
    fn default() -> Self {
        Self::from_config(&MeshConfig::default())
    }
}
