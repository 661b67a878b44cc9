//! Hosted mesh service
//!
//! Runs a [`MeshCore`] inside one tokio task. The task is the only place
//! that touches mesh state; the radio driver and the application talk to
//! it through a cloneable [`MeshHandle`], so no locks are needed.
//!
//! ```rust,ignore
//! let (service, handle) = MeshService::new(radio, events, identity, config)?;
//! tokio::spawn(service.run());
//!
//! // From the radio driver
//! handle.frame_received(InboundFrame::new(buf, rssi, snr)).await?;
//! handle.tx_done().await?;
//!
//! // From the application
//! handle.send(false, 0x2BD56908, payload).await?;
//! ```

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::identity::NodeIdentity;
use crate::interface::{MeshEvents, RadioTransport};
use crate::node::{MeshCore, MeshEvent, MeshStats};
use crate::queue::InboundFrame;
use crate::routing::Route;

/// Capacity of the command channel
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Commands that can be sent to the mesh service
#[derive(Debug)]
pub enum MeshCommand {
    /// The radio received a frame
    FrameReceived(InboundFrame),
    /// The radio finished transmitting
    TxDone,
    /// Send application data
    Send {
        /// Flood to every node
        is_broadcast: bool,
        /// Destination for unicast data
        target: u32,
        /// Application payload
        payload: Bytes,
        /// Enqueue result
        response: oneshot::Sender<Result<()>>,
    },
    /// Ask all nodes for their maps
    SendMapRequest {
        /// Enqueue result
        response: oneshot::Sender<Result<()>>,
    },
    /// Get the routing table
    GetRoutes {
        /// Route snapshot
        response: oneshot::Sender<Vec<Route>>,
    },
    /// Get mesh statistics
    GetStats {
        /// Statistics snapshot
        response: oneshot::Sender<MeshStats>,
    },
    /// Shutdown
    Shutdown,
}

/// Handle for interacting with the mesh service
#[derive(Clone)]
pub struct MeshHandle {
    command_tx: mpsc::Sender<MeshCommand>,
    identity: NodeIdentity,
}

impl MeshHandle {
    /// Identity of the local node
    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    /// Hand a received frame to the mesh
    pub async fn frame_received(&self, frame: InboundFrame) -> Result<()> {
        self.command_tx
            .send(MeshCommand::FrameReceived(frame))
            .await?;
        Ok(())
    }

    /// Report that the radio finished a transmission
    pub async fn tx_done(&self) -> Result<()> {
        self.command_tx.send(MeshCommand::TxDone).await?;
        Ok(())
    }

    /// Send application data into the mesh
    pub async fn send(&self, is_broadcast: bool, target: u32, payload: Bytes) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::Send {
                is_broadcast,
                target,
                payload,
                response,
            })
            .await?;
        rx.await.map_err(|_| MeshError::ChannelClosed)?
    }

    /// Ask all nodes to broadcast their maps
    pub async fn send_map_request(&self) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::SendMapRequest { response })
            .await?;
        rx.await.map_err(|_| MeshError::ChannelClosed)?
    }

    /// Get the routing table
    pub async fn routes(&self) -> Result<Vec<Route>> {
        let (response, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::GetRoutes { response })
            .await?;
        rx.await.map_err(|_| MeshError::ChannelClosed)
    }

    /// Get mesh statistics
    pub async fn stats(&self) -> Result<MeshStats> {
        let (response, rx) = oneshot::channel();
        self.command_tx
            .send(MeshCommand::GetStats { response })
            .await?;
        rx.await.map_err(|_| MeshError::ChannelClosed)
    }

    /// Stop the service
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx.send(MeshCommand::Shutdown).await?;
        Ok(())
    }
}

/// Mesh node running as a tokio task
pub struct MeshService<R: RadioTransport, E: MeshEvents> {
    core: MeshCore<R, E>,
    command_rx: mpsc::Receiver<MeshCommand>,
}

impl<R, E> MeshService<R, E>
where
    R: RadioTransport + Send + 'static,
    E: MeshEvents + Send + 'static,
{
    /// Create a service and its handle
    pub fn new(
        radio: R,
        events: E,
        identity: NodeIdentity,
        config: MeshConfig,
    ) -> Result<(Self, MeshHandle)> {
        let core = MeshCore::new(radio, events, identity, config)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let handle = MeshHandle {
            command_tx,
            identity,
        };
        Ok((Self { core, command_rx }, handle))
    }

    /// The wrapped core
    pub fn core(&self) -> &MeshCore<R, E> {
        &self.core
    }

    /// Run the service until shutdown or until every handle is dropped
    ///
    /// A map sync runs right away, then on the sync schedule.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting mesh service for node {}", self.core.identity());

        self.core.raise(MeshEvent::SyncTimerFired);
        let mut next_sync = Instant::now() + self.core.sync_interval();

        loop {
            self.core.process_pending();
            if let Some(interval) = self.core.take_timer_restart() {
                next_sync = Instant::now() + interval;
                trace!(
                    "Next map sync in {}",
                    humantime::format_duration(interval)
                );
            }

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("All mesh handles dropped");
                        break;
                    };
                    if !self.handle_command(cmd) {
                        info!("Mesh shutdown requested");
                        break;
                    }
                }

                _ = sleep_until(next_sync) => {
                    trace!("Map sync timer fired");
                    self.core.raise(MeshEvent::SyncTimerFired);
                }
            }
        }

        self.core.log_map();
        info!("Mesh service stopped");
        Ok(())
    }

    /// Returns `false` once the service should stop
    fn handle_command(&mut self, cmd: MeshCommand) -> bool {
        match cmd {
            MeshCommand::FrameReceived(frame) => {
                // Drops are logged and counted by the core
                let _ = self.core.enqueue_rx(frame);
            }
            MeshCommand::TxDone => self.core.on_tx_done(),
            MeshCommand::Send {
                is_broadcast,
                target,
                payload,
                response,
            } => {
                let result = self.core.send_to_mesh(is_broadcast, target, payload);
                let _ = response.send(result);
            }
            MeshCommand::SendMapRequest { response } => {
                let _ = response.send(self.core.send_map_request());
            }
            MeshCommand::GetRoutes { response } => {
                let _ = response.send(self.core.routes());
            }
            MeshCommand::GetStats { response } => {
                let _ = response.send(self.core.stats());
            }
            MeshCommand::Shutdown => return false,
        }
        true
    }
}
