//! Mesh node state and event dispatcher
//!
//! [`MeshCore`] bundles the routing table, broadcast history, both frame
//! queues, the broadcast id allocator and the map sync schedule. Nothing in
//! here is shared; the host drives the core from one task by raising
//! [`MeshEvent`]s and calling [`MeshCore::process_pending`].
//!
//! # Event flow
//!
//! ```text
//!   radio RX ──► enqueue_rx ──► FrameReceived ──► handle frame ──┬─► MeshEvents::on_data
//!                                                               └─► TX queue
//!   radio TX done ──► SendQueueReady ──► TX queue ──► RadioTransport::send
//!   sync timer ──► SyncTimerFired ──► clean map, broadcast map, restart timer
//! ```
//!
//! Every failure on these paths is logged, counted in [`MeshStats`] and
//! otherwise swallowed. Only the sending API returns errors to the caller.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::{MeshConfig, MAX_DATA_PAYLOAD};
use crate::error::{MeshError, Result};
use crate::frame::{DataFrame, Frame, FrameKind, MapFrame};
use crate::history::BroadcastHistory;
use crate::identity::{BroadcastIdAllocator, NodeIdentity};
use crate::interface::{MeshData, MeshEvents, RadioTransport};
use crate::queue::{BoundedQueue, InboundFrame, OutboundMessage};
use crate::routing::{Route, RoutingTable};
use crate::sync::MapSyncSchedule;

/// Work items for the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshEvent {
    /// The inbound queue holds at least one frame
    FrameReceived,
    /// The outbound queue may be drained
    SendQueueReady,
    /// Time to sync the map
    SyncTimerFired,
}

/// Mesh statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshStats {
    /// Frames taken from the inbound queue
    pub frames_received: u64,
    /// Frames dropped as foreign or corrupt
    pub malformed_frames: u64,
    /// Frames dropped because the inbound queue was full
    pub rx_queue_drops: u64,
    /// Frames dropped because the outbound queue was full
    pub tx_queue_drops: u64,
    /// Frames dropped for lack of a route
    pub no_route_drops: u64,
    /// Frames refused by the radio
    pub radio_rejections: u64,
    /// Frames accepted by the radio
    pub frames_sent: u64,
    /// Frames relayed towards another node
    pub frames_forwarded: u64,
    /// Payloads handed to the application
    pub data_delivered: u64,
    /// Broadcasts and map requests re-transmitted
    pub broadcasts_flooded: u64,
    /// Broadcasts dropped as already handled
    pub duplicate_broadcasts: u64,
    /// Broadcasts dropped as our own echo
    pub own_echoes: u64,
    /// Maps queued for transmission
    pub maps_sent: u64,
    /// Valid maps received
    pub maps_received: u64,
    /// Map requests originated here
    pub map_requests_sent: u64,
}

/// Mesh node state and dispatcher
pub struct MeshCore<R: RadioTransport, E: MeshEvents> {
    radio: R,
    events: E,
    identity: NodeIdentity,
    config: MeshConfig,
    table: RoutingTable,
    history: BroadcastHistory,
    rx_queue: BoundedQueue<InboundFrame>,
    tx_queue: BoundedQueue<OutboundMessage>,
    broadcast_ids: BroadcastIdAllocator,
    schedule: MapSyncSchedule,
    pending: VecDeque<MeshEvent>,
    timer_restart: Option<Duration>,
    stats: MeshStats,
}

impl<R: RadioTransport, E: MeshEvents> MeshCore<R, E> {
    /// Create a mesh node
    ///
    /// Fails if the configuration does not fit the identity.
    pub fn new(radio: R, events: E, identity: NodeIdentity, config: MeshConfig) -> Result<Self> {
        config.validate(&identity)?;

        info!(
            "Mesh node {} starting, broadcast group {:08X}",
            identity,
            identity.broadcast_group()
        );
        debug!(
            node_capacity = config.node_capacity,
            rx_queue_size = config.rx_queue_size,
            tx_queue_size = config.tx_queue_size,
            node_timeout = %humantime::format_duration(config.node_timeout()),
            "Mesh configuration"
        );

        Ok(Self {
            radio,
            events,
            table: RoutingTable::with_timeout(config.node_capacity, config.node_timeout()),
            history: BroadcastHistory::new(config.broadcast_history_size),
            rx_queue: BoundedQueue::new("RX", config.rx_queue_size),
            tx_queue: BoundedQueue::new("TX", config.tx_queue_size),
            broadcast_ids: BroadcastIdAllocator::new(&identity),
            schedule: MapSyncSchedule::from_config(&config),
            pending: VecDeque::new(),
            timer_restart: None,
            stats: MeshStats::default(),
            identity,
            config,
        })
    }

    // ===== Event plumbing =====

    /// Queue a received frame, called from the radio receive path
    pub fn enqueue_rx(&mut self, frame: InboundFrame) -> Result<()> {
        let size = frame.len();
        if let Err(e) = self.rx_queue.push(frame) {
            warn!("Dropping received frame of {} bytes: {}", size, e);
            self.stats.rx_queue_drops += 1;
            return Err(e);
        }
        self.raise(MeshEvent::FrameReceived);
        Ok(())
    }

    /// The radio finished a transmission
    pub fn on_tx_done(&mut self) {
        self.raise(MeshEvent::SendQueueReady);
    }

    /// Mark an event as pending
    ///
    /// An event that is already pending is not queued twice.
    pub fn raise(&mut self, event: MeshEvent) {
        if !self.pending.contains(&event) {
            self.pending.push_back(event);
        }
    }

    /// Check if any event waits for dispatch
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Dispatch pending events until none is left, returns how many ran
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.pending.pop_front() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Handle one event
    pub fn dispatch(&mut self, event: MeshEvent) {
        trace!(?event, "Mesh dispatch");
        match event {
            MeshEvent::FrameReceived => self.check_rx(),
            MeshEvent::SendQueueReady => self.check_tx(),
            MeshEvent::SyncTimerFired => self.sync_map(),
        }
    }

    /// New period for the sync timer, if it needs a restart
    pub fn take_timer_restart(&mut self) -> Option<Duration> {
        self.timer_restart.take()
    }

    /// Current map sync period
    pub fn sync_interval(&self) -> Duration {
        self.schedule.interval()
    }

    // ===== Sending API =====

    /// Send application data into the mesh
    ///
    /// Broadcasts are flooded to every node. Unicast data goes straight to
    /// the target unless the routing table knows a relay for it.
    pub fn send_to_mesh(&mut self, is_broadcast: bool, target: u32, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_DATA_PAYLOAD {
            return Err(MeshError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_DATA_PAYLOAD,
            });
        }

        let own = self.identity.address();
        let frame = if is_broadcast {
            let id = self.broadcast_ids.next_id();
            debug!("Sending broadcast {:08X} with {} bytes", id, payload.len());
            DataFrame::broadcast(id, own, payload)
        } else {
            match self.table.get_route(target) {
                Some(route) if !route.is_direct() => {
                    debug!(
                        "Sending to {:08X} via {:08X} ({} hops)",
                        target, route.first_hop, route.hops
                    );
                    DataFrame::forward(route.first_hop, target, own, payload)
                }
                _ => {
                    debug!("Sending direct to {:08X}", target);
                    DataFrame::direct(target, own, payload)
                }
            }
        };
        self.submit(frame)
    }

    /// Send application data to the configured master node
    pub fn send_to_master(&mut self, payload: Bytes) -> Result<()> {
        let master = self.config.master_node.ok_or(MeshError::NoRoute(0))?;
        self.send_to_mesh(false, master, payload)
    }

    /// Ask all nodes to broadcast their maps
    pub fn send_map_request(&mut self) -> Result<()> {
        let id = self.broadcast_ids.next_id();
        debug!("Sending map request {:08X}", id);
        self.submit(DataFrame::map_request(id, self.identity.address()))?;
        self.stats.map_requests_sent += 1;
        Ok(())
    }

    // ===== Introspection =====

    /// Local identity
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Active configuration
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Routing table
    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Snapshot of all routes
    pub fn routes(&self) -> Vec<Route> {
        self.table.routes()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> MeshStats {
        self.stats.clone()
    }

    /// Frames waiting for the radio
    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Frames waiting for the dispatcher
    pub fn rx_queue_len(&self) -> usize {
        self.rx_queue.len()
    }

    /// Radio driver
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Radio driver, mutable
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Notification sink
    pub fn events(&self) -> &E {
        &self.events
    }

    /// Log the routing table, this node first
    pub fn log_map(&self) {
        info!("---------------------------------------------");
        info!("{} nodes in the map", self.table.len() + 1);
        info!("Node #01 id: {} this node", self.identity);
        for (idx, route) in self.table.iter().enumerate() {
            if route.is_direct() {
                info!("Node #{:02} id: {:08X} direct", idx + 2, route.node_id);
            } else {
                info!(
                    "Node #{:02} id: {:08X} first hop {:08X} #hops {}",
                    idx + 2,
                    route.node_id,
                    route.first_hop,
                    route.hops
                );
            }
        }
        info!("---------------------------------------------");
    }

    // ===== Receive path =====

    fn check_rx(&mut self) {
        let Some(inbound) = self.rx_queue.pop() else {
            trace!("RX queue is empty");
            return;
        };
        self.stats.frames_received += 1;

        if let Err(e) = self.handle_frame(&inbound) {
            if e.is_malformed_frame() {
                self.stats.malformed_frames += 1;
                warn!(
                    code = e.error_code(),
                    rssi = inbound.rssi,
                    snr = inbound.snr,
                    "Invalid frame of {} bytes: {}",
                    inbound.len(),
                    e
                );
            } else {
                debug!(code = e.error_code(), "Dropped frame: {}", e);
            }
        }

        if !self.rx_queue.is_empty() {
            self.raise(MeshEvent::FrameReceived);
        }
    }

    fn handle_frame(&mut self, inbound: &InboundFrame) -> Result<()> {
        match Frame::decode(&inbound.data)? {
            Frame::Map(map) => {
                self.handle_map(map);
                Ok(())
            }
            Frame::Data(data) => match data.kind {
                FrameKind::Direct => self.handle_direct(data, inbound),
                FrameKind::Forward => self.handle_forward(data, inbound),
                FrameKind::Broadcast | FrameKind::MapRequest => {
                    self.handle_flooded(data, inbound);
                    Ok(())
                }
                FrameKind::Map => Err(MeshError::UnknownFrameType(FrameKind::Map.into())),
            },
        }
    }

    fn handle_map(&mut self, map: MapFrame) {
        let own = self.identity.address();
        if map.from == own {
            trace!("Ignoring our own map");
            return;
        }
        debug!(
            "Got map from {:08X} with {} nodes",
            map.from,
            map.entries.len()
        );
        self.stats.maps_received += 1;

        let before = self.subs_of(map.from);
        let mut changed = self.table.add_node(map.from, 0, 0);

        // The sender's topology may have changed, rebuild its subs
        self.table.clear_subs(map.from);
        for entry in map.entries.iter().filter(|entry| entry.node_id != own) {
            self.table
                .add_node(entry.node_id, map.from, entry.hops.saturating_add(1));
        }
        changed |= self.subs_of(map.from) != before;

        if changed {
            debug!("Map changed after map from {:08X}", map.from);
            self.events.on_map_changed();
        }
    }

    fn subs_of(&self, via: u32) -> Vec<(u32, u8)> {
        let mut subs: Vec<(u32, u8)> = self
            .table
            .iter()
            .filter(|route| route.first_hop == via)
            .map(|route| (route.node_id, route.hops))
            .collect();
        subs.sort_unstable();
        subs
    }

    fn handle_direct(&mut self, data: DataFrame, inbound: &InboundFrame) -> Result<()> {
        debug!("Direct message from {:08X}", data.from);
        if data.dest == self.identity.address() {
            self.deliver(&data, inbound, false);
        } else {
            trace!("Direct message for {:08X}, not for us", data.dest);
        }
        self.check_sender(data.sender());
        Ok(())
    }

    fn handle_forward(&mut self, data: DataFrame, inbound: &InboundFrame) -> Result<()> {
        let own = self.identity.address();
        let final_dest = data.final_destination();
        let sender = data.sender();
        debug!(
            "Forward message from {:08X} for {:08X} via {:08X}",
            sender, final_dest, data.dest
        );

        if data.dest != own {
            trace!("Forward message for relay {:08X}, not for us", data.dest);
            return Ok(());
        }

        let result = if final_dest == own {
            self.deliver(&data, inbound, false);
            Ok(())
        } else {
            self.relay(data)
        };

        self.check_sender(sender);
        result
    }

    fn relay(&mut self, data: DataFrame) -> Result<()> {
        let final_dest = data.final_destination();
        let Some(route) = self.table.get_route(final_dest) else {
            self.stats.no_route_drops += 1;
            warn!("No route found for {:08X}", final_dest);
            return Err(MeshError::NoRoute(final_dest));
        };

        let relayed = if route.is_direct() {
            DataFrame {
                kind: FrameKind::Direct,
                dest: final_dest,
                from: data.orig,
                orig: data.orig,
                payload: data.payload,
            }
        } else {
            DataFrame {
                dest: route.first_hop,
                ..data
            }
        };
        debug!(
            "Relaying to {:08X} as {:?} for {:08X}",
            relayed.dest, relayed.kind, final_dest
        );

        match self.submit(relayed) {
            Ok(()) => {
                self.stats.frames_forwarded += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Cannot forward message: {}", e);
                Err(e)
            }
        }
    }

    /// Flood a Broadcast or MapRequest once and act on it
    ///
    /// Broadcasts are delivered with `was_broadcast` set. A MapRequest
    /// triggers a map sync and reaches the application only when it carries
    /// a payload; an empty request has nothing to deliver.
    fn handle_flooded(&mut self, data: DataFrame, inbound: &InboundFrame) {
        let id = data.dest;
        debug!("{:?} {:08X} from {:08X}", data.kind, id, data.from);

        if self.identity.owns_broadcast(id) {
            trace!("We received our own broadcast, dismissing it");
            self.stats.own_echoes += 1;
            return;
        }
        if self.history.check_and_record(id) {
            trace!("Got an old broadcast, dismissing it");
            self.stats.duplicate_broadcasts += 1;
            return;
        }

        match self.submit(data.clone()) {
            Ok(()) => self.stats.broadcasts_flooded += 1,
            Err(e) => warn!("Cannot forward broadcast: {}", e),
        }

        match data.kind {
            FrameKind::MapRequest => {
                if !data.payload.is_empty() {
                    self.deliver(&data, inbound, true);
                }
                self.raise(MeshEvent::SyncTimerFired);
            }
            _ => {
                self.deliver(&data, inbound, true);
                self.check_sender(data.from);
            }
        }
    }

    fn deliver(&mut self, data: &DataFrame, inbound: &InboundFrame, was_broadcast: bool) {
        self.stats.data_delivered += 1;
        self.events.on_data(MeshData {
            from: data.originator(),
            payload: data.payload.clone(),
            rssi: inbound.rssi,
            snr: inbound.snr,
            was_broadcast,
        });
    }

    /// Request maps if data arrived from a node we cannot route to
    fn check_sender(&mut self, sender: u32) {
        if sender == self.identity.address() || self.table.contains(sender) {
            return;
        }
        debug!("Unknown node {:08X}, force map update", sender);
        if let Err(e) = self.send_map_request() {
            warn!("Cannot send map request: {}", e);
        }
    }

    // ===== Transmit path =====

    fn submit(&mut self, frame: impl Into<Frame>) -> Result<()> {
        if let Err(e) = self.tx_queue.push(OutboundMessage::new(frame)) {
            self.stats.tx_queue_drops += 1;
            return Err(e);
        }
        self.raise(MeshEvent::SendQueueReady);
        Ok(())
    }

    fn check_tx(&mut self) {
        if self.tx_queue.is_empty() {
            trace!("Packet queue is empty");
            return;
        }
        if self.radio.is_busy() {
            trace!("TX still active");
            return;
        }

        if let Some(message) = self.tx_queue.pop() {
            let raw = message.encode();
            if self.radio.send(&raw) {
                self.stats.frames_sent += 1;
                trace!("{:?} frame of {} bytes handed to radio", message.frame.kind(), raw.len());
            } else {
                self.stats.radio_rejections += 1;
                let e = MeshError::RadioRejected { size: raw.len() };
                warn!(code = e.error_code(), "{}", e);
            }
        }

        if !self.tx_queue.is_empty() {
            self.raise(MeshEvent::SendQueueReady);
        }
    }

    // ===== Map sync =====

    fn sync_map(&mut self) {
        if !self.table.clean_map() {
            debug!("Map cleanup removed nodes");
            self.events.on_map_changed();
        }

        let map = MapFrame {
            dest: self.broadcast_ids.next_id(),
            from: self.identity.address(),
            entries: self.table.node_map(),
        };
        debug!("Sending mesh map with {} nodes", map.entries.len());
        match self.submit(map) {
            Ok(()) => self.stats.maps_sent += 1,
            Err(e) => warn!("Cannot send map: {}", e),
        }

        let next = self.schedule.on_sync();
        self.timer_restart = Some(next);
    }
}
