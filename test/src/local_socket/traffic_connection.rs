/// Loopback connection whose link state comes from AIMD traffic control
/// Each batch the manager sends is one datagram; the test decides which of
/// them arrive and answers them through the handle

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use log::{info, warn};

use netrep_shared::{
    replication::{
        Connection, ConnectionListener, DisconnectReason, NetworkEntityRpcMessage,
        NetworkEntityUpdateMessage, REPLICATION_PACKET_OVERHEAD, UDP_PACKET_HEADER_SIZE,
    },
    traffic::{
        AimdTrafficControl, CongestionState, DatagramInfo, TrafficControl, TrafficControlConfig,
        TrafficControlConnectionId, TrafficControlError,
    },
    ConnectionId, HostId, Instant, NetEntityId, PacketIndex,
};

use super::{encode, LocalPacket};

struct TrafficLink {
    traffic: AimdTrafficControl,
    traffic_id: TrafficControlConnectionId,
    clock: Instant,
    next_packet_index: PacketIndex,
    packets: VecDeque<LocalPacket>,
    listener: Box<dyn ConnectionListener>,
    quality_reported: bool,
}

impl TrafficLink {
    fn send_datagram(&mut self, packet: LocalPacket, payload_len: usize) -> PacketIndex {
        let packet_index = self.next_packet_index;
        self.next_packet_index = self.next_packet_index.wrapping_add(1);

        let effective_size = payload_len as u32;
        let size = (payload_len + UDP_PACKET_HEADER_SIZE + REPLICATION_PACKET_OVERHEAD) as u32;
        let info = DatagramInfo::new(packet_index, size, effective_size);
        if let Err(error) = self.traffic.on_send(&self.traffic_id, &info, &self.clock) {
            warn!("traffic control rejected datagram {}: {}", packet_index, error);
        }
        self.packets.push_back(packet);
        packet_index
    }
}

/// Sending half of a traffic-controlled link, owned by a replication manager
pub struct TrafficConnection {
    connection_id: ConnectionId,
    remote_host: HostId,
    link: Arc<Mutex<TrafficLink>>,
}

/// Test-side view of a [`TrafficConnection`]: moves its clock, drains what it
/// sent and reports back which datagrams arrived
#[derive(Clone)]
pub struct TrafficConnectionHandle {
    connection_id: ConnectionId,
    link: Arc<Mutex<TrafficLink>>,
}

impl TrafficConnection {
    /// `listener` is told when the link quality falls past the threshold
    /// given to [`TrafficConnectionHandle::check_quality`]
    pub fn new(
        connection_id: ConnectionId,
        remote_host: HostId,
        config: TrafficControlConfig,
        listener: Box<dyn ConnectionListener>,
        now: &Instant,
    ) -> (Self, TrafficConnectionHandle) {
        let mut traffic = AimdTrafficControl::new(config);
        let traffic_id = traffic.on_connect(now);
        traffic.on_handshake_complete(&traffic_id).unwrap();

        let link = Arc::new(Mutex::new(TrafficLink {
            traffic,
            traffic_id,
            clock: *now,
            next_packet_index: 0,
            packets: VecDeque::new(),
            listener,
            quality_reported: false,
        }));
        let handle = TrafficConnectionHandle {
            connection_id,
            link: link.clone(),
        };
        (
            Self {
                connection_id,
                remote_host,
                link,
            },
            handle,
        )
    }
}

impl Connection for TrafficConnection {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn remote_host_id(&self) -> HostId {
        self.remote_host
    }

    fn rtt_millis(&self) -> f32 {
        let link = self.link.lock().unwrap();
        link.traffic
            .query_congestion_state(&link.traffic_id)
            .map_or(0.0, |state| state.smoothed_rtt.as_secs_f32() * 1000.0)
    }

    fn is_send(&self) -> bool {
        let link = self.link.lock().unwrap();
        link.traffic.is_send(&link.traffic_id).unwrap_or(false)
    }

    fn available_window_size(&self) -> usize {
        let link = self.link.lock().unwrap();
        link.traffic
            .available_window_size(&link.traffic_id)
            .map_or(0, |bytes| bytes as usize)
    }

    fn send_entity_updates(&mut self, updates: Vec<NetworkEntityUpdateMessage>) -> PacketIndex {
        let mut link = self.link.lock().unwrap();
        let payload = encode(&updates);
        let payload_len = payload.len();
        let packet_index = link.next_packet_index;
        link.send_datagram(
            LocalPacket::EntityUpdates {
                packet_index,
                payload,
            },
            payload_len,
        )
    }

    fn send_entity_rpcs(
        &mut self,
        rpcs: Vec<NetworkEntityRpcMessage>,
        reliable: bool,
    ) -> PacketIndex {
        let mut link = self.link.lock().unwrap();
        let payload = encode(&rpcs);
        let payload_len = payload.len();
        let packet_index = link.next_packet_index;
        link.send_datagram(
            LocalPacket::EntityRpcs {
                packet_index,
                reliable,
                payload,
            },
            payload_len,
        )
    }

    // resets ride on the reliable channel, outside traffic control
    fn send_entity_resets(&mut self, entities: Vec<NetEntityId>) {
        self.link
            .lock()
            .unwrap()
            .packets
            .push_back(LocalPacket::EntityResets {
                payload: encode(&entities),
            });
    }
}

impl TrafficConnectionHandle {
    pub fn set_clock(&self, now: &Instant) {
        self.link.lock().unwrap().clock = *now;
    }

    /// Expires datagrams that went unanswered for too long
    pub fn update(&self, now: &Instant) {
        let mut link = self.link.lock().unwrap();
        link.clock = *now;
        link.traffic.update(now);
    }

    /// Removes and returns everything sent since the last call
    pub fn take_packets(&self) -> Vec<LocalPacket> {
        self.link.lock().unwrap().packets.drain(..).collect()
    }

    pub fn acknowledge(
        &self,
        packet_index: PacketIndex,
        now: &Instant,
    ) -> Result<bool, TrafficControlError> {
        let mut link = self.link.lock().unwrap();
        let traffic_id = link.traffic_id;
        link.traffic.on_ack(&traffic_id, packet_index, now)
    }

    pub fn report_lost(
        &self,
        packet_index: PacketIndex,
        now: &Instant,
    ) -> Result<(), TrafficControlError> {
        let mut link = self.link.lock().unwrap();
        let traffic_id = link.traffic_id;
        link.traffic.on_nack(&traffic_id, packet_index, now)
    }

    pub fn congestion_state(&self) -> Result<CongestionState, TrafficControlError> {
        let link = self.link.lock().unwrap();
        link.traffic.query_congestion_state(&link.traffic_id)
    }

    /// Tells the listener to drop the connection once its connection factor
    /// passes `threshold`. Reports at most once; returns whether it has.
    pub fn check_quality(&self, threshold: f32) -> bool {
        let mut link = self.link.lock().unwrap();
        if link.quality_reported {
            return true;
        }
        let traffic_id = link.traffic_id;
        if !link.traffic.is_disconnect(&traffic_id, threshold).unwrap_or(true) {
            return false;
        }

        info!(
            "connection {:?} fell below quality threshold {}",
            self.connection_id, threshold
        );
        link.quality_reported = true;
        link.listener
            .disconnect(self.connection_id, DisconnectReason::ConnectionQuality);
        true
    }
}
