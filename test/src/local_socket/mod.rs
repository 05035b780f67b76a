/// In-memory connection implementation for E2E testing
/// Queues serialized replication traffic between two managers without network I/O

mod traffic_connection;

pub use traffic_connection::{TrafficConnection, TrafficConnectionHandle};

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use netrep_serde::{BitReader, BitWriter, Serde, SerdeErr};
use netrep_shared::{
    replication::{Connection, NetworkEntityRpcMessage, NetworkEntityUpdateMessage},
    ConnectionId, HostId, NetEntityId, PacketIndex,
};

/// Window handed out when the test does not configure one
pub const DEFAULT_WINDOW_BYTES: usize = 64 * 1024;

/// One serialized batch, as it would leave the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalPacket {
    EntityUpdates {
        packet_index: PacketIndex,
        payload: Vec<u8>,
    },
    EntityRpcs {
        packet_index: PacketIndex,
        reliable: bool,
        payload: Vec<u8>,
    },
    EntityResets {
        payload: Vec<u8>,
    },
}

impl LocalPacket {
    pub fn decode_updates(payload: &[u8]) -> Result<Vec<NetworkEntityUpdateMessage>, SerdeErr> {
        Vec::<NetworkEntityUpdateMessage>::de(&mut BitReader::new(payload))
    }

    pub fn decode_rpcs(payload: &[u8]) -> Result<Vec<NetworkEntityRpcMessage>, SerdeErr> {
        Vec::<NetworkEntityRpcMessage>::de(&mut BitReader::new(payload))
    }

    pub fn decode_resets(payload: &[u8]) -> Result<Vec<NetEntityId>, SerdeErr> {
        Vec::<NetEntityId>::de(&mut BitReader::new(payload))
    }

    pub fn is_updates(&self) -> bool {
        matches!(self, Self::EntityUpdates { .. })
    }

    /// None for resets, which are not sequenced
    pub fn packet_index(&self) -> Option<PacketIndex> {
        match self {
            Self::EntityUpdates { packet_index, .. } | Self::EntityRpcs { packet_index, .. } => {
                Some(*packet_index)
            }
            Self::EntityResets { .. } => None,
        }
    }
}

fn encode<T: Serde>(value: &T) -> Vec<u8> {
    let mut writer = BitWriter::new();
    value.ser(&mut writer);
    writer.to_bytes()
}

struct LinkState {
    rtt_millis: f32,
    is_send: bool,
    window_bytes: usize,
}

struct Outbox {
    next_packet_index: PacketIndex,
    packets: VecDeque<LocalPacket>,
}

impl Outbox {
    fn next_index(&mut self) -> PacketIndex {
        let index = self.next_packet_index;
        self.next_packet_index = self.next_packet_index.wrapping_add(1);
        index
    }
}

/// Sending half of a local link, owned by a replication manager
pub struct LocalConnection {
    connection_id: ConnectionId,
    remote_host: HostId,
    outbox: Arc<Mutex<Outbox>>,
    link: Arc<Mutex<LinkState>>,
}

/// Test-side view of a [`LocalConnection`]: drains what it sent and tunes
/// what it reports about the link
#[derive(Clone)]
pub struct LocalConnectionHandle {
    outbox: Arc<Mutex<Outbox>>,
    link: Arc<Mutex<LinkState>>,
}

impl LocalConnection {
    pub fn new(connection_id: ConnectionId, remote_host: HostId) -> (Self, LocalConnectionHandle) {
        let outbox = Arc::new(Mutex::new(Outbox {
            next_packet_index: 0,
            packets: VecDeque::new(),
        }));
        let link = Arc::new(Mutex::new(LinkState {
            rtt_millis: 50.0,
            is_send: true,
            window_bytes: DEFAULT_WINDOW_BYTES,
        }));
        let handle = LocalConnectionHandle {
            outbox: outbox.clone(),
            link: link.clone(),
        };
        (
            Self {
                connection_id,
                remote_host,
                outbox,
                link,
            },
            handle,
        )
    }
}

impl Connection for LocalConnection {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn remote_host_id(&self) -> HostId {
        self.remote_host
    }

    fn rtt_millis(&self) -> f32 {
        self.link.lock().unwrap().rtt_millis
    }

    fn is_send(&self) -> bool {
        self.link.lock().unwrap().is_send
    }

    fn available_window_size(&self) -> usize {
        self.link.lock().unwrap().window_bytes
    }

    fn send_entity_updates(&mut self, updates: Vec<NetworkEntityUpdateMessage>) -> PacketIndex {
        let mut outbox = self.outbox.lock().unwrap();
        let packet_index = outbox.next_index();
        outbox.packets.push_back(LocalPacket::EntityUpdates {
            packet_index,
            payload: encode(&updates),
        });
        packet_index
    }

    fn send_entity_rpcs(
        &mut self,
        rpcs: Vec<NetworkEntityRpcMessage>,
        reliable: bool,
    ) -> PacketIndex {
        let mut outbox = self.outbox.lock().unwrap();
        let packet_index = outbox.next_index();
        outbox.packets.push_back(LocalPacket::EntityRpcs {
            packet_index,
            reliable,
            payload: encode(&rpcs),
        });
        packet_index
    }

    fn send_entity_resets(&mut self, entities: Vec<NetEntityId>) {
        self.outbox
            .lock()
            .unwrap()
            .packets
            .push_back(LocalPacket::EntityResets {
                payload: encode(&entities),
            });
    }
}

impl LocalConnectionHandle {
    /// Removes and returns everything sent since the last call
    pub fn take_packets(&self) -> Vec<LocalPacket> {
        self.outbox.lock().unwrap().packets.drain(..).collect()
    }

    pub fn queued_packet_count(&self) -> usize {
        self.outbox.lock().unwrap().packets.len()
    }

    pub fn set_rtt_millis(&self, rtt_millis: f32) {
        self.link.lock().unwrap().rtt_millis = rtt_millis;
    }

    pub fn set_send_allowed(&self, is_send: bool) {
        self.link.lock().unwrap().is_send = is_send;
    }

    pub fn set_window_bytes(&self, window_bytes: usize) {
        self.link.lock().unwrap().window_bytes = window_bytes;
    }
}

/// Pair of connections between host `a` and host `b`
pub struct LocalSocketPair {
    pub a_connection: LocalConnection,
    pub a_handle: LocalConnectionHandle,
    pub b_connection: LocalConnection,
    pub b_handle: LocalConnectionHandle,
}

impl LocalSocketPair {
    pub fn new(a_host: HostId, b_host: HostId) -> Self {
        let (a_connection, a_handle) = LocalConnection::new(ConnectionId::new(1), b_host);
        let (b_connection, b_handle) = LocalConnection::new(ConnectionId::new(2), a_host);
        Self {
            a_connection,
            a_handle,
            b_connection,
            b_handle,
        }
    }
}
