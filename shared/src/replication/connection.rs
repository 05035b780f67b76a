use crate::types::{ConnectionId, HostId, NetEntityId, PacketIndex};

use super::{DisconnectReason, NetworkEntityRpcMessage, NetworkEntityUpdateMessage};

/// The transport connection a replication manager sends through.
///
/// Send methods hand back the packet index the batch went out in, so
/// delivery and loss of that packet can later be reported through
/// [`PacketNotifiable`](crate::PacketNotifiable).
pub trait Connection {
    fn connection_id(&self) -> ConnectionId;

    fn remote_host_id(&self) -> HostId;

    /// Current round trip time estimate
    fn rtt_millis(&self) -> f32;

    /// Whether the congestion window has room for another datagram
    fn is_send(&self) -> bool;

    /// Bytes that may be put in flight right now
    fn available_window_size(&self) -> usize;

    fn send_entity_updates(&mut self, updates: Vec<NetworkEntityUpdateMessage>) -> PacketIndex;

    fn send_entity_rpcs(&mut self, rpcs: Vec<NetworkEntityRpcMessage>, reliable: bool)
        -> PacketIndex;

    /// Asks the remote side to reset its replicators for these entities
    fn send_entity_resets(&mut self, entities: Vec<NetEntityId>);
}

/// Owns the decision to close a connection
pub trait ConnectionListener {
    fn disconnect(&mut self, connection_id: ConnectionId, reason: DisconnectReason);
}
