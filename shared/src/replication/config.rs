use std::{default::Default, time::Duration};

use netrep_serde::MTU_SIZE_BYTES;

/// Bytes of every datagram taken by the UDP packet header
pub const UDP_PACKET_HEADER_SIZE: usize = 12;
/// Bytes of every datagram taken by the replication packet framing
pub const REPLICATION_PACKET_OVERHEAD: usize = 16;

/// Contains Config properties which will be used by an
/// [`EntityReplicationManager`](super::EntityReplicationManager)
#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    /// Bytes of entity updates or RPCs packed into one outbound message batch
    pub max_payload_bytes: usize,
    pub max_updates_per_packet: usize,
    pub max_rpcs_per_packet: usize,
    /// Entities whose creation the remote side has not yet acknowledged.
    /// Further creations wait once this many are outstanding.
    pub max_remote_entities_pending_creation: usize,
    /// Replicators that are not autonomous on either side send at most this
    /// many updates per frame
    pub max_proxy_replicator_sends: usize,
    /// Wall-clock budget for activating newly created entities per frame;
    /// zero activates everything at once
    pub entity_activation_time_slice: Duration,
    /// How long a replicator that left the replication window lingers before
    /// its deletion is sent
    pub entity_pending_removal: Duration,
    /// Orphaned RPCs are dropped after this multiple of the connection RTT
    pub orphaned_rpc_timeout_rtt_factor: f32,
    pub min_orphaned_rpc_timeout: Duration,
    /// An unacknowledged update packet older than this multiple of the RTT is
    /// treated as dropped
    pub drop_update_rtt_factor: f32,
    pub min_drop_update_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: MTU_SIZE_BYTES - UDP_PACKET_HEADER_SIZE - REPLICATION_PACKET_OVERHEAD,
            max_updates_per_packet: 64,
            max_rpcs_per_packet: 64,
            max_remote_entities_pending_creation: usize::MAX,
            max_proxy_replicator_sends: 512,
            entity_activation_time_slice: Duration::ZERO,
            entity_pending_removal: Duration::from_secs(1),
            orphaned_rpc_timeout_rtt_factor: 2.0,
            min_orphaned_rpc_timeout: Duration::from_millis(100),
            drop_update_rtt_factor: 1.5,
            min_drop_update_timeout: Duration::from_millis(10),
        }
    }
}

impl ReplicationConfig {
    /// How long RPCs for an unknown entity are kept, given the current RTT
    pub fn orphaned_rpc_timeout(&self, rtt_millis: f32) -> Duration {
        let millis = (rtt_millis.max(0.0) * self.orphaned_rpc_timeout_rtt_factor.max(0.0)) as u64;
        Duration::from_millis(millis).max(self.min_orphaned_rpc_timeout)
    }

    /// Age after which an unacknowledged update packet counts as dropped
    pub fn drop_update_timeout(&self, rtt_millis: f32) -> Duration {
        let millis = (rtt_millis.max(0.0) * self.drop_update_rtt_factor.max(0.0)) as u64;
        Duration::from_millis(millis).max(self.min_drop_update_timeout)
    }
}
