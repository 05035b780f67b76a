use netrep_serde::SerdeErr;
use thiserror::Error;

use crate::{timeout_queue::TimeoutQueueError, types::NetEntityId};

use super::NetEntityRole;

/// Errors raised while applying inbound replication traffic. Any of these
/// ends with the connection being handed to the connection listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("Failed to decode replication message: {0}")]
    Serde(#[from] SerdeErr),

    /// A property delta whose bitset and payload disagree
    #[error("Property delta marks {expected} properties but carries {actual} values")]
    MalformedDelta { expected: usize, actual: usize },

    /// The world refused to apply a property value
    #[error("Entity {entity} rejected a value for property {property}")]
    PropertyRejected { entity: NetEntityId, property: usize },

    /// The world could not build the entity from its prefab
    #[error("Failed to create entity {entity}")]
    EntityCreationFailed { entity: NetEntityId },

    /// An update tried to hand this host a role only migration may grant
    #[error("Update for entity {entity} asked for role {role}")]
    UnexpectedRole {
        entity: NetEntityId,
        role: NetEntityRole,
    },

    /// The world refused an RPC for the entity's current role
    #[error("Entity {entity} rejected rpc {rpc_id}")]
    RpcRejected { entity: NetEntityId, rpc_id: u16 },

    /// An update that failed validation as out of protocol
    #[error("Update for entity {entity} is not allowed on this connection")]
    InvalidUpdate { entity: NetEntityId },

    /// No replicator exists after a message that should have created one
    #[error("No replicator for entity {entity}")]
    MissingReplicator { entity: NetEntityId },

    #[error(transparent)]
    TimeoutQueue(#[from] TimeoutQueueError),
}

/// Why a connection listener is asked to drop a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// An inbound message broke the replication protocol
    ProtocolViolation(ReplicationError),
    /// The traffic controller judged the link unusable
    ConnectionQuality,
}
