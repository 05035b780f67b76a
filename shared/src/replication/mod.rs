mod config;
mod connection;
mod entity_domain;
mod entity_replicator;
mod error;
mod event;
mod manager;
mod messages;
mod orphaned_rpcs;
mod publisher;
mod record;
mod replication_window;
mod role;
mod subscriber;
mod world;

pub use config::{ReplicationConfig, REPLICATION_PACKET_OVERHEAD, UDP_PACKET_HEADER_SIZE};
pub use connection::{Connection, ConnectionListener};
pub use entity_domain::EntityDomain;
pub use entity_replicator::{EntityReplicator, ReplicatorState};
pub use error::{DisconnectReason, ReplicationError};
pub use event::{EntityMigratedEvent, Event, SendMigrateEntityEvent};
pub use manager::{EntityReplicationManager, UpdateValidationResult};
pub use messages::{
    EntityMigrationMessage, NetworkEntityRpcMessage, NetworkEntityUpdateMessage, PropertyDelta,
};
pub use orphaned_rpcs::OrphanedEntityRpcs;
pub use publisher::PropertyPublisher;
pub use record::ReplicationRecord;
pub use replication_window::{ReplicationSet, ReplicationWindow};
pub use role::{Mode, NetEntityRole};
pub use subscriber::PropertySubscriber;
pub use world::NetworkEntityWorld;
