use crate::types::{ConnectionId, HostId, NetEntityId, PrefabEntityId};

use super::{NetEntityRole, NetworkEntityRpcMessage, ReplicationRecord};

/// The entity object model replication works against.
///
/// Properties are addressed by index. Each value is handed around in its
/// serialized form, so comparing two snapshots byte for byte tells whether a
/// property changed.
pub trait NetworkEntityWorld {
    /// Host this world runs on
    fn host_id(&self) -> HostId;

    fn has_entity(&self, entity: NetEntityId) -> bool;

    fn is_entity_active(&self, entity: NetEntityId) -> bool;

    /// Whether every dependency of a created entity is present
    fn is_ready_to_activate(&self, _entity: NetEntityId) -> bool {
        true
    }

    fn activate_entity(&mut self, entity: NetEntityId);

    fn entity_role(&self, entity: NetEntityId) -> Option<NetEntityRole>;

    fn set_entity_role(&mut self, entity: NetEntityId, role: NetEntityRole);

    fn prefab_id(&self, entity: NetEntityId) -> Option<PrefabEntityId>;

    /// Builds an inactive entity from its prefab. Returns false on failure.
    fn create_entity(
        &mut self,
        entity: NetEntityId,
        prefab: &PrefabEntityId,
        role: NetEntityRole,
    ) -> bool;

    fn remove_entity(&mut self, entity: NetEntityId);

    /// Records which connection feeds this entity its state
    fn set_owning_connection(&mut self, _entity: NetEntityId, _connection: ConnectionId) {}

    /// Serialized value of every replicated property, by property index
    fn property_snapshot(&self, entity: NetEntityId) -> Vec<Vec<u8>>;

    /// Applies one serialized property value. Returns false if the value does
    /// not decode for that property.
    fn apply_property(&mut self, entity: NetEntityId, property: usize, value: &[u8]) -> bool;

    /// Properties an autonomous proxy computes for itself
    fn predictable_properties(&self, _entity: NetEntityId) -> ReplicationRecord {
        ReplicationRecord::default()
    }

    /// Delivers an RPC. Returns false if the entity's role may not receive it.
    fn handle_rpc(&mut self, entity: NetEntityId, message: &NetworkEntityRpcMessage) -> bool;
}
