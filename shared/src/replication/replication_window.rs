use std::collections::BTreeMap;

use crate::types::NetEntityId;

use super::{NetEntityRole, NetworkEntityWorld};

/// Entities relevant to one connection, ordered by id, with the role the
/// remote side should take for each
pub type ReplicationSet = BTreeMap<NetEntityId, NetEntityRole>;

/// Interest management policy for one connection
pub trait ReplicationWindow {
    /// Whether a new replication set is ready to be applied
    fn replication_set_update_ready(&mut self) -> bool;

    fn replication_set(&self) -> &ReplicationSet;

    /// The remote role for `entity` if it is relevant to this connection
    fn is_in_window(&self, entity: NetEntityId) -> Option<NetEntityRole>;

    /// Recomputes the replication set from the current world state
    fn update_window(&mut self, world: &dyn NetworkEntityWorld);
}
