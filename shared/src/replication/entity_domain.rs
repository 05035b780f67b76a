use crate::types::NetEntityId;

use super::NetworkEntityWorld;

/// Answers whether the remote host of a connection should own an entity
pub trait EntityDomain {
    fn is_in_domain(&self, entity: NetEntityId, world: &dyn NetworkEntityWorld) -> bool;
}
