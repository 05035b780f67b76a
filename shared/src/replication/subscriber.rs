use crate::{
    types::{NetEntityId, PacketIndex},
    wrapping_number::sequence_greater_than,
};

use super::{NetworkEntityWorld, PropertyDelta, ReplicationError};

/// Inbound half of an entity replicator. Remembers the newest packet an
/// update arrived in, so older or duplicate updates are recognised.
#[derive(Default)]
pub struct PropertySubscriber {
    last_received_packet_id: Option<PacketIndex>,
}

impl PropertySubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_received_packet_id(&self) -> Option<PacketIndex> {
        self.last_received_packet_id
    }

    /// True for the first update seen and for anything newer than the last one
    pub fn is_packet_id_valid(&self, packet_id: PacketIndex) -> bool {
        match self.last_received_packet_id {
            None => true,
            Some(last) => sequence_greater_than(packet_id, last),
        }
    }

    /// Applies a delta to the world. A `None` packet id comes from migration
    /// and leaves the ordering state untouched.
    ///
    /// Returns the applied `(property, value)` pairs.
    pub fn handle_property_change(
        &mut self,
        packet_id: Option<PacketIndex>,
        entity: NetEntityId,
        delta: &PropertyDelta,
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<Vec<(usize, Vec<u8>)>, ReplicationError> {
        let changes = delta.changes()?;
        let mut applied = Vec::with_capacity(changes.len());
        for (property, value) in changes {
            if !world.apply_property(entity, property, value) {
                return Err(ReplicationError::PropertyRejected { entity, property });
            }
            applied.push((property, value.to_vec()));
        }

        if let Some(packet_id) = packet_id {
            if self.is_packet_id_valid(packet_id) {
                self.last_received_packet_id = Some(packet_id);
            }
        }
        Ok(applied)
    }
}
