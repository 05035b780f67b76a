use netrep_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

use crate::types::{HostId, NetEntityId, PrefabEntityId};

use super::{NetEntityRole, ReplicationError, ReplicationRecord};

/// Serialized values of the properties set in `change_bitset`, in ascending
/// property index order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyDelta {
    pub change_bitset: ReplicationRecord,
    pub payload: Vec<Vec<u8>>,
}

impl PropertyDelta {
    /// Picks the values of the properties set in `record` out of a full snapshot
    pub fn from_snapshot(record: &ReplicationRecord, snapshot: &[Vec<u8>]) -> Self {
        let mut change_bitset = ReplicationRecord::new(record.property_count());
        let mut payload = Vec::with_capacity(record.count_set());
        for index in record.iter_set() {
            if let Some(value) = snapshot.get(index) {
                change_bitset.set_bit(index, true);
                payload.push(value.clone());
            }
        }
        Self {
            change_bitset,
            payload,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Pairs each changed property index with its value. Fails when the
    /// bitset and the payload disagree on the number of properties.
    pub fn changes(&self) -> Result<Vec<(usize, &[u8])>, ReplicationError> {
        let expected = self.change_bitset.count_set();
        if expected != self.payload.len() {
            return Err(ReplicationError::MalformedDelta {
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(self
            .change_bitset
            .iter_set()
            .zip(self.payload.iter().map(Vec::as_slice))
            .collect())
    }
}

impl Serde for PropertyDelta {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.change_bitset.ser(writer);
        for value in &self.payload {
            value.ser(writer);
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let change_bitset = ReplicationRecord::de(reader)?;
        let mut payload = Vec::with_capacity(change_bitset.count_set());
        for _ in 0..change_bitset.count_set() {
            payload.push(Vec::<u8>::de(reader)?);
        }
        Ok(Self {
            change_bitset,
            payload,
        })
    }
}

/// Property changes, creation, or deletion of one entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkEntityUpdateMessage {
    pub entity_id: NetEntityId,
    /// Role the receiving host takes for the entity
    pub role: NetEntityRole,
    pub is_delete: bool,
    /// Only meaningful on deletes: the entity moved to another host rather
    /// than being destroyed
    pub was_migrated: bool,
    /// Present until the sender knows the receiver has built the entity
    pub prefab: Option<PrefabEntityId>,
    pub delta: PropertyDelta,
}

impl NetworkEntityUpdateMessage {
    pub fn update(
        entity_id: NetEntityId,
        role: NetEntityRole,
        prefab: Option<PrefabEntityId>,
        delta: PropertyDelta,
    ) -> Self {
        Self {
            entity_id,
            role,
            is_delete: false,
            was_migrated: false,
            prefab,
            delta,
        }
    }

    pub fn delete(entity_id: NetEntityId, was_migrated: bool) -> Self {
        Self {
            entity_id,
            role: NetEntityRole::InvalidRole,
            is_delete: true,
            was_migrated,
            prefab: None,
            delta: PropertyDelta::default(),
        }
    }

    pub fn estimated_serialize_size(&self) -> usize {
        self.bit_length().div_ceil(8) as usize
    }
}

impl Serde for NetworkEntityUpdateMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.entity_id.ser(writer);
        self.is_delete.ser(writer);
        if self.is_delete {
            self.was_migrated.ser(writer);
            return;
        }
        self.role.ser(writer);
        self.prefab.ser(writer);
        self.delta.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let entity_id = NetEntityId::de(reader)?;
        if bool::de(reader)? {
            let was_migrated = bool::de(reader)?;
            return Ok(Self::delete(entity_id, was_migrated));
        }
        let role = NetEntityRole::de(reader)?;
        let prefab = Option::<PrefabEntityId>::de(reader)?;
        let delta = PropertyDelta::de(reader)?;
        Ok(Self::update(entity_id, role, prefab, delta))
    }
}

/// A remote procedure call on one entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkEntityRpcMessage {
    pub entity_id: NetEntityId,
    pub rpc_id: u16,
    pub reliable: bool,
    pub args: Vec<u8>,
}

impl NetworkEntityRpcMessage {
    pub fn new(entity_id: NetEntityId, rpc_id: u16, reliable: bool, args: Vec<u8>) -> Self {
        Self {
            entity_id,
            rpc_id,
            reliable,
            args,
        }
    }

    pub fn estimated_serialize_size(&self) -> usize {
        self.bit_length().div_ceil(8) as usize
    }
}

impl Serde for NetworkEntityRpcMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.entity_id.ser(writer);
        UnsignedVariableInteger::<7>::new(self.rpc_id).ser(writer);
        self.reliable.ser(writer);
        self.args.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let entity_id = NetEntityId::de(reader)?;
        let rpc_id = UnsignedVariableInteger::<7>::de(reader)?.try_to()?;
        let reliable = bool::de(reader)?;
        let args = Vec::<u8>::de(reader)?;
        Ok(Self::new(entity_id, rpc_id, reliable, args))
    }
}

/// Hands authority over an entity to the receiving host, along with the
/// full property state at the moment of the hand-off
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityMigrationMessage {
    pub entity_id: NetEntityId,
    pub destination_host: HostId,
    pub prefab: PrefabEntityId,
    pub snapshot: PropertyDelta,
}

impl Serde for EntityMigrationMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.entity_id.ser(writer);
        self.destination_host.ser(writer);
        self.prefab.ser(writer);
        self.snapshot.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            entity_id: NetEntityId::de(reader)?,
            destination_host: HostId::de(reader)?,
            prefab: PrefabEntityId::de(reader)?,
            snapshot: PropertyDelta::de(reader)?,
        })
    }
}
