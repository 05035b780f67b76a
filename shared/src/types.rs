use std::fmt;

use netrep_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

/// 16 bit cyclic counter used for datagrams and packets
pub type SequenceNumber = u16;
pub type PacketIndex = SequenceNumber;

/// Identifies a replicated entity across every host of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetEntityId(u64);

impl NetEntityId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serde for NetEntityId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedVariableInteger::<7>::new(self.0).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let value = UnsignedVariableInteger::<7>::de(reader)?;
        Ok(Self(value.try_to()?))
    }
}

/// Identifies a host (a server shard or a client) taking part in replication
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(u32);

impl HostId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

impl Serde for HostId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedVariableInteger::<7>::new(self.0).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let value = UnsignedVariableInteger::<7>::de(reader)?;
        Ok(Self(value.try_to()?))
    }
}

/// Identifies one transport connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection-{}", self.0)
    }
}

/// Which spawnable asset (and which entity inside it) a replicated entity is
/// built from. Sent with the first update so the remote side can construct it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrefabEntityId {
    pub prefab_name: String,
    pub entity_offset: u32,
}

impl PrefabEntityId {
    pub fn new(prefab_name: impl Into<String>, entity_offset: u32) -> Self {
        Self {
            prefab_name: prefab_name.into(),
            entity_offset,
        }
    }
}

impl fmt::Display for PrefabEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.prefab_name, self.entity_offset)
    }
}

impl Serde for PrefabEntityId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.prefab_name.ser(writer);
        UnsignedVariableInteger::<5>::new(self.entity_offset).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let prefab_name = String::de(reader)?;
        let entity_offset = UnsignedVariableInteger::<5>::de(reader)?.try_to()?;
        Ok(Self {
            prefab_name,
            entity_offset,
        })
    }
}
