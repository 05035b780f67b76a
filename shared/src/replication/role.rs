use std::fmt;

use netrep_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedInteger};

/// The part a host plays for one replicated entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NetEntityRole {
    /// Owns the simulation of the entity
    Authority,
    /// A client proxy that also drives the entity, e.g. the player's own avatar
    Autonomous,
    /// A server proxy of an entity owned by a peer server
    Server,
    /// A plain client proxy
    Client,
    InvalidRole,
}

impl NetEntityRole {
    /// Roles that run controller logic for the entity
    pub fn has_controller(&self) -> bool {
        matches!(self, Self::Authority | Self::Autonomous)
    }

    fn to_index(self) -> u8 {
        match self {
            Self::Authority => 0,
            Self::Autonomous => 1,
            Self::Server => 2,
            Self::Client => 3,
            Self::InvalidRole => 4,
        }
    }
}

impl fmt::Display for NetEntityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authority => "Authority",
            Self::Autonomous => "Autonomous",
            Self::Server => "Server",
            Self::Client => "Client",
            Self::InvalidRole => "InvalidRole",
        };
        f.write_str(name)
    }
}

impl Serde for NetEntityRole {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedInteger::<3>::new(self.to_index()).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let index: u8 = UnsignedInteger::<3>::de(reader)?.try_to()?;
        match index {
            0 => Ok(Self::Authority),
            1 => Ok(Self::Autonomous),
            2 => Ok(Self::Server),
            3 => Ok(Self::Client),
            4 => Ok(Self::InvalidRole),
            value => Err(SerdeErr::InvalidDiscriminant {
                type_name: "NetEntityRole",
                value,
            }),
        }
    }

    fn bit_length(&self) -> u32 {
        3
    }
}

/// Which two kinds of host a replication manager connects. Fixed for the
/// lifetime of the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    LocalServerToRemoteClient,
    LocalServerToRemoteServer,
    LocalClientToRemoteServer,
}

impl Mode {
    pub fn is_to_server_client(&self) -> bool {
        *self != Self::LocalServerToRemoteServer
    }
}
