//! # Netrep Shared
//! Per-connection replication core: wrapping sequence arithmetic, a polled
//! timeout queue, AIMD traffic control, and the entity replication manager
//! that keeps authoritative entities and their remote proxies in sync.
//!
//! Everything here runs on the thread that owns the connection. Nothing
//! blocks, and nothing locks; time only moves when the caller passes a new
//! [`Instant`] in.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use netrep_serde::{
    BitReader, BitWrite, BitWriter, ConstBitLength, Serde, SerdeErr, SignedInteger,
    SignedVariableInteger, UnsignedInteger, UnsignedVariableInteger, MTU_SIZE_BITS,
    MTU_SIZE_BYTES,
};

mod backends;
mod packet_notifiable;
mod sequence_list;
mod timeout_queue;
mod types;
mod wrapping_number;

pub mod replication;
pub mod traffic;

pub use backends::Instant;
pub use packet_notifiable::PacketNotifiable;
pub use sequence_list::{SequenceError, SequenceList};
pub use timeout_queue::{TimeoutId, TimeoutQueue, TimeoutQueueError, TimeoutResult};
pub use types::{ConnectionId, HostId, NetEntityId, PacketIndex, PrefabEntityId, SequenceNumber};
pub use wrapping_number::{
    sequence_greater_than, sequence_less_than, sequential_distance, try_wrapping_diff,
    wrapping_diff, WrappingNumberError, SEQUENCE_HALF_SPAN,
};
