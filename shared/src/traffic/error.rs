use thiserror::Error;

use crate::types::SequenceNumber;

/// Errors raised by traffic control accounting. Each one is a protocol
/// violation or a stale handle, never a transient network condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrafficControlError {
    /// The connection id was disconnected, and its slot may have been reused
    #[error("Traffic control connection {key:#x} is not connected")]
    StaleConnection { key: u64 },

    /// Ack or nack for a sequence number this connection never sent
    #[error("Datagram {sequence} was never sent on this connection")]
    UnsentDatagram { sequence: SequenceNumber },

    /// Operation on a datagram that is not in flight
    #[error("Datagram {sequence} is not in flight on this connection")]
    DatagramNotInFlight { sequence: SequenceNumber },

    /// A sequence number was sent twice while the first send was still in flight
    #[error("Datagram {sequence} is already in flight on this connection")]
    DuplicateDatagram { sequence: SequenceNumber },
}
