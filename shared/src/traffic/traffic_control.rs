use std::time::Duration;

use crate::{backends::Instant, types::SequenceNumber};

use super::{
    CongestionState, DatagramInfo, TrafficControlConnectionId, TrafficControlError,
    TrafficStatistics,
};

/// Per-connection congestion and acknowledgement accounting.
///
/// All methods run on the single thread that owns the connections; nothing
/// here locks. Every time-dependent call takes `now` from the caller.
pub trait TrafficControl {
    /// Starts tracking a new connection
    fn on_connect(&mut self, now: &Instant) -> TrafficControlConnectionId;

    fn on_disconnect(&mut self, id: &TrafficControlConnectionId) -> Result<(), TrafficControlError>;

    /// Forgets loss seen so far; loss during connection setup says nothing
    /// about steady-state quality
    fn on_handshake_complete(
        &mut self,
        id: &TrafficControlConnectionId,
    ) -> Result<(), TrafficControlError>;

    fn on_send(
        &mut self,
        id: &TrafficControlConnectionId,
        info: &DatagramInfo,
        now: &Instant,
    ) -> Result<(), TrafficControlError>;

    /// Must be called right after [`is_resend`](Self::is_resend) asked for a resend
    fn on_resend(
        &mut self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        resend_bytes: u32,
        now: &Instant,
    ) -> Result<(), TrafficControlError>;

    /// Returns whether the caller should try to send more right away
    fn on_ack(
        &mut self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        now: &Instant,
    ) -> Result<bool, TrafficControlError>;

    fn on_nack(
        &mut self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        now: &Instant,
    ) -> Result<(), TrafficControlError>;

    fn on_received(
        &mut self,
        id: &TrafficControlConnectionId,
        info: &DatagramInfo,
        now: &Instant,
    ) -> Result<(), TrafficControlError>;

    fn is_send(&self, id: &TrafficControlConnectionId) -> Result<bool, TrafficControlError>;

    /// Whether a standalone ack datagram is due
    fn is_send_ack(
        &self,
        id: &TrafficControlConnectionId,
        now: &Instant,
    ) -> Result<bool, TrafficControlError>;

    fn available_window_size(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<u32, TrafficControlError>;

    /// Returns the number of bytes to resend when the datagram is overdue
    fn is_resend(
        &self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        now: &Instant,
    ) -> Result<Option<u32>, TrafficControlError>;

    /// When the in-flight datagram should be considered lost
    fn resend_time(
        &self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
    ) -> Result<Instant, TrafficControlError>;

    fn resend_timeout(&self, id: &TrafficControlConnectionId)
        -> Result<Duration, TrafficControlError>;

    /// Whether the connection factor has crossed `threshold`
    fn is_disconnect(
        &self,
        id: &TrafficControlConnectionId,
        threshold: f32,
    ) -> Result<bool, TrafficControlError>;

    /// Ticks every connection once. Returns true exactly when a statistics
    /// period has just completed.
    fn update(&mut self, now: &Instant) -> bool;

    fn query_statistics(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<TrafficStatistics, TrafficControlError>;

    fn query_congestion_state(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<CongestionState, TrafficControlError>;
}
