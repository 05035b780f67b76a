use std::{default::Default, time::Duration};

use netrep_serde::MTU_SIZE_BYTES;

/// Contains Config properties which tune congestion control, resends and
/// connection-quality tracking for every connection of an
/// [`AimdTrafficControl`](super::AimdTrafficControl)
#[derive(Clone, Debug)]
pub struct TrafficControlConfig {
    /// Congestion window a new connection starts with, in bytes
    pub initial_window_bytes: u32,
    /// The window never shrinks below this, so a connected peer can always
    /// make progress with at least one datagram
    pub min_window_bytes: u32,
    /// Upper bound on the congestion window
    pub max_window_bytes: u32,
    /// Bytes added to the window each time a full window has been acked
    pub additive_increase_bytes: u32,
    /// Factor the window is scaled by on loss, at most once per recovery epoch
    pub multiplicative_decrease: f32,
    /// Multiplier applied to the smoothed RTT when deciding a datagram is overdue
    pub resend_rtt_factor: f32,
    pub min_resend_time: Duration,
    pub max_resend_time: Duration,
    /// RTT assumed before the first sample arrives
    pub initial_rtt: Duration,
    /// Multiple of the resend time after which an unacked datagram is
    /// discarded and counted lost
    pub lost_datagram_rtt_factor: f32,
    /// Longest a received datagram may wait before a standalone ack is due
    pub ack_delay: Duration,
    /// Number of received datagrams after which a standalone ack is due
    pub max_unacked_receives: u32,
    /// Weight of each new delivery outcome in the smoothed loss estimate
    pub connection_factor_smoothing: f32,
    /// RTT at which the RTT half of the connection factor saturates to 1.0
    pub reference_rtt: Duration,
    /// Length of one statistics period
    pub statistics_interval: Duration,
}

impl Default for TrafficControlConfig {
    fn default() -> Self {
        let mtu = MTU_SIZE_BYTES as u32;
        Self {
            initial_window_bytes: 8 * 1024,
            min_window_bytes: mtu,
            max_window_bytes: 256 * 1024,
            additive_increase_bytes: mtu,
            multiplicative_decrease: 0.5,
            resend_rtt_factor: 2.0,
            min_resend_time: Duration::from_millis(50),
            max_resend_time: Duration::from_secs(2),
            initial_rtt: Duration::from_millis(100),
            lost_datagram_rtt_factor: 4.0,
            ack_delay: Duration::from_millis(33),
            max_unacked_receives: 8,
            connection_factor_smoothing: 0.1,
            reference_rtt: Duration::from_millis(500),
            statistics_interval: Duration::from_secs(1),
        }
    }
}
