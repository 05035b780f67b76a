use std::time::Duration;

/// Per-period traffic counters for one connection.
///
/// Snapshots handed out by `query_statistics` describe the last completed
/// period; counters of the running period are not visible until rollover.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrafficStatistics {
    pub bytes_sent: u64,
    pub bytes_resent: u64,
    pub bytes_received: u64,
    pub bytes_acked: u64,
    pub packets_sent: u32,
    pub packets_resent: u32,
    pub packets_received: u32,
    pub packets_acked: u32,
    pub packets_lost: u32,
    /// Smoothed RTT at the end of the period
    pub rtt: Duration,
    /// Fraction of the period's delivery outcomes that were losses
    pub packet_loss: f32,
    /// 1.0 for a perfect link, 0.0 for a link that should be dropped
    pub connection_quality: f32,
}

/// Read-only view of a connection's congestion controller
#[derive(Clone, Debug, PartialEq)]
pub struct CongestionState {
    pub window_bytes: u32,
    pub bytes_in_flight: u32,
    pub datagrams_in_flight: usize,
    pub smoothed_rtt: Duration,
    pub rtt_variance: Duration,
    pub resend_timeout: Duration,
    pub connection_factor: f32,
    pub in_recovery: bool,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StatisticsAccumulator {
    current: TrafficStatistics,
    completed: TrafficStatistics,
}

impl StatisticsAccumulator {
    pub fn current_mut(&mut self) -> &mut TrafficStatistics {
        &mut self.current
    }

    pub fn completed(&self) -> &TrafficStatistics {
        &self.completed
    }

    /// Drops loss accounting of the running period
    pub fn reset_loss(&mut self) {
        self.current.packets_lost = 0;
        self.current.packets_acked = 0;
        self.current.bytes_acked = 0;
    }

    pub fn roll_over(&mut self, rtt: Duration, connection_quality: f32) {
        let mut finished = std::mem::take(&mut self.current);
        let outcomes = finished.packets_acked + finished.packets_lost;
        finished.packet_loss = if outcomes == 0 {
            0.0
        } else {
            finished.packets_lost as f32 / outcomes as f32
        };
        finished.rtt = rtt;
        finished.connection_quality = connection_quality;
        self.completed = finished;
    }
}
