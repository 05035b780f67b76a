use std::time::Duration;

use log::{debug, trace};
use slotmap::{new_key_type, Key, SlotMap};

use crate::{
    backends::Instant,
    sequence_list::SequenceList,
    timeout_queue::{TimeoutQueue, TimeoutResult},
    types::SequenceNumber,
};

use super::{
    sent_history::SentHistory, statistics::StatisticsAccumulator, CongestionState, CongestionWindow, DatagramControlData,
    DatagramInfo, RttEstimator, TrafficControl, TrafficControlConfig, TrafficControlError,
    TrafficStatistics,
};

/// Resends back off exponentially, up to this many doublings
const MAX_RESEND_BACKOFF_SHIFT: u32 = 4;

new_key_type! {
    /// Handle to one connection tracked by an [`AimdTrafficControl`].
    /// Stays invalid once the connection is disconnected.
    pub struct TrafficControlConnectionId;
}

fn stale(id: &TrafficControlConnectionId) -> TrafficControlError {
    TrafficControlError::StaleConnection {
        key: id.data().as_ffi(),
    }
}

struct TrafficControlConnection {
    in_flight: SequenceList<DatagramControlData>,
    bytes_in_flight: u32,
    sent: SentHistory,
    window: CongestionWindow,
    rtt: RttEstimator,
    smoothed_loss: f32,
    lost_timeouts: TimeoutQueue<SequenceNumber>,
    unacked_receives: u32,
    oldest_unacked_receive: Option<Instant>,
    statistics: StatisticsAccumulator,
}

impl TrafficControlConnection {
    fn new(config: &TrafficControlConfig) -> Self {
        Self {
            in_flight: SequenceList::new(),
            bytes_in_flight: 0,
            sent: SentHistory::new(),
            window: CongestionWindow::new(config),
            rtt: RttEstimator::new(config.initial_rtt),
            smoothed_loss: 0.0,
            lost_timeouts: TimeoutQueue::new(),
            unacked_receives: 0,
            oldest_unacked_receive: None,
            statistics: StatisticsAccumulator::default(),
        }
    }

    fn resend_timeout(&self, config: &TrafficControlConfig) -> Duration {
        let scaled = self.rtt.smoothed().mul_f32(config.resend_rtt_factor.max(0.0));
        scaled
            .max(self.rtt.retransmission_timeout())
            .clamp(config.min_resend_time, config.max_resend_time)
    }

    fn resend_timeout_for(&self, config: &TrafficControlConfig, record: &DatagramControlData) -> Duration {
        let shift = record.resend_count.min(MAX_RESEND_BACKOFF_SHIFT);
        self.resend_timeout(config)
            .saturating_mul(1 << shift)
            .min(config.max_resend_time)
    }

    fn lost_timeout(&self, config: &TrafficControlConfig) -> Duration {
        self.resend_timeout(config)
            .mul_f32(config.lost_datagram_rtt_factor.max(1.0))
    }

    fn connection_factor(&self, config: &TrafficControlConfig) -> f32 {
        let reference_ms = (config.reference_rtt.as_secs_f32() * 1000.0).max(1.0);
        let rtt_factor = (self.rtt.smoothed_millis() / reference_ms).clamp(0.0, 1.0);
        let loss = self.smoothed_loss.clamp(0.0, 1.0);
        1.0 - (1.0 - loss) * (1.0 - rtt_factor)
    }

    fn is_send(&self) -> bool {
        self.bytes_in_flight < self.window.window()
    }

    fn smooth_loss(&mut self, config: &TrafficControlConfig, lost: bool) {
        let weight = config.connection_factor_smoothing.clamp(0.0, 1.0);
        let sample = if lost { 1.0 } else { 0.0 };
        self.smoothed_loss = self.smoothed_loss * (1.0 - weight) + sample * weight;
    }

    fn release(&mut self, record: &DatagramControlData) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(record.size);
        let _ = self.lost_timeouts.remove_item(&record.lost_timeout);
    }

    /// Returns whether the window size changed
    fn record_delivery(
        &mut self,
        config: &TrafficControlConfig,
        record: &DatagramControlData,
        now: &Instant,
    ) -> bool {
        self.release(record);
        // only unambiguous samples, a resent datagram's ack may answer either send
        if record.resend_count == 0 {
            self.rtt.add_sample(record.age(now));
        }
        self.smooth_loss(config, false);

        let stats = self.statistics.current_mut();
        stats.packets_acked += 1;
        stats.bytes_acked += u64::from(record.size);

        self.window.on_ack(record.size, &record.send_time)
    }

    /// Returns whether the window size changed
    fn record_loss(
        &mut self,
        config: &TrafficControlConfig,
        record: &DatagramControlData,
        now: &Instant,
    ) -> bool {
        self.release(record);
        self.smooth_loss(config, true);
        self.statistics.current_mut().packets_lost += 1;

        self.window.on_loss(&record.send_time, now)
    }

    /// An ack or nack for a sequence that is no longer in flight is either a
    /// late answer for something already resolved, or for something never sent
    fn check_was_sent(&self, sequence: SequenceNumber) -> Result<(), TrafficControlError> {
        if self.sent.was_sent(sequence) {
            trace!("late answer for datagram {}", sequence);
            Ok(())
        } else {
            Err(TrafficControlError::UnsentDatagram { sequence })
        }
    }

    fn expire_lost(&mut self, config: &TrafficControlConfig, now: &Instant) {
        let expired = self
            .lost_timeouts
            .update_timeouts(now, |_, _| TimeoutResult::Delete);
        for (_, sequence) in expired {
            if let Some(record) = self.in_flight.remove_scan_from_back(&sequence) {
                debug!(
                    "datagram {} unacked after {:?}, counting it lost",
                    sequence,
                    record.age(now)
                );
                // its timeout entry already fired, only the byte count is left
                self.bytes_in_flight = self.bytes_in_flight.saturating_sub(record.size);
                self.smooth_loss(config, true);
                self.statistics.current_mut().packets_lost += 1;
                self.window.on_loss(&record.send_time, now);
            }
        }
    }
}

/// [`TrafficControl`] with an additive-increase, multiplicative-decrease
/// window and Jacobson/Karels RTT estimation.
///
/// Connection state lives in a slot map, so an id kept past `on_disconnect`
/// fails with `StaleConnection` instead of touching another connection.
pub struct AimdTrafficControl {
    config: TrafficControlConfig,
    connections: SlotMap<TrafficControlConnectionId, TrafficControlConnection>,
    period_start: Option<Instant>,
}

impl AimdTrafficControl {
    pub fn new(config: TrafficControlConfig) -> Self {
        Self {
            config,
            connections: SlotMap::with_key(),
            period_start: None,
        }
    }

    pub fn config(&self) -> &TrafficControlConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn connection(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<&TrafficControlConnection, TrafficControlError> {
        self.connections.get(*id).ok_or_else(|| stale(id))
    }

    fn connection_mut(
        &mut self,
        id: &TrafficControlConnectionId,
    ) -> Result<&mut TrafficControlConnection, TrafficControlError> {
        self.connections.get_mut(*id).ok_or_else(|| stale(id))
    }

    fn in_flight_record<'a>(
        connection: &'a TrafficControlConnection,
        sequence: SequenceNumber,
    ) -> Result<&'a DatagramControlData, TrafficControlError> {
        connection
            .in_flight
            .get_scan_from_back(&sequence)
            .ok_or(TrafficControlError::DatagramNotInFlight { sequence })
    }
}

impl Default for AimdTrafficControl {
    fn default() -> Self {
        Self::new(TrafficControlConfig::default())
    }
}

impl TrafficControl for AimdTrafficControl {
    fn on_connect(&mut self, now: &Instant) -> TrafficControlConnectionId {
        if self.period_start.is_none() {
            self.period_start = Some(*now);
        }
        self.connections
            .insert(TrafficControlConnection::new(&self.config))
    }

    fn on_disconnect(&mut self, id: &TrafficControlConnectionId) -> Result<(), TrafficControlError> {
        self.connections
            .remove(*id)
            .map(|_| ())
            .ok_or_else(|| stale(id))
    }

    fn on_handshake_complete(
        &mut self,
        id: &TrafficControlConnectionId,
    ) -> Result<(), TrafficControlError> {
        let connection = self.connection_mut(id)?;
        connection.smoothed_loss = 0.0;
        connection.statistics.reset_loss();
        Ok(())
    }

    fn on_send(
        &mut self,
        id: &TrafficControlConnectionId,
        info: &DatagramInfo,
        now: &Instant,
    ) -> Result<(), TrafficControlError> {
        let config = &self.config;
        let connection = self.connections.get_mut(*id).ok_or_else(|| stale(id))?;
        if connection.in_flight.contains_scan_from_back(&info.sequence) {
            return Err(TrafficControlError::DuplicateDatagram {
                sequence: info.sequence,
            });
        }

        let lost_timeout = connection.lost_timeout(config);
        let timeout_id = connection
            .lost_timeouts
            .register_item(now, lost_timeout, info.sequence);
        let record = DatagramControlData::new(info, *now, timeout_id);
        if connection
            .in_flight
            .try_insert_scan_from_back(info.sequence, record)
            .is_err()
        {
            let _ = connection.lost_timeouts.remove_item(&timeout_id);
            return Err(TrafficControlError::DuplicateDatagram {
                sequence: info.sequence,
            });
        }

        connection.bytes_in_flight = connection.bytes_in_flight.saturating_add(info.size);
        connection.sent.record(info.sequence);

        // every outgoing datagram carries our acks
        connection.unacked_receives = 0;
        connection.oldest_unacked_receive = None;

        let stats = connection.statistics.current_mut();
        stats.packets_sent += 1;
        stats.bytes_sent += u64::from(info.size);
        Ok(())
    }

    fn on_resend(
        &mut self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        resend_bytes: u32,
        now: &Instant,
    ) -> Result<(), TrafficControlError> {
        let config = &self.config;
        let connection = self.connections.get_mut(*id).ok_or_else(|| stale(id))?;
        let lost_timeout = connection.lost_timeout(config);

        let record = connection
            .in_flight
            .get_mut_scan_from_back(&sequence)
            .ok_or(TrafficControlError::DatagramNotInFlight { sequence })?;
        let previous_size = record.size;
        record.size = resend_bytes;
        record.send_time = *now;
        record.resend_count += 1;
        let timeout_id = record.lost_timeout;

        connection.bytes_in_flight = connection
            .bytes_in_flight
            .saturating_sub(previous_size)
            .saturating_add(resend_bytes);
        connection
            .lost_timeouts
            .reset_timeout(&timeout_id, now, lost_timeout)
            .map_err(|_| TrafficControlError::DatagramNotInFlight { sequence })?;

        let stats = connection.statistics.current_mut();
        stats.packets_resent += 1;
        stats.bytes_resent += u64::from(resend_bytes);
        Ok(())
    }

    fn on_ack(
        &mut self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        now: &Instant,
    ) -> Result<bool, TrafficControlError> {
        let config = &self.config;
        let connection = self.connections.get_mut(*id).ok_or_else(|| stale(id))?;
        let Some(record) = connection.in_flight.remove_scan_from_back(&sequence) else {
            connection.check_was_sent(sequence)?;
            return Ok(false);
        };

        let was_blocked = !connection.is_send();
        let window_changed = connection.record_delivery(config, &record, now);
        Ok(window_changed || (was_blocked && connection.is_send()))
    }

    fn on_nack(
        &mut self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        now: &Instant,
    ) -> Result<(), TrafficControlError> {
        let config = &self.config;
        let connection = self.connections.get_mut(*id).ok_or_else(|| stale(id))?;
        let Some(record) = connection.in_flight.remove_scan_from_back(&sequence) else {
            return connection.check_was_sent(sequence);
        };

        if connection.record_loss(config, &record, now) {
            debug!(
                "datagram {} lost, window now {} bytes",
                sequence,
                connection.window.window()
            );
        }
        Ok(())
    }

    fn on_received(
        &mut self,
        id: &TrafficControlConnectionId,
        info: &DatagramInfo,
        now: &Instant,
    ) -> Result<(), TrafficControlError> {
        let connection = self.connection_mut(id)?;
        connection.unacked_receives += 1;
        if connection.oldest_unacked_receive.is_none() {
            connection.oldest_unacked_receive = Some(*now);
        }

        let stats = connection.statistics.current_mut();
        stats.packets_received += 1;
        stats.bytes_received += u64::from(info.size);
        Ok(())
    }

    fn is_send(&self, id: &TrafficControlConnectionId) -> Result<bool, TrafficControlError> {
        Ok(self.connection(id)?.is_send())
    }

    fn is_send_ack(
        &self,
        id: &TrafficControlConnectionId,
        now: &Instant,
    ) -> Result<bool, TrafficControlError> {
        let connection = self.connection(id)?;
        if connection.unacked_receives >= self.config.max_unacked_receives.max(1) {
            return Ok(true);
        }
        Ok(connection
            .oldest_unacked_receive
            .is_some_and(|oldest| oldest.elapsed(now) >= self.config.ack_delay))
    }

    fn available_window_size(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<u32, TrafficControlError> {
        let connection = self.connection(id)?;
        let window = &connection.window;
        Ok(window
            .window()
            .saturating_sub(connection.bytes_in_flight)
            .max(window.min_window())
            .min(window.max_window()))
    }

    fn is_resend(
        &self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
        now: &Instant,
    ) -> Result<Option<u32>, TrafficControlError> {
        let connection = self.connection(id)?;
        let record = Self::in_flight_record(connection, sequence)?;
        let due = record
            .send_time
            .plus(connection.resend_timeout_for(&self.config, record));
        if due.is_after(now) {
            Ok(None)
        } else {
            Ok(Some(record.size))
        }
    }

    fn resend_time(
        &self,
        id: &TrafficControlConnectionId,
        sequence: SequenceNumber,
    ) -> Result<Instant, TrafficControlError> {
        let connection = self.connection(id)?;
        let record = Self::in_flight_record(connection, sequence)?;
        Ok(record
            .send_time
            .plus(connection.resend_timeout_for(&self.config, record)))
    }

    fn resend_timeout(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<Duration, TrafficControlError> {
        Ok(self.connection(id)?.resend_timeout(&self.config))
    }

    fn is_disconnect(
        &self,
        id: &TrafficControlConnectionId,
        threshold: f32,
    ) -> Result<bool, TrafficControlError> {
        Ok(self.connection(id)?.connection_factor(&self.config) > threshold)
    }

    fn update(&mut self, now: &Instant) -> bool {
        let config = &self.config;
        for (_, connection) in self.connections.iter_mut() {
            connection.expire_lost(config, now);
        }

        let Some(period_start) = self.period_start else {
            self.period_start = Some(*now);
            return false;
        };
        if period_start.elapsed(now) < config.statistics_interval {
            return false;
        }

        for (_, connection) in self.connections.iter_mut() {
            let rtt = connection.rtt.smoothed();
            let quality = 1.0 - connection.connection_factor(config);
            connection.statistics.roll_over(rtt, quality);
        }
        self.period_start = Some(*now);
        true
    }

    fn query_statistics(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<TrafficStatistics, TrafficControlError> {
        Ok(self.connection(id)?.statistics.completed().clone())
    }

    fn query_congestion_state(
        &self,
        id: &TrafficControlConnectionId,
    ) -> Result<CongestionState, TrafficControlError> {
        let connection = self.connection(id)?;
        Ok(CongestionState {
            window_bytes: connection.window.window(),
            bytes_in_flight: connection.bytes_in_flight,
            datagrams_in_flight: connection.in_flight.len(),
            smoothed_rtt: connection.rtt.smoothed(),
            rtt_variance: connection.rtt.variance(),
            resend_timeout: connection.resend_timeout(&self.config),
            connection_factor: connection.connection_factor(&self.config),
            in_recovery: connection.window.in_recovery(),
        })
    }
}
