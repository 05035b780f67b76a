use std::time::Duration;

use crate::{backends::Instant, timeout_queue::TimeoutId, types::SequenceNumber};

/// Transport metadata describing one datagram, as handed to traffic control
/// on send and on receive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatagramInfo {
    pub sequence: SequenceNumber,
    /// Total size on the wire, headers included
    pub size: u32,
    /// Payload-only size
    pub effective_size: u32,
}

impl DatagramInfo {
    pub fn new(sequence: SequenceNumber, size: u32, effective_size: u32) -> Self {
        Self {
            sequence,
            size,
            effective_size,
        }
    }
}

/// Record of an in-flight datagram. Created on send, updated on resend,
/// discarded once acked, nacked, or expired as lost.
#[derive(Clone, Debug)]
pub struct DatagramControlData {
    pub sequence: SequenceNumber,
    pub send_time: Instant,
    pub size: u32,
    pub effective_size: u32,
    pub resend_count: u32,
    pub(crate) lost_timeout: TimeoutId,
}

impl DatagramControlData {
    pub(crate) fn new(info: &DatagramInfo, send_time: Instant, lost_timeout: TimeoutId) -> Self {
        Self {
            sequence: info.sequence,
            send_time,
            size: info.size,
            effective_size: info.effective_size,
            resend_count: 0,
            lost_timeout,
        }
    }

    /// Time since the latest (re)send, as measured at `now`
    pub fn age(&self, now: &Instant) -> Duration {
        self.send_time.elapsed(now)
    }
}
