use crate::{types::SequenceNumber, wrapping_number::sequence_greater_than};

/// How many of the most recent sequence numbers a connection remembers sending
pub const SENT_HISTORY_LENGTH: u16 = 1024;

const WORDS: usize = SENT_HISTORY_LENGTH as usize / 64;

/// Ring bitset over the last [`SENT_HISTORY_LENGTH`] sequence numbers behind
/// the newest one sent. A set bit means that number went out.
///
/// The ring length divides the sequence space, so a number keeps its slot
/// across wraparound.
#[derive(Clone, Debug)]
pub struct SentHistory {
    newest: Option<SequenceNumber>,
    bits: [u64; WORDS],
}

impl Default for SentHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SentHistory {
    pub fn new() -> Self {
        Self {
            newest: None,
            bits: [0; WORDS],
        }
    }

    pub fn newest(&self) -> Option<SequenceNumber> {
        self.newest
    }

    pub fn record(&mut self, sequence: SequenceNumber) {
        match self.newest {
            None => self.newest = Some(sequence),
            Some(newest) if sequence_greater_than(sequence, newest) => {
                // numbers jumped over were never sent
                if sequence.wrapping_sub(newest) >= SENT_HISTORY_LENGTH {
                    self.bits = [0; WORDS];
                } else {
                    let mut skipped = newest.wrapping_add(1);
                    while skipped != sequence {
                        self.set(skipped, false);
                        skipped = skipped.wrapping_add(1);
                    }
                }
                self.newest = Some(sequence);
            }
            Some(newest) => {
                if newest.wrapping_sub(sequence) >= SENT_HISTORY_LENGTH {
                    return;
                }
            }
        }
        self.set(sequence, true);
    }

    /// False for anything newer than the newest send or older than the ring
    pub fn was_sent(&self, sequence: SequenceNumber) -> bool {
        let Some(newest) = self.newest else {
            return false;
        };
        if sequence_greater_than(sequence, newest)
            || newest.wrapping_sub(sequence) >= SENT_HISTORY_LENGTH
        {
            return false;
        }
        let (word, mask) = Self::slot(sequence);
        self.bits[word] & mask != 0
    }

    fn set(&mut self, sequence: SequenceNumber, sent: bool) {
        let (word, mask) = Self::slot(sequence);
        if sent {
            self.bits[word] |= mask;
        } else {
            self.bits[word] &= !mask;
        }
    }

    fn slot(sequence: SequenceNumber) -> (usize, u64) {
        let index = usize::from(sequence % SENT_HISTORY_LENGTH);
        (index / 64, 1u64 << (index % 64))
    }
}
