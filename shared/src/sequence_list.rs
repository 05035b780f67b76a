use thiserror::Error;

use crate::{types::SequenceNumber, wrapping_number::sequence_less_than};

/// Errors that can occur during SequenceList operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// Attempted to insert a duplicate ID into the sequence list
    #[error("Duplicate sequence ID {id} not allowed in SequenceList")]
    DuplicateId { id: SequenceNumber },
}

/// Items ordered by wrapping sequence number, oldest first.
///
/// New items almost always carry the newest sequence number, so inserts and
/// lookups scan from the back and stop as soon as they pass an older id.
pub struct SequenceList<T> {
    list: Vec<(SequenceNumber, T)>,
}

impl<T> Default for SequenceList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SequenceList<T> {
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn front(&self) -> Option<&(SequenceNumber, T)> {
        self.list.first()
    }

    pub fn pop_front(&mut self) -> Option<(SequenceNumber, T)> {
        if self.list.is_empty() {
            return None;
        }
        Some(self.list.remove(0))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SequenceNumber, T)> {
        self.list.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SequenceNumber, &mut T)> {
        self.list.iter_mut().map(|(id, item)| (*id, item))
    }

    fn position_scan_from_back(&self, id: SequenceNumber) -> Option<usize> {
        for (index, (old_id, _)) in self.list.iter().enumerate().rev() {
            if *old_id == id {
                return Some(index);
            }
            if sequence_less_than(*old_id, id) {
                return None;
            }
        }
        None
    }

    pub fn contains_scan_from_back(&self, id: &SequenceNumber) -> bool {
        self.position_scan_from_back(*id).is_some()
    }

    pub fn get_scan_from_back(&self, id: &SequenceNumber) -> Option<&T> {
        let index = self.position_scan_from_back(*id)?;
        self.list.get(index).map(|(_, item)| item)
    }

    pub fn get_mut_scan_from_back(&mut self, id: &SequenceNumber) -> Option<&mut T> {
        let index = self.position_scan_from_back(*id)?;
        self.list.get_mut(index).map(|(_, item)| item)
    }

    /// Attempts to insert an item with the given ID, scanning from the back.
    /// Returns an error if the ID already exists.
    pub fn try_insert_scan_from_back(
        &mut self,
        id: SequenceNumber,
        item: T,
    ) -> Result<(), SequenceError> {
        let mut index = self.list.len();
        while index > 0 {
            let old_id = self.list[index - 1].0;
            if old_id == id {
                return Err(SequenceError::DuplicateId { id });
            }
            if sequence_less_than(old_id, id) {
                break;
            }
            index -= 1;
        }
        self.list.insert(index, (id, item));
        Ok(())
    }

    pub fn remove_scan_from_back(&mut self, id: &SequenceNumber) -> Option<T> {
        let index = self.position_scan_from_back(*id)?;
        Some(self.list.remove(index).1)
    }

    /// Removes and returns every item for which `predicate` holds, oldest first
    pub fn drain_where(
        &mut self,
        mut predicate: impl FnMut(SequenceNumber, &T) -> bool,
    ) -> Vec<(SequenceNumber, T)> {
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.list.len());
        for (id, item) in self.list.drain(..) {
            if predicate(id, &item) {
                drained.push((id, item));
            } else {
                kept.push((id, item));
            }
        }
        self.list = kept;
        drained
    }
}
