use std::{cmp::Ordering, collections::BinaryHeap, time::Duration};

use log::trace;
use slotmap::{new_key_type, Key, SlotMap};
use thiserror::Error;

use crate::backends::Instant;

/// Errors that can occur during TimeoutQueue operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutQueueError {
    /// The id was already removed or expired, and its slot may have been reused
    #[error("Timeout id {key:#x} is no longer registered")]
    StaleTimeoutId { key: u64 },
}

new_key_type! {
    /// Opaque handle to an item registered in a [`TimeoutQueue`]
    pub struct TimeoutId;
}

fn stale(id: &TimeoutId) -> TimeoutQueueError {
    TimeoutQueueError::StaleTimeoutId {
        key: id.data().as_ffi(),
    }
}

/// What to do with an item whose timeout has fired
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutResult {
    /// Drop the item from the queue
    Delete,
    /// Keep the item and re-arm it with its original timeout
    Refresh,
}

struct TimeoutItem<T> {
    item: T,
    timeout: Duration,
    deadline: Instant,
    stamp: u64,
}

struct HeapEntry {
    deadline: Instant,
    stamp: u64,
    key: TimeoutId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.stamp == other.stamp
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // reversed, so the BinaryHeap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.stamp.cmp(&self.stamp))
    }
}

/// Delayed-callback queue polled once per tick.
///
/// Items are keyed by a generation-checked [`TimeoutId`]. Removing or
/// re-arming an item leaves its old heap entry behind; stale entries are
/// skipped when they surface.
pub struct TimeoutQueue<T> {
    items: SlotMap<TimeoutId, TimeoutItem<T>>,
    heap: BinaryHeap<HeapEntry>,
    next_stamp: u64,
}

impl<T> Default for TimeoutQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimeoutQueue<T> {
    pub fn new() -> Self {
        Self {
            items: SlotMap::with_key(),
            heap: BinaryHeap::new(),
            next_stamp: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push_entry(&mut self, key: TimeoutId, deadline: Instant) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1);
        self.heap.push(HeapEntry {
            deadline,
            stamp,
            key,
        });
        stamp
    }

    /// Registers `item` to fire `timeout` after `now`
    pub fn register_item(&mut self, now: &Instant, timeout: Duration, item: T) -> TimeoutId {
        let deadline = now.plus(timeout);
        let key = self.items.insert(TimeoutItem {
            item,
            timeout,
            deadline,
            stamp: 0,
        });
        let stamp = self.push_entry(key, deadline);
        if let Some(entry) = self.items.get_mut(key) {
            entry.stamp = stamp;
        }
        key
    }

    pub fn remove_item(&mut self, id: &TimeoutId) -> Result<T, TimeoutQueueError> {
        self.items
            .remove(*id)
            .map(|entry| entry.item)
            .ok_or_else(|| stale(id))
    }

    pub fn get_item(&self, id: &TimeoutId) -> Option<&T> {
        self.items.get(*id).map(|entry| &entry.item)
    }

    pub fn get_item_mut(&mut self, id: &TimeoutId) -> Option<&mut T> {
        self.items.get_mut(*id).map(|entry| &mut entry.item)
    }

    pub fn contains(&self, id: &TimeoutId) -> bool {
        self.items.contains_key(*id)
    }

    pub fn deadline(&self, id: &TimeoutId) -> Option<Instant> {
        self.items.get(*id).map(|entry| entry.deadline)
    }

    /// Re-arms an item to fire `timeout` after `now`, replacing its old timeout
    pub fn reset_timeout(
        &mut self,
        id: &TimeoutId,
        now: &Instant,
        timeout: Duration,
    ) -> Result<(), TimeoutQueueError> {
        if !self.items.contains_key(*id) {
            return Err(stale(id));
        }
        let deadline = now.plus(timeout);
        let stamp = self.push_entry(*id, deadline);
        let entry = self.items.get_mut(*id).ok_or_else(|| stale(id))?;
        entry.timeout = timeout;
        entry.deadline = deadline;
        entry.stamp = stamp;
        Ok(())
    }

    /// Earliest pending deadline, if any item is registered
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale_entries();
        self.heap.peek().map(|entry| entry.deadline)
    }

    fn discard_stale_entries(&mut self) {
        while let Some(entry) = self.heap.peek() {
            let live = self
                .items
                .get(entry.key)
                .is_some_and(|item| item.stamp == entry.stamp);
            if live {
                return;
            }
            self.heap.pop();
        }
    }

    /// Fires every item whose deadline is at or before `now`.
    ///
    /// `handler` decides per item whether it is deleted or refreshed.
    /// Deleted items are returned in deadline order. A refreshed item is
    /// re-armed relative to `now` and cannot fire again in the same call.
    pub fn update_timeouts<F>(&mut self, now: &Instant, mut handler: F) -> Vec<(TimeoutId, T)>
    where
        F: FnMut(TimeoutId, &mut T) -> TimeoutResult,
    {
        let mut deleted = Vec::new();
        let mut refreshed = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.deadline.is_after(now) {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            let Some(item) = self.items.get_mut(entry.key) else {
                continue;
            };
            if item.stamp != entry.stamp {
                continue;
            }

            let id = entry.key;
            match handler(id, &mut item.item) {
                TimeoutResult::Delete => {
                    if let Some(item) = self.items.remove(id) {
                        deleted.push((id, item.item));
                    }
                }
                TimeoutResult::Refresh => {
                    let deadline = now.plus(item.timeout);
                    item.deadline = deadline;
                    refreshed.push((id, deadline));
                }
            }
        }

        for (key, deadline) in refreshed {
            let stamp = self.push_entry(key, deadline);
            if let Some(item) = self.items.get_mut(key) {
                item.stamp = stamp;
            }
        }

        if !deleted.is_empty() {
            trace!("timeout queue expired {} item(s)", deleted.len());
        }
        deleted
    }
}
