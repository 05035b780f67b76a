use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use log::{debug, warn};

use crate::{
    backends::Instant,
    timeout_queue::{TimeoutId, TimeoutQueue, TimeoutResult},
    types::NetEntityId,
};

use super::{EntityReplicator, NetworkEntityRpcMessage, NetworkEntityWorld, ReplicationError};

struct OrphanedRpcs {
    messages: VecDeque<NetworkEntityRpcMessage>,
    timeout_id: TimeoutId,
}

/// RPCs that arrived for entities this side has no replicator for yet.
///
/// They are held per entity in arrival order until a replicator shows up,
/// or dropped once the entity's timeout fires.
#[derive(Default)]
pub struct OrphanedEntityRpcs {
    entity_rpcs: HashMap<NetEntityId, OrphanedRpcs>,
    timeout_queue: TimeoutQueue<NetEntityId>,
}

impl OrphanedEntityRpcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities with held RPCs
    pub fn len(&self) -> usize {
        self.entity_rpcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_rpcs.is_empty()
    }

    /// Number of held RPCs across all entities
    pub fn rpc_count(&self) -> usize {
        self.entity_rpcs
            .values()
            .map(|orphaned| orphaned.messages.len())
            .sum()
    }

    pub fn contains(&self, entity: NetEntityId) -> bool {
        self.entity_rpcs.contains_key(&entity)
    }

    /// Holds `message` until its entity gets a replicator. The timeout is
    /// armed by the first RPC held for an entity.
    pub fn add_orphaned_rpc(
        &mut self,
        entity: NetEntityId,
        message: NetworkEntityRpcMessage,
        now: &Instant,
        timeout: Duration,
    ) {
        if let Some(orphaned) = self.entity_rpcs.get_mut(&entity) {
            orphaned.messages.push_back(message);
            return;
        }

        let timeout_id = self.timeout_queue.register_item(now, timeout, entity);
        let mut messages = VecDeque::new();
        messages.push_back(message);
        self.entity_rpcs.insert(
            entity,
            OrphanedRpcs {
                messages,
                timeout_id,
            },
        );
    }

    /// Delivers every RPC held for the replicator's entity, in arrival order,
    /// and forgets them. Returns how many were delivered.
    pub fn dispatch_orphaned_rpcs(
        &mut self,
        replicator: &EntityReplicator,
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<usize, ReplicationError> {
        let Some(orphaned) = self.entity_rpcs.remove(&replicator.entity()) else {
            return Ok(0);
        };
        self.timeout_queue.remove_item(&orphaned.timeout_id)?;

        let count = orphaned.messages.len();
        for message in orphaned.messages.iter() {
            replicator.handle_rpc_message(world, message)?;
        }
        debug!(
            "dispatched {} orphaned rpc(s) for entity {}",
            count,
            replicator.entity()
        );
        Ok(count)
    }

    /// Drops the RPCs of every entity whose timeout fired. Returns the
    /// entities and how many RPCs each lost.
    pub fn update(&mut self, now: &Instant) -> Vec<(NetEntityId, usize)> {
        let expired = self
            .timeout_queue
            .update_timeouts(now, |_, _| TimeoutResult::Delete);

        let mut dropped = Vec::with_capacity(expired.len());
        for (_, entity) in expired {
            if let Some(orphaned) = self.entity_rpcs.remove(&entity) {
                warn!(
                    "dropping {} orphaned rpc(s) for entity {}, no replicator arrived in time",
                    orphaned.messages.len(),
                    entity
                );
                dropped.push((entity, orphaned.messages.len()));
            }
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.entity_rpcs.clear();
        self.timeout_queue = TimeoutQueue::new();
    }
}
