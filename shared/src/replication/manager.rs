use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use log::{debug, info, trace, warn};

use crate::{
    backends::Instant,
    packet_notifiable::PacketNotifiable,
    types::{HostId, NetEntityId, PacketIndex, PrefabEntityId},
};

use super::{
    Connection, ConnectionListener, DisconnectReason, EntityDomain, EntityMigratedEvent,
    EntityMigrationMessage, EntityReplicator, Event, Mode, NetEntityRole,
    NetworkEntityRpcMessage, NetworkEntityUpdateMessage, NetworkEntityWorld, OrphanedEntityRpcs,
    PropertyDelta, ReplicationConfig, ReplicationError, ReplicationRecord, ReplicationWindow,
    SendMigrateEntityEvent,
};

/// How an inbound entity update is treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateValidationResult {
    HandleMessage,
    /// Out of date or superseded; ignored without complaint
    DropMessage,
    /// The sender broke the protocol
    DropMessageAndDisconnect,
}

/// Drives entity replication over one connection.
///
/// Each frame the owner calls [`send_updates`](Self::send_updates) and
/// [`activate_pending_entities`](Self::activate_pending_entities), feeds
/// inbound messages to the `handle_*` methods, and reports packet delivery
/// and loss through [`PacketNotifiable`]. Protocol violations are handed to
/// the [`ConnectionListener`]; the manager never closes the connection itself.
pub struct EntityReplicationManager {
    connection: Box<dyn Connection>,
    listener: Box<dyn ConnectionListener>,
    mode: Mode,
    config: ReplicationConfig,
    replication_window: Option<Box<dyn ReplicationWindow>>,
    remote_entity_domain: Option<Box<dyn EntityDomain>>,
    entity_replicators: BTreeMap<NetEntityId, EntityReplicator>,
    replicators_pending_send: BTreeSet<NetEntityId>,
    remote_entities_pending_creation: BTreeSet<NetEntityId>,
    replicators_pending_removal: BTreeSet<NetEntityId>,
    replicators_pending_reset: BTreeSet<NetEntityId>,
    entities_pending_activation: VecDeque<NetEntityId>,
    deferred_reliable_rpcs: Vec<NetworkEntityRpcMessage>,
    deferred_unreliable_rpcs: Vec<NetworkEntityRpcMessage>,
    orphaned_rpcs: OrphanedEntityRpcs,
    sent_update_packets: HashMap<PacketIndex, (Instant, Vec<NetEntityId>)>,
    send_migrate_entity_event: Event<SendMigrateEntityEvent>,
    entity_migrated_event: Event<EntityMigratedEvent>,
    autonomous_entity_replicator_created_event: Event<NetEntityId>,
}

impl EntityReplicationManager {
    pub fn new(
        connection: Box<dyn Connection>,
        listener: Box<dyn ConnectionListener>,
        mode: Mode,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            connection,
            listener,
            mode,
            config,
            replication_window: None,
            remote_entity_domain: None,
            entity_replicators: BTreeMap::new(),
            replicators_pending_send: BTreeSet::new(),
            remote_entities_pending_creation: BTreeSet::new(),
            replicators_pending_removal: BTreeSet::new(),
            replicators_pending_reset: BTreeSet::new(),
            entities_pending_activation: VecDeque::new(),
            deferred_reliable_rpcs: Vec::new(),
            deferred_unreliable_rpcs: Vec::new(),
            orphaned_rpcs: OrphanedEntityRpcs::new(),
            sent_update_packets: HashMap::new(),
            send_migrate_entity_event: Event::new(),
            entity_migrated_event: Event::new(),
            autonomous_entity_replicator_created_event: Event::new(),
        }
    }

    // Setup

    pub fn set_replication_window(&mut self, window: Box<dyn ReplicationWindow>) {
        self.replication_window = Some(window);
    }

    pub fn replication_window(&self) -> Option<&dyn ReplicationWindow> {
        self.replication_window.as_deref()
    }

    pub fn set_remote_entity_domain(&mut self, domain: Box<dyn EntityDomain>) {
        self.remote_entity_domain = Some(domain);
    }

    pub fn add_send_migrate_entity_handler(
        &mut self,
        handler: impl FnMut(&SendMigrateEntityEvent) + 'static,
    ) {
        self.send_migrate_entity_event.add_handler(handler);
    }

    /// Handlers should forward to `on_post_entity_migration` on every other
    /// manager of this host
    pub fn add_entity_migrated_handler(
        &mut self,
        handler: impl FnMut(&EntityMigratedEvent) + 'static,
    ) {
        self.entity_migrated_event.add_handler(handler);
    }

    pub fn add_autonomous_entity_replicator_created_handler(
        &mut self,
        handler: impl FnMut(&NetEntityId) + 'static,
    ) {
        self.autonomous_entity_replicator_created_event
            .add_handler(handler);
    }

    // Queries

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn remote_host_id(&self) -> HostId {
        self.connection.remote_host_id()
    }

    pub fn entity_replicator(&self, entity: NetEntityId) -> Option<&EntityReplicator> {
        self.entity_replicators.get(&entity)
    }

    /// Number of replicators bound to entities with the given local role
    pub fn entity_replicator_count(&self, local_role: NetEntityRole) -> usize {
        self.entity_replicators
            .values()
            .filter(|replicator| replicator.bound_local_role() == local_role)
            .count()
    }

    pub fn entity_replicator_ids(&self) -> Vec<NetEntityId> {
        self.entity_replicators.keys().copied().collect()
    }

    pub fn orphaned_rpc_count(&self) -> usize {
        self.orphaned_rpcs.rpc_count()
    }

    pub fn remote_entities_pending_creation_count(&self) -> usize {
        self.remote_entities_pending_creation.len()
    }

    pub fn has_remote_authority(&self, entity: NetEntityId) -> bool {
        self.entity_replicators
            .get(&entity)
            .is_some_and(|replicator| replicator.remote_role() == NetEntityRole::Authority)
    }

    // Per-frame driving

    /// Activates entities created by inbound updates. With a non-zero
    /// activation time slice, work stops once the slice is used up and the
    /// rest waits for the next frame. Entities not yet ready are re-queued.
    pub fn activate_pending_entities(&mut self, world: &mut dyn NetworkEntityWorld) {
        let start = Instant::now();
        let time_slice = self.config.entity_activation_time_slice;
        let queued = self.entities_pending_activation.len();

        for _ in 0..queued {
            if !time_slice.is_zero() && start.elapsed(&Instant::now()) > time_slice {
                debug!(
                    "activate_pending_entities(): time slice used up, {} entities left",
                    self.entities_pending_activation.len()
                );
                break;
            }
            let Some(entity) = self.entities_pending_activation.pop_front() else {
                break;
            };
            if !world.has_entity(entity) || world.is_entity_active(entity) {
                continue;
            }
            if !world.is_ready_to_activate(entity) {
                self.entities_pending_activation.push_back(entity);
                continue;
            }
            world.activate_entity(entity);
        }
    }

    /// One outbound frame: refreshes the replication window, ages removals,
    /// orphaned RPCs and unacknowledged updates, then sends resets, entity
    /// updates and deferred RPCs.
    pub fn send_updates(&mut self, world: &mut dyn NetworkEntityWorld, now: &Instant) {
        self.update_window(world, now);
        self.expire_pending_removals(now);
        self.orphaned_rpcs.update(now);
        self.handle_dropped_updates(now);

        self.send_entity_resets();

        let to_send = self.generate_entity_update_list(world);
        self.send_entity_update_messages(to_send, world, now);

        let reliable = std::mem::take(&mut self.deferred_reliable_rpcs);
        self.send_entity_rpcs(reliable, true);
        let unreliable = std::mem::take(&mut self.deferred_unreliable_rpcs);
        self.send_entity_rpcs(unreliable, false);

        self.clear_removed_replicators();
    }

    /// Reconciles the replicator map with the window's replication set.
    /// Entities that entered the window get replicators, entities still in it
    /// are refreshed, and owned replicators that left it start their
    /// pending-removal countdown.
    pub fn update_window(&mut self, world: &mut dyn NetworkEntityWorld, now: &Instant) {
        let Some(window) = self.replication_window.as_mut() else {
            return;
        };
        window.update_window(world);
        if !window.replication_set_update_ready() {
            return;
        }

        let mut additions = Vec::new();
        let mut departures = Vec::new();
        {
            let mut in_window = window.replication_set().iter().peekable();
            let mut replicated = self.entity_replicators.iter().peekable();
            loop {
                match (in_window.peek(), replicated.peek()) {
                    (Some((window_id, role)), Some((replicator_id, _)))
                        if window_id < replicator_id =>
                    {
                        additions.push((**window_id, **role));
                        in_window.next();
                    }
                    (Some((window_id, role)), Some((replicator_id, _)))
                        if window_id == replicator_id =>
                    {
                        additions.push((**window_id, **role));
                        in_window.next();
                        replicated.next();
                    }
                    (_, Some((replicator_id, replicator))) => {
                        if replicator.owns_replicator_lifetime() {
                            departures.push(**replicator_id);
                        }
                        replicated.next();
                    }
                    (Some((window_id, role)), None) => {
                        additions.push((**window_id, **role));
                        in_window.next();
                    }
                    (None, None) => break,
                }
            }
        }

        for (entity, remote_role) in additions {
            self.add_entity_replicator(entity, remote_role, world);
        }

        let deadline = now.plus(self.config.entity_pending_removal);
        for entity in departures {
            if let Some(replicator) = self.entity_replicators.get_mut(&entity) {
                if !replicator.is_pending_removal() && !replicator.is_marked_for_removal() {
                    trace!("update_window(): entity {} left the window", entity);
                }
                replicator.set_pending_removal(deadline);
            }
        }
    }

    fn expire_pending_removals(&mut self, now: &Instant) {
        for (entity, replicator) in self.entity_replicators.iter_mut() {
            if replicator.expire_pending_removal(now) {
                debug!("expire_pending_removals(): removing replicator for {}", entity);
                self.replicators_pending_removal.insert(*entity);
                self.replicators_pending_send.insert(*entity);
            }
        }
    }

    /// Update packets unacknowledged for longer than the drop timeout are
    /// treated as lost
    fn handle_dropped_updates(&mut self, now: &Instant) {
        let drop_timeout = self
            .config
            .drop_update_timeout(self.connection.rtt_millis());
        let mut dropped: Vec<PacketIndex> = self
            .sent_update_packets
            .iter()
            .filter(|(_, (sent_at, _))| sent_at.elapsed(now) > drop_timeout)
            .map(|(packet_index, _)| *packet_index)
            .collect();
        dropped.sort_unstable();
        for packet_index in dropped {
            self.notify_packet_dropped(packet_index, now);
        }
    }

    /// Picks the replicators that send this frame.
    ///
    /// Every publishing replicator is polled against the world. Replicators
    /// whose remote side is not established wait while the pending-creation
    /// set is full, and replicators that are not autonomous on either side
    /// are capped per frame. Skipped replicators keep their pending-send flag.
    pub fn generate_entity_update_list(&mut self, world: &dyn NetworkEntityWorld) -> Vec<NetEntityId> {
        for (entity, replicator) in self.entity_replicators.iter() {
            if replicator.publisher().is_some() {
                self.replicators_pending_send.insert(*entity);
            }
        }

        let max_pending_creation = self.config.max_remote_entities_pending_creation;
        let mut autonomous_updates = Vec::new();
        let mut proxy_updates = Vec::new();

        let pending: Vec<NetEntityId> = self.replicators_pending_send.iter().copied().collect();
        for entity in pending {
            let Some(replicator) = self.entity_replicators.get_mut(&entity) else {
                self.replicators_pending_send.remove(&entity);
                continue;
            };

            let established = replicator.is_remote_replicator_established();
            if !established
                && !replicator.is_marked_for_removal()
                && !self.remote_entities_pending_creation.contains(&entity)
                && self.remote_entities_pending_creation.len() >= max_pending_creation
            {
                continue;
            }

            if !replicator.prepare_to_generate(world) {
                self.replicators_pending_send.remove(&entity);
                continue;
            }

            let autonomous = replicator.bound_local_role() == NetEntityRole::Autonomous
                || replicator.remote_role() == NetEntityRole::Autonomous;
            if autonomous {
                autonomous_updates.push(entity);
            } else if proxy_updates.len() < self.config.max_proxy_replicator_sends {
                proxy_updates.push(entity);
            } else {
                continue;
            }

            if !established && !replicator.is_marked_for_removal() {
                self.remote_entities_pending_creation.insert(entity);
            }
            self.replicators_pending_send.remove(&entity);
        }

        autonomous_updates.extend(proxy_updates);
        autonomous_updates
    }

    /// Packs updates into batches bounded by payload size and count, within
    /// the bytes the connection can put in flight. A single update larger
    /// than a whole payload goes out alone. Updates that do not fit are
    /// flagged to retry next frame.
    fn send_entity_update_messages(
        &mut self,
        to_send: Vec<NetEntityId>,
        world: &dyn NetworkEntityWorld,
        now: &Instant,
    ) {
        if to_send.is_empty() {
            return;
        }
        if !self.connection.is_send() {
            trace!("send_entity_update_messages(): connection is congested");
            self.replicators_pending_send.extend(to_send);
            return;
        }

        let budget = self.connection.available_window_size();
        let max_payload = self.config.max_payload_bytes;
        let max_count = self.config.max_updates_per_packet.max(1);

        let mut sent_bytes = 0;
        let mut batch = Vec::new();
        let mut batch_entities = Vec::new();
        let mut batch_bytes = 0;
        let mut remaining = to_send.into_iter();

        while let Some(entity) = remaining.next() {
            let Some(message) = self
                .entity_replicators
                .get(&entity)
                .and_then(|replicator| replicator.generate_update_message(world))
            else {
                continue;
            };
            let size = message.estimated_serialize_size();

            if sent_bytes + batch_bytes + size > budget && sent_bytes + batch_bytes > 0 {
                self.replicators_pending_send.insert(entity);
                self.replicators_pending_send.extend(remaining.by_ref());
                break;
            }

            if size > max_payload {
                warn!(
                    "send_entity_update_messages(): update for entity {} is {} bytes, over the {} byte payload",
                    entity, size, max_payload
                );
                sent_bytes += self.flush_update_batch(&mut batch, &mut batch_entities, batch_bytes, now);
                batch_bytes = 0;
                batch.push(message);
                batch_entities.push(entity);
                sent_bytes += self.flush_update_batch(&mut batch, &mut batch_entities, size, now);
                continue;
            }

            if batch_bytes + size > max_payload || batch.len() >= max_count {
                sent_bytes += self.flush_update_batch(&mut batch, &mut batch_entities, batch_bytes, now);
                batch_bytes = 0;
            }
            batch.push(message);
            batch_entities.push(entity);
            batch_bytes += size;
        }
        sent_bytes += self.flush_update_batch(&mut batch, &mut batch_entities, batch_bytes, now);

        trace!(
            "send_entity_update_messages(): sent {} bytes of updates, {} replicators waiting",
            sent_bytes,
            self.replicators_pending_send.len()
        );
    }

    fn flush_update_batch(
        &mut self,
        batch: &mut Vec<NetworkEntityUpdateMessage>,
        batch_entities: &mut Vec<NetEntityId>,
        batch_bytes: usize,
        now: &Instant,
    ) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let packet_index = self.connection.send_entity_updates(std::mem::take(batch));
        let entities = std::mem::take(batch_entities);
        for entity in entities.iter() {
            if let Some(replicator) = self.entity_replicators.get_mut(entity) {
                replicator.finalize_serialization(packet_index);
            }
        }
        self.sent_update_packets
            .insert(packet_index, (*now, entities));
        batch_bytes
    }

    /// Queues an outbound RPC for the next [`send_updates`](Self::send_updates)
    pub fn add_deferred_rpc_message(&mut self, message: NetworkEntityRpcMessage) {
        if message.reliable {
            self.deferred_reliable_rpcs.push(message);
        } else {
            self.deferred_unreliable_rpcs.push(message);
        }
    }

    fn send_entity_rpcs(&mut self, rpcs: Vec<NetworkEntityRpcMessage>, reliable: bool) {
        let max_payload = self.config.max_payload_bytes;
        let max_count = self.config.max_rpcs_per_packet.max(1);

        let mut batch = Vec::new();
        let mut batch_bytes = 0;
        for message in rpcs {
            let size = message.estimated_serialize_size();
            if size > max_payload {
                warn!(
                    "send_entity_rpcs(): rpc {} for entity {} is {} bytes, over the {} byte payload",
                    message.rpc_id, message.entity_id, size, max_payload
                );
                if !batch.is_empty() {
                    self.connection
                        .send_entity_rpcs(std::mem::take(&mut batch), reliable);
                    batch_bytes = 0;
                }
                self.connection.send_entity_rpcs(vec![message], reliable);
                continue;
            }
            if batch_bytes + size > max_payload || batch.len() >= max_count {
                self.connection
                    .send_entity_rpcs(std::mem::take(&mut batch), reliable);
                batch_bytes = 0;
            }
            batch.push(message);
            batch_bytes += size;
        }
        if !batch.is_empty() {
            self.connection.send_entity_rpcs(batch, reliable);
        }
    }

    fn send_entity_resets(&mut self) {
        if self.replicators_pending_reset.is_empty() {
            return;
        }
        let resets: Vec<NetEntityId> = std::mem::take(&mut self.replicators_pending_reset)
            .into_iter()
            .collect();
        debug!("send_entity_resets(): requesting reset of {} entities", resets.len());
        self.connection.send_entity_resets(resets);
    }

    // Replicator lifecycle

    /// Ensures a replicator for `entity` exists with the given remote role and
    /// the entity's current local role. An existing replicator whose roles
    /// changed, or that is marked for removal, is replaced by a new one; an
    /// unchanged one only has its pending removal cancelled.
    ///
    /// Returns whether a new replicator was created.
    pub fn add_entity_replicator(
        &mut self,
        entity: NetEntityId,
        remote_role: NetEntityRole,
        world: &dyn NetworkEntityWorld,
    ) -> bool {
        let Some(local_role) = world.entity_role(entity) else {
            warn!(
                "add_entity_replicator(): entity {} is not in the world, no replicator added",
                entity
            );
            return false;
        };

        if let Some(existing) = self.entity_replicators.get_mut(&entity) {
            let unchanged = !existing.is_marked_for_removal()
                && existing.remote_role() == remote_role
                && existing.bound_local_role() == local_role;
            if unchanged {
                existing.clear_pending_removal();
                return false;
            }
            debug!(
                "add_entity_replicator(): reinitializing replicator for {} ({} -> {}, remote {} -> {})",
                entity,
                existing.bound_local_role(),
                local_role,
                existing.remote_role(),
                remote_role
            );
        } else {
            trace!(
                "add_entity_replicator(): entity {} local {} remote {}",
                entity,
                local_role,
                remote_role
            );
        }

        let mut replicator =
            EntityReplicator::new(entity, world.prefab_id(entity), remote_role, local_role);
        if let Some(publisher) = replicator.publisher_mut() {
            publisher.set_predictable_record(world.predictable_properties(entity));
        }
        self.entity_replicators.insert(entity, replicator);
        self.replicators_pending_removal.remove(&entity);
        self.remote_entities_pending_creation.remove(&entity);
        self.replicators_pending_send.insert(entity);
        true
    }

    /// Erases replicators whose deletion the remote side acknowledged
    pub fn clear_removed_replicators(&mut self) {
        let pending: Vec<NetEntityId> = self.replicators_pending_removal.iter().copied().collect();
        for entity in pending {
            let erase = match self.entity_replicators.get(&entity) {
                None => {
                    self.replicators_pending_removal.remove(&entity);
                    continue;
                }
                Some(replicator) if !replicator.is_marked_for_removal() => {
                    self.replicators_pending_removal.remove(&entity);
                    continue;
                }
                Some(replicator) => replicator.is_deletion_acknowledged(),
            };
            if erase {
                debug!("clear_removed_replicators(): erasing replicator for {}", entity);
                self.entity_replicators.remove(&entity);
                self.replicators_pending_removal.remove(&entity);
                self.replicators_pending_send.remove(&entity);
                self.remote_entities_pending_creation.remove(&entity);
            }
        }
    }

    /// Makes the next update for `entity` carry its full state, predictable
    /// properties included. Returns false when nothing publishes it.
    pub fn set_entity_rebasing(&mut self, entity: NetEntityId) -> bool {
        let Some(publisher) = self
            .entity_replicators
            .get_mut(&entity)
            .and_then(EntityReplicator::publisher_mut)
        else {
            return false;
        };
        publisher.set_rebasing();
        self.replicators_pending_send.insert(entity);
        true
    }

    /// Tears down every replicator.
    ///
    /// For migration, live replicators are marked for removal as migrated
    /// instead of dropped: the next frames tell the remote to keep its
    /// proxies, and each replicator is erased once its delete is
    /// acknowledged. The owner should empty the replication window first, or
    /// the next window update rebuilds what it still holds.
    pub fn clear(&mut self, for_migration: bool) {
        if for_migration {
            let mut marked = 0;
            for (entity, replicator) in self.entity_replicators.iter_mut() {
                if replicator.is_marked_for_removal() {
                    continue;
                }
                replicator.set_was_migrated(true);
                replicator.mark_for_removal();
                self.replicators_pending_removal.insert(*entity);
                self.replicators_pending_send.insert(*entity);
                marked += 1;
            }
            info!(
                "clear(): {} replicators for connection {:?} marked as migrated",
                marked,
                self.connection.connection_id()
            );
            return;
        }

        info!(
            "clear(): dropping {} replicators for connection {:?}",
            self.entity_replicators.len(),
            self.connection.connection_id()
        );
        self.entity_replicators.clear();
        self.replicators_pending_send.clear();
        self.remote_entities_pending_creation.clear();
        self.replicators_pending_removal.clear();
        self.replicators_pending_reset.clear();
        self.entities_pending_activation.clear();
        self.deferred_reliable_rpcs.clear();
        self.deferred_unreliable_rpcs.clear();
        self.orphaned_rpcs.clear();
        self.sent_update_packets.clear();
    }

    // Inbound

    fn escalate(&mut self, error: ReplicationError) {
        warn!(
            "connection {:?} violated the replication protocol: {}",
            self.connection.connection_id(),
            error
        );
        let connection_id = self.connection.connection_id();
        self.listener
            .disconnect(connection_id, DisconnectReason::ProtocolViolation(error));
    }

    /// Decides whether an inbound update may be applied, given who may send
    /// what on this connection and which packets were already seen
    pub fn validate_update(
        &self,
        packet_id: PacketIndex,
        message: &NetworkEntityUpdateMessage,
    ) -> UpdateValidationResult {
        let replicator = self.entity_replicators.get(&message.entity_id);

        let mut result = match self.mode {
            Mode::LocalServerToRemoteClient => {
                // clients may only drive the entities they are autonomous for
                let mut result = UpdateValidationResult::DropMessageAndDisconnect;
                if let Some(replicator) = replicator {
                    if message.role == NetEntityRole::Authority
                        && !message.is_delete
                        && replicator.remote_role() == NetEntityRole::Autonomous
                        && replicator.bound_local_role() == NetEntityRole::Authority
                    {
                        result = if replicator.is_marked_for_removal() {
                            UpdateValidationResult::DropMessage
                        } else {
                            UpdateValidationResult::HandleMessage
                        };
                    } else if replicator.remote_role() == NetEntityRole::Client
                        && replicator.bound_local_role() == NetEntityRole::Server
                    {
                        result = UpdateValidationResult::DropMessage;
                    }
                }
                result
            }
            Mode::LocalServerToRemoteServer => match replicator {
                Some(replicator)
                    if !replicator.is_marked_for_removal()
                        && replicator.bound_local_role() == NetEntityRole::Authority =>
                {
                    UpdateValidationResult::DropMessage
                }
                _ => UpdateValidationResult::HandleMessage,
            },
            Mode::LocalClientToRemoteServer => UpdateValidationResult::HandleMessage,
        };

        if result == UpdateValidationResult::HandleMessage {
            if let Some(replicator) = replicator {
                if !replicator.is_marked_for_removal() {
                    let valid = replicator
                        .subscriber()
                        .is_some_and(|subscriber| subscriber.is_packet_id_valid(packet_id));
                    if !valid {
                        result = UpdateValidationResult::DropMessage;
                    }
                }
            }
        }
        result
    }

    /// Applies a batch of entity updates that arrived in `packet_id`.
    /// The first violation is escalated and returned.
    pub fn handle_entity_update_messages(
        &mut self,
        packet_id: PacketIndex,
        messages: &[NetworkEntityUpdateMessage],
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<(), ReplicationError> {
        for message in messages {
            if let Err(error) = self.handle_entity_update_message(packet_id, message, world) {
                self.escalate(error.clone());
                return Err(error);
            }
        }
        Ok(())
    }

    fn handle_entity_update_message(
        &mut self,
        packet_id: PacketIndex,
        message: &NetworkEntityUpdateMessage,
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<(), ReplicationError> {
        let entity = message.entity_id;
        match self.validate_update(packet_id, message) {
            UpdateValidationResult::HandleMessage => {}
            UpdateValidationResult::DropMessage => {
                trace!(
                    "handle_entity_update_message(): dropping old update for {} in packet {}",
                    entity,
                    packet_id
                );
                return Ok(());
            }
            UpdateValidationResult::DropMessageAndDisconnect => {
                return Err(ReplicationError::InvalidUpdate { entity });
            }
        }

        if message.is_delete {
            self.handle_entity_delete_message(message, world);
            return Ok(());
        }

        let prefab = match &message.prefab {
            Some(prefab) => prefab.clone(),
            None => {
                let cached = self
                    .entity_replicators
                    .get(&entity)
                    .and_then(|replicator| replicator.prefab().cloned());
                match cached {
                    Some(prefab) => prefab,
                    None => {
                        debug!(
                            "handle_entity_update_message(): no prefab known for {}, requesting reset",
                            entity
                        );
                        self.replicators_pending_reset.insert(entity);
                        return Ok(());
                    }
                }
            }
        };

        self.handle_property_change(Some(packet_id), entity, message.role, &prefab, &message.delta, world)
    }

    /// Applies a remote delete. Replicators this side owns ignore it; a
    /// migrated entity is left in the world for its new authority to update.
    pub fn handle_entity_delete_message(
        &mut self,
        message: &NetworkEntityUpdateMessage,
        world: &mut dyn NetworkEntityWorld,
    ) {
        let entity = message.entity_id;
        let Some(replicator) = self.entity_replicators.get_mut(&entity) else {
            debug!("handle_entity_delete_message(): no replicator for {}", entity);
            return;
        };
        if replicator.is_marked_for_removal() {
            warn!(
                "handle_entity_delete_message(): replicator for {} is already marked for removal",
                entity
            );
            return;
        }
        if replicator.owns_replicator_lifetime() {
            debug!(
                "handle_entity_delete_message(): ignoring delete for {}, this side owns it",
                entity
            );
            return;
        }

        replicator.set_was_migrated(message.was_migrated);
        replicator.mark_for_removal();
        self.replicators_pending_removal.insert(entity);
        self.entities_pending_activation.retain(|pending| *pending != entity);

        if message.was_migrated {
            debug!(
                "handle_entity_delete_message(): {} migrated away, leaving it to its new authority",
                entity
            );
        } else {
            world.remove_entity(entity);
        }
    }

    /// Applies property changes to an entity, creating the entity and its
    /// replicator as needed. A `None` packet id skips the ordering bookkeeping.
    pub fn handle_property_change(
        &mut self,
        packet_id: Option<PacketIndex>,
        entity: NetEntityId,
        role: NetEntityRole,
        prefab: &PrefabEntityId,
        delta: &PropertyDelta,
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<(), ReplicationError> {
        let mut created_entity = false;
        if !world.has_entity(entity) {
            if !world.create_entity(entity, prefab, role) {
                return Err(ReplicationError::EntityCreationFailed { entity });
            }
            created_entity = true;
        }
        world.set_owning_connection(entity, self.connection.connection_id());

        if world.entity_role(entity) != Some(role) {
            if role == NetEntityRole::Authority {
                return Err(ReplicationError::UnexpectedRole { entity, role });
            }
            world.set_entity_role(entity, role);
        }

        let needs_replicator = self
            .entity_replicators
            .get(&entity)
            .map_or(true, |replicator| {
                replicator.is_marked_for_removal() || replicator.bound_local_role() != role
            });
        let created_replicator =
            needs_replicator && self.add_entity_replicator(entity, NetEntityRole::Authority, world);
        if created_replicator && role == NetEntityRole::Autonomous {
            self.autonomous_entity_replicator_created_event
                .signal(&entity);
        }

        let connection_id = self.connection.connection_id();
        let replicator = self
            .entity_replicators
            .get_mut(&entity)
            .ok_or(ReplicationError::MissingReplicator { entity })?;
        let subscriber = replicator
            .subscriber_mut()
            .ok_or(ReplicationError::InvalidUpdate { entity })?;
        let applied = subscriber.handle_property_change(packet_id, entity, delta, world)?;

        if let Some(publisher) = replicator.publisher_mut() {
            if created_replicator {
                publisher.rebase(&world.property_snapshot(entity));
                publisher.set_remote_replicator_established();
            } else {
                for (property, value) in applied.iter() {
                    publisher.rebase_property(*property, value);
                }
            }
        }
        trace!(
            "handle_property_change(): applied {} properties to {} from {:?}",
            applied.len(),
            entity,
            connection_id
        );

        if created_entity {
            self.entities_pending_activation.push_back(entity);
        }

        if created_replicator {
            if let Some(replicator) = self.entity_replicators.get(&entity) {
                self.orphaned_rpcs
                    .dispatch_orphaned_rpcs(replicator, world)?;
            }
        }
        Ok(())
    }

    /// Delivers inbound RPCs. RPCs for entities without a live replicator are
    /// held until one appears or the orphan timeout passes.
    pub fn handle_entity_rpc_messages(
        &mut self,
        messages: Vec<NetworkEntityRpcMessage>,
        world: &mut dyn NetworkEntityWorld,
        now: &Instant,
    ) -> Result<(), ReplicationError> {
        for message in messages {
            let entity = message.entity_id;
            let replicator = self
                .entity_replicators
                .get(&entity)
                .filter(|replicator| !replicator.is_marked_for_removal());

            match replicator {
                Some(replicator) => {
                    if let Err(error) = replicator.handle_rpc_message(world, &message) {
                        self.escalate(error.clone());
                        return Err(error);
                    }
                }
                None => {
                    trace!(
                        "handle_entity_rpc_messages(): holding rpc {} for unknown entity {}",
                        message.rpc_id,
                        entity
                    );
                    let timeout = self
                        .config
                        .orphaned_rpc_timeout(self.connection.rtt_millis());
                    self.orphaned_rpcs
                        .add_orphaned_rpc(entity, message, now, timeout);
                }
            }
        }
        Ok(())
    }

    /// The remote side lost track of these entities; their next updates
    /// carry full state and the prefab id again
    pub fn handle_entity_reset_messages(&mut self, entities: &[NetEntityId]) {
        for entity in entities {
            let Some(replicator) = self.entity_replicators.get_mut(entity) else {
                debug!("handle_entity_reset_messages(): no replicator for {}", entity);
                continue;
            };
            if let Some(publisher) = replicator.publisher_mut() {
                publisher.reset();
                self.remote_entities_pending_creation.remove(entity);
                self.replicators_pending_send.insert(*entity);
            }
        }
    }

    /// Takes over authority for an entity migrated from the remote host
    pub fn handle_entity_migration(
        &mut self,
        message: &EntityMigrationMessage,
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<(), ReplicationError> {
        let result = self.handle_entity_migration_internal(message, world);
        if let Err(error) = &result {
            self.escalate(error.clone());
        }
        result
    }

    fn handle_entity_migration_internal(
        &mut self,
        message: &EntityMigrationMessage,
        world: &mut dyn NetworkEntityWorld,
    ) -> Result<(), ReplicationError> {
        let entity = message.entity_id;
        if message.destination_host != world.host_id() {
            return Err(ReplicationError::InvalidUpdate { entity });
        }

        let mut created_entity = false;
        if !world.has_entity(entity) {
            if !world.create_entity(entity, &message.prefab, NetEntityRole::Server) {
                return Err(ReplicationError::EntityCreationFailed { entity });
            }
            created_entity = true;
        }
        for (property, value) in message.snapshot.changes()? {
            if !world.apply_property(entity, property, value) {
                return Err(ReplicationError::PropertyRejected { entity, property });
            }
        }
        world.set_entity_role(entity, NetEntityRole::Authority);

        self.add_entity_replicator(entity, NetEntityRole::Server, world);
        if let Some(publisher) = self
            .entity_replicators
            .get_mut(&entity)
            .and_then(EntityReplicator::publisher_mut)
        {
            publisher.rebase(&world.property_snapshot(entity));
            publisher.set_remote_replicator_established();
        }
        info!(
            "handle_entity_migration(): took authority over {} from {:?}",
            entity,
            self.connection.remote_host_id()
        );

        if created_entity {
            self.entities_pending_activation.push_back(entity);
        }
        if let Some(replicator) = self.entity_replicators.get(&entity) {
            self.orphaned_rpcs
                .dispatch_orphaned_rpcs(replicator, world)?;
        }
        Ok(())
    }

    // Migration

    /// Whether authority over `entity` may move to the remote host now: this
    /// host must own it, the remote domain must want it, and the remote
    /// replicator must be established.
    pub fn can_migrate_entity(&self, entity: NetEntityId, world: &dyn NetworkEntityWorld) -> bool {
        if world.entity_role(entity) != Some(NetEntityRole::Authority) {
            return false;
        }
        let in_domain = self
            .remote_entity_domain
            .as_ref()
            .is_some_and(|domain| domain.is_in_domain(entity, world));
        if !in_domain {
            return false;
        }
        self.entity_replicators.get(&entity).is_some_and(|replicator| {
            replicator.bound_local_role() == NetEntityRole::Authority
                && !replicator.is_marked_for_removal()
                && replicator.is_remote_replicator_established()
        })
    }

    /// Hands authority over `entity` to the remote host if
    /// [`can_migrate_entity`](Self::can_migrate_entity) allows it
    pub fn migrate_entity(&mut self, entity: NetEntityId, world: &mut dyn NetworkEntityWorld) -> bool {
        if !self.can_migrate_entity(entity, world) {
            debug!("migrate_entity(): refusing to migrate {}", entity);
            return false;
        }
        self.migrate_entity_internal(entity, world)
    }

    /// Hands every entity this side owns on the connection to the remote host.
    /// Returns how many moved.
    pub fn migrate_all_entities(&mut self, world: &mut dyn NetworkEntityWorld) -> usize {
        let owned: Vec<NetEntityId> = self
            .entity_replicators
            .values()
            .filter(|replicator| {
                replicator.owns_replicator_lifetime()
                    && replicator.bound_local_role() == NetEntityRole::Authority
            })
            .map(EntityReplicator::entity)
            .collect();

        let mut migrated = 0;
        for entity in owned {
            if self.migrate_entity_internal(entity, world) {
                migrated += 1;
            }
        }
        migrated
    }

    fn migrate_entity_internal(
        &mut self,
        entity: NetEntityId,
        world: &mut dyn NetworkEntityWorld,
    ) -> bool {
        if world.entity_role(entity) != Some(NetEntityRole::Authority) {
            return false;
        }
        let Some(prefab) = world.prefab_id(entity) else {
            warn!("migrate_entity(): entity {} has no prefab, not migrating", entity);
            return false;
        };

        let remote_host = self.connection.remote_host_id();
        let snapshot = world.property_snapshot(entity);
        let message = EntityMigrationMessage {
            entity_id: entity,
            destination_host: remote_host,
            prefab,
            snapshot: PropertyDelta::from_snapshot(&ReplicationRecord::full(snapshot.len()), &snapshot),
        };
        self.send_migrate_entity_event.signal(&SendMigrateEntityEvent {
            connection_id: self.connection.connection_id(),
            message,
        });

        world.set_entity_role(entity, NetEntityRole::Server);
        self.entity_migrated_event
            .signal(&EntityMigratedEvent { entity, remote_host });
        self.add_entity_replicator(entity, NetEntityRole::Authority, world);

        info!("migrate_entity(): migrated {} to {:?}", entity, remote_host);
        true
    }

    /// The remote host's domain no longer covers `entity`'s owner; migrate it
    /// there if possible
    pub fn on_entity_exit_domain(&mut self, entity: NetEntityId, world: &mut dyn NetworkEntityWorld) {
        if self.can_migrate_entity(entity, world) {
            self.migrate_entity_internal(entity, world);
        }
    }

    /// Another manager of this host migrated `entity` to `remote_host`.
    /// Replicators for entities still in this window are rebuilt for the new
    /// local role; the rest are removed as migrated.
    pub fn on_post_entity_migration(
        &mut self,
        entity: NetEntityId,
        remote_host: HostId,
        world: &mut dyn NetworkEntityWorld,
    ) {
        if remote_host == self.connection.remote_host_id() {
            return;
        }

        let window_role = self
            .replication_window
            .as_ref()
            .and_then(|window| window.is_in_window(entity));
        if let Some(remote_role) = window_role {
            self.add_entity_replicator(entity, remote_role, world);
            return;
        }

        if let Some(replicator) = self.entity_replicators.get_mut(&entity) {
            replicator.set_was_migrated(true);
            replicator.mark_for_removal();
            self.replicators_pending_removal.insert(entity);
            self.replicators_pending_send.insert(entity);
        }
    }
}

impl PacketNotifiable for EntityReplicationManager {
    fn notify_packet_delivered(&mut self, packet_index: PacketIndex, _now: &Instant) {
        let Some((_, entities)) = self.sent_update_packets.remove(&packet_index) else {
            return;
        };
        for entity in entities {
            let Some(publisher) = self
                .entity_replicators
                .get_mut(&entity)
                .and_then(EntityReplicator::publisher_mut)
            else {
                continue;
            };
            publisher.notify_packet_delivered(packet_index);
            if publisher.is_remote_replicator_established() {
                self.remote_entities_pending_creation.remove(&entity);
            }
        }
    }

    fn notify_packet_dropped(&mut self, packet_index: PacketIndex, _now: &Instant) {
        let Some((_, entities)) = self.sent_update_packets.remove(&packet_index) else {
            return;
        };
        trace!(
            "notify_packet_dropped(): packet {} lost updates for {} entities",
            packet_index,
            entities.len()
        );
        for entity in entities {
            let Some(publisher) = self
                .entity_replicators
                .get_mut(&entity)
                .and_then(EntityReplicator::publisher_mut)
            else {
                continue;
            };
            publisher.notify_packet_dropped(packet_index);
            self.replicators_pending_send.insert(entity);
        }
    }
}
