use crate::{
    backends::Instant,
    types::{NetEntityId, PacketIndex, PrefabEntityId},
};

use super::{
    NetEntityRole, NetworkEntityRpcMessage, NetworkEntityUpdateMessage, NetworkEntityWorld,
    PropertyPublisher, PropertySubscriber, ReplicationError,
};

/// Which halves a replicator runs, fixed by its role pair at creation
enum Endpoints {
    Publish(PropertyPublisher),
    Subscribe(PropertySubscriber),
    PublishAndSubscribe(PropertyPublisher, PropertySubscriber),
}

impl Endpoints {
    fn new(entity: NetEntityId, remote_role: NetEntityRole, local_role: NetEntityRole) -> Self {
        let publishes = local_role == NetEntityRole::Authority
            || (local_role == NetEntityRole::Server && remote_role == NetEntityRole::Client)
            || (local_role == NetEntityRole::Autonomous
                && remote_role == NetEntityRole::Authority);
        let subscribes = remote_role == NetEntityRole::Authority
            || (local_role == NetEntityRole::Authority
                && remote_role == NetEntityRole::Autonomous);

        match (publishes, subscribes) {
            (true, true) => Self::PublishAndSubscribe(
                PropertyPublisher::new(entity, remote_role),
                PropertySubscriber::new(),
            ),
            (true, false) => Self::Publish(PropertyPublisher::new(entity, remote_role)),
            // server proxies of a remote server's proxy only track packet order
            (false, _) => Self::Subscribe(PropertySubscriber::new()),
        }
    }
}

/// Lifecycle of a replicator. A replicator that left the replication window
/// waits out its pending-removal deadline before it is marked; once marked,
/// it is never reused and is erased when its deletion is acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicatorState {
    Active,
    PendingRemoval { deadline: Instant },
    MarkedForRemoval,
}

/// Replication endpoint for one entity on one connection. The role pair is
/// fixed: a role change builds a new replicator.
pub struct EntityReplicator {
    entity: NetEntityId,
    prefab: Option<PrefabEntityId>,
    remote_role: NetEntityRole,
    bound_local_role: NetEntityRole,
    endpoints: Endpoints,
    state: ReplicatorState,
    was_migrated: bool,
}

impl EntityReplicator {
    pub fn new(
        entity: NetEntityId,
        prefab: Option<PrefabEntityId>,
        remote_role: NetEntityRole,
        bound_local_role: NetEntityRole,
    ) -> Self {
        Self {
            entity,
            prefab,
            remote_role,
            bound_local_role,
            endpoints: Endpoints::new(entity, remote_role, bound_local_role),
            state: ReplicatorState::Active,
            was_migrated: false,
        }
    }

    pub fn entity(&self) -> NetEntityId {
        self.entity
    }

    pub fn prefab(&self) -> Option<&PrefabEntityId> {
        self.prefab.as_ref()
    }

    pub fn remote_role(&self) -> NetEntityRole {
        self.remote_role
    }

    pub fn bound_local_role(&self) -> NetEntityRole {
        self.bound_local_role
    }

    pub fn state(&self) -> ReplicatorState {
        self.state
    }

    /// This side created the remote proxy and decides when it goes away.
    /// Server proxies own the client proxies they forward to.
    pub fn owns_replicator_lifetime(&self) -> bool {
        match self.bound_local_role {
            NetEntityRole::Authority => self.remote_role != NetEntityRole::Authority,
            NetEntityRole::Server => self.remote_role == NetEntityRole::Client,
            _ => false,
        }
    }

    pub fn publisher(&self) -> Option<&PropertyPublisher> {
        match &self.endpoints {
            Endpoints::Publish(publisher) | Endpoints::PublishAndSubscribe(publisher, _) => {
                Some(publisher)
            }
            Endpoints::Subscribe(_) => None,
        }
    }

    pub fn publisher_mut(&mut self) -> Option<&mut PropertyPublisher> {
        match &mut self.endpoints {
            Endpoints::Publish(publisher) | Endpoints::PublishAndSubscribe(publisher, _) => {
                Some(publisher)
            }
            Endpoints::Subscribe(_) => None,
        }
    }

    pub fn subscriber(&self) -> Option<&PropertySubscriber> {
        match &self.endpoints {
            Endpoints::Subscribe(subscriber) | Endpoints::PublishAndSubscribe(_, subscriber) => {
                Some(subscriber)
            }
            Endpoints::Publish(_) => None,
        }
    }

    pub fn subscriber_mut(&mut self) -> Option<&mut PropertySubscriber> {
        match &mut self.endpoints {
            Endpoints::Subscribe(subscriber) | Endpoints::PublishAndSubscribe(_, subscriber) => {
                Some(subscriber)
            }
            Endpoints::Publish(_) => None,
        }
    }

    pub fn is_remote_replicator_established(&self) -> bool {
        self.publisher()
            .map_or(true, PropertyPublisher::is_remote_replicator_established)
    }

    pub fn was_migrated(&self) -> bool {
        self.was_migrated
    }

    pub fn set_was_migrated(&mut self, was_migrated: bool) {
        self.was_migrated = was_migrated;
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.state == ReplicatorState::MarkedForRemoval
    }

    /// Marks the replicator for removal. When this side owns the remote
    /// proxy, a delete is queued for it.
    pub fn mark_for_removal(&mut self) {
        if self.is_marked_for_removal() {
            return;
        }
        self.state = ReplicatorState::MarkedForRemoval;
        if self.owns_replicator_lifetime() {
            let was_migrated = self.was_migrated;
            if let Some(publisher) = self.publisher_mut() {
                publisher.set_delete(was_migrated);
            }
        }
    }

    /// Whether the replicator may be erased. Replicators that do not own the
    /// remote proxy have nothing to wait for.
    pub fn is_deletion_acknowledged(&self) -> bool {
        if !self.owns_replicator_lifetime() {
            return true;
        }
        self.publisher()
            .map_or(true, PropertyPublisher::is_deletion_acknowledged)
    }

    pub fn is_pending_removal(&self) -> bool {
        matches!(self.state, ReplicatorState::PendingRemoval { .. })
    }

    /// Starts the pending-removal countdown. Keeps an earlier deadline.
    pub fn set_pending_removal(&mut self, deadline: Instant) {
        if self.state == ReplicatorState::Active {
            self.state = ReplicatorState::PendingRemoval { deadline };
        }
    }

    pub fn clear_pending_removal(&mut self) {
        if self.is_pending_removal() {
            self.state = ReplicatorState::Active;
        }
    }

    /// Marks the replicator for removal if its pending-removal deadline has
    /// passed. Returns whether it did.
    pub fn expire_pending_removal(&mut self, now: &Instant) -> bool {
        match self.state {
            ReplicatorState::PendingRemoval { deadline } if !deadline.is_after(now) => {
                self.mark_for_removal();
                true
            }
            _ => false,
        }
    }

    /// Refreshes the publisher's pending record from the world. Returns
    /// whether an update needs to go out.
    pub fn prepare_to_generate(&mut self, world: &dyn NetworkEntityWorld) -> bool {
        if self.is_marked_for_removal() && !self.owns_replicator_lifetime() {
            return false;
        }
        let snapshot = if self.is_marked_for_removal() {
            Vec::new()
        } else {
            world.property_snapshot(self.entity)
        };
        match self.publisher_mut() {
            Some(publisher) => publisher.generate_record(&snapshot),
            None => false,
        }
    }

    pub fn generate_update_message(
        &self,
        world: &dyn NetworkEntityWorld,
    ) -> Option<NetworkEntityUpdateMessage> {
        let publisher = self.publisher()?;
        let snapshot = world.property_snapshot(self.entity);
        Some(publisher.generate_update_message(self.prefab.as_ref(), &snapshot))
    }

    pub fn finalize_serialization(&mut self, packet_index: PacketIndex) {
        if let Some(publisher) = self.publisher_mut() {
            publisher.finalize_serialization(packet_index);
        }
    }

    /// Hands an RPC to the world for this replicator's entity
    pub fn handle_rpc_message(
        &self,
        world: &mut dyn NetworkEntityWorld,
        message: &NetworkEntityRpcMessage,
    ) -> Result<(), ReplicationError> {
        if world.handle_rpc(self.entity, message) {
            Ok(())
        } else {
            Err(ReplicationError::RpcRejected {
                entity: self.entity,
                rpc_id: message.rpc_id,
            })
        }
    }
}
