use std::collections::HashMap;

use log::trace;

use crate::{
    types::{NetEntityId, PacketIndex, PrefabEntityId},
    wrapping_number::sequence_greater_than,
};

use super::{NetEntityRole, NetworkEntityUpdateMessage, PropertyDelta, ReplicationRecord};

struct SentRecord {
    record: ReplicationRecord,
    carried_creation: bool,
    is_delete: bool,
}

/// Outbound half of an entity replicator.
///
/// Keeps the last value generated for every property. `generate_record`
/// compares the live snapshot against it and marks changed properties
/// pending; marked bits stay pending until an update carrying them is
/// finalized, so generating twice without a send marks nothing twice.
pub struct PropertyPublisher {
    entity: NetEntityId,
    remote_role: NetEntityRole,
    baseline: Vec<Vec<u8>>,
    pending: ReplicationRecord,
    predictable: ReplicationRecord,
    sent_records: HashMap<PacketIndex, SentRecord>,
    creation_pending: bool,
    remote_established: bool,
    delete_pending: bool,
    delete_in_flight: bool,
    deletion_acknowledged: bool,
    was_migrated: bool,
    rebasing: bool,
}

impl PropertyPublisher {
    pub fn new(entity: NetEntityId, remote_role: NetEntityRole) -> Self {
        Self {
            entity,
            remote_role,
            baseline: Vec::new(),
            pending: ReplicationRecord::default(),
            predictable: ReplicationRecord::default(),
            sent_records: HashMap::new(),
            creation_pending: true,
            remote_established: false,
            delete_pending: false,
            delete_in_flight: false,
            deletion_acknowledged: false,
            was_migrated: false,
            rebasing: false,
        }
    }

    /// Forgets everything sent so far; the next update carries full state and
    /// the prefab id again
    pub fn reset(&mut self) {
        let entity = self.entity;
        let remote_role = self.remote_role;
        let predictable = std::mem::take(&mut self.predictable);
        *self = Self::new(entity, remote_role);
        self.predictable = predictable;
    }

    pub fn is_remote_replicator_established(&self) -> bool {
        self.remote_established
    }

    /// For replicators created from inbound traffic: the remote side built
    /// the entity, so nothing needs to be created there
    pub fn set_remote_replicator_established(&mut self) {
        self.remote_established = true;
        self.creation_pending = false;
    }

    pub fn is_deletion_acknowledged(&self) -> bool {
        self.deletion_acknowledged
    }

    pub fn pending_record(&self) -> &ReplicationRecord {
        &self.pending
    }

    pub fn sent_packet_count(&self) -> usize {
        self.sent_records.len()
    }

    /// Properties the remote autonomous proxy computes itself are left out of
    /// updates once the entity exists remotely
    pub fn set_predictable_record(&mut self, predictable: ReplicationRecord) {
        self.predictable = predictable;
    }

    /// The next update carries every property, predictable ones included, so
    /// the remote can correct whatever it predicted
    pub fn set_rebasing(&mut self) {
        self.rebasing = true;
    }

    pub fn is_rebasing(&self) -> bool {
        self.rebasing
    }

    /// Marks every property whose value differs from the last generated one.
    /// Returns whether anything now requires serialization.
    pub fn generate_record(&mut self, snapshot: &[Vec<u8>]) -> bool {
        if self.delete_pending || self.delete_in_flight {
            return self.requires_serialization();
        }

        self.pending.resize(snapshot.len());
        for (index, value) in snapshot.iter().enumerate() {
            let changed = self.baseline.get(index) != Some(value);
            if changed || self.rebasing {
                self.pending.set_bit(index, true);
            }
        }
        self.baseline = snapshot.to_vec();

        let predicted_remotely =
            self.remote_established && self.remote_role == NetEntityRole::Autonomous;
        if predicted_remotely && !self.rebasing {
            self.pending.nand(&self.predictable);
        }
        self.requires_serialization()
    }

    /// Records a value that arrived from the remote side, so it is not
    /// mistaken for a local change and echoed back
    pub fn rebase_property(&mut self, index: usize, value: &[u8]) {
        if self.baseline.len() <= index {
            self.baseline.resize(index + 1, Vec::new());
        }
        self.baseline[index] = value.to_vec();
    }

    pub fn rebase(&mut self, snapshot: &[Vec<u8>]) {
        self.baseline = snapshot.to_vec();
    }

    pub fn requires_serialization(&self) -> bool {
        if self.delete_in_flight {
            return false;
        }
        self.delete_pending || self.creation_pending || !self.pending.is_clear()
    }

    /// Queues a delete for the remote replicator, replacing any pending update
    pub fn set_delete(&mut self, was_migrated: bool) {
        if self.delete_in_flight || self.deletion_acknowledged {
            return;
        }
        self.delete_pending = true;
        self.was_migrated = was_migrated;
        self.pending.clear();
    }

    /// Builds the next update from the pending record and the live snapshot
    pub fn generate_update_message(
        &self,
        prefab: Option<&PrefabEntityId>,
        snapshot: &[Vec<u8>],
    ) -> NetworkEntityUpdateMessage {
        if self.delete_pending {
            return NetworkEntityUpdateMessage::delete(self.entity, self.was_migrated);
        }

        let prefab = if self.remote_established {
            None
        } else {
            prefab.cloned()
        };
        NetworkEntityUpdateMessage::update(
            self.entity,
            self.remote_role,
            prefab,
            PropertyDelta::from_snapshot(&self.pending, snapshot),
        )
    }

    /// Remembers what went out in `packet_index` and clears the pending record
    pub fn finalize_serialization(&mut self, packet_index: PacketIndex) {
        let is_delete = self.delete_pending;
        let record = std::mem::replace(
            &mut self.pending,
            ReplicationRecord::new(self.baseline.len()),
        );
        self.sent_records.insert(
            packet_index,
            SentRecord {
                record,
                carried_creation: !self.remote_established,
                is_delete,
            },
        );
        self.creation_pending = false;
        self.rebasing = false;
        if is_delete {
            self.delete_pending = false;
            self.delete_in_flight = true;
        }
    }

    pub fn notify_packet_delivered(&mut self, packet_index: PacketIndex) {
        let Some(sent) = self.sent_records.remove(&packet_index) else {
            return;
        };
        if sent.is_delete {
            self.delete_in_flight = false;
            self.deletion_acknowledged = true;
            return;
        }
        if !self.remote_established {
            trace!("remote replicator for entity {} established", self.entity);
        }
        self.remote_established = true;
    }

    /// Puts the bits of a lost packet back into the pending record, minus the
    /// bits a later packet already carried again
    pub fn notify_packet_dropped(&mut self, packet_index: PacketIndex) {
        let Some(sent) = self.sent_records.remove(&packet_index) else {
            return;
        };
        if sent.is_delete {
            self.delete_in_flight = false;
            self.delete_pending = true;
            return;
        }

        let mut lost = sent.record;
        for (later_index, later) in self.sent_records.iter() {
            if sequence_greater_than(*later_index, packet_index) {
                lost.nand(&later.record);
            }
        }
        self.pending.or(&lost);

        if sent.carried_creation && !self.remote_established {
            self.creation_pending = true;
        }
    }
}
