/// In-memory entity world for E2E testing
/// Entities carry a prefab id, a role, and a fixed set of u32 properties

use std::{
    collections::{BTreeMap, HashSet},
    thread,
    time::Duration,
};

use netrep_serde::{BitReader, BitWriter, Serde};
use netrep_shared::{
    replication::{NetEntityRole, NetworkEntityRpcMessage, NetworkEntityWorld, ReplicationRecord},
    ConnectionId, HostId, NetEntityId, PrefabEntityId,
};

pub const HEALTH: usize = 0;
pub const ARMOR: usize = 1;
pub const PROPERTY_COUNT: usize = 2;

/// Rpc id every entity refuses, for exercising rejected RPCs
pub const REJECTED_RPC_ID: u16 = 999;

#[derive(Clone, Debug)]
pub struct TestEntity {
    pub prefab: PrefabEntityId,
    pub role: NetEntityRole,
    pub active: bool,
    pub properties: Vec<u32>,
    pub owning_connection: Option<ConnectionId>,
    pub received_rpcs: Vec<u16>,
}

pub struct TestWorld {
    host_id: HostId,
    entities: BTreeMap<NetEntityId, TestEntity>,
    not_ready: HashSet<NetEntityId>,
    predictable: ReplicationRecord,
    removed: Vec<NetEntityId>,
    activation_cost: Duration,
}

impl TestWorld {
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            entities: BTreeMap::new(),
            not_ready: HashSet::new(),
            predictable: ReplicationRecord::new(PROPERTY_COUNT),
            removed: Vec::new(),
            activation_cost: Duration::ZERO,
        }
    }

    /// Spawns an active entity this world has authority over
    pub fn spawn(&mut self, entity: NetEntityId, prefab_name: &str, health: u32, armor: u32) {
        self.entities.insert(
            entity,
            TestEntity {
                prefab: PrefabEntityId::new(prefab_name, 0),
                role: NetEntityRole::Authority,
                active: true,
                properties: vec![health, armor],
                owning_connection: None,
                received_rpcs: Vec::new(),
            },
        );
    }

    pub fn entity(&self, entity: NetEntityId) -> Option<&TestEntity> {
        self.entities.get(&entity)
    }

    pub fn property(&self, entity: NetEntityId, property: usize) -> Option<u32> {
        self.entities
            .get(&entity)
            .and_then(|test_entity| test_entity.properties.get(property).copied())
    }

    pub fn set_property(&mut self, entity: NetEntityId, property: usize, value: u32) {
        let test_entity = self.entities.get_mut(&entity).expect("entity not in world");
        test_entity.properties[property] = value;
    }

    pub fn received_rpcs(&self, entity: NetEntityId) -> Vec<u16> {
        self.entities
            .get(&entity)
            .map(|test_entity| test_entity.received_rpcs.clone())
            .unwrap_or_default()
    }

    /// Holds back activation of `entity` until set ready again
    pub fn set_ready(&mut self, entity: NetEntityId, ready: bool) {
        if ready {
            self.not_ready.remove(&entity);
        } else {
            self.not_ready.insert(entity);
        }
    }

    /// Marks properties an autonomous proxy predicts for itself
    pub fn set_predictable(&mut self, property: usize) {
        self.predictable.set_bit(property, true);
    }

    /// Wall-clock time each activation takes
    pub fn set_activation_cost(&mut self, cost: Duration) {
        self.activation_cost = cost;
    }

    /// Entities removed by inbound deletes, in removal order
    pub fn removed(&self) -> &[NetEntityId] {
        &self.removed
    }

    fn encode(value: u32) -> Vec<u8> {
        let mut writer = BitWriter::new();
        value.ser(&mut writer);
        writer.to_bytes()
    }
}

impl NetworkEntityWorld for TestWorld {
    fn host_id(&self) -> HostId {
        self.host_id
    }

    fn has_entity(&self, entity: NetEntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    fn is_entity_active(&self, entity: NetEntityId) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|test_entity| test_entity.active)
    }

    fn is_ready_to_activate(&self, entity: NetEntityId) -> bool {
        !self.not_ready.contains(&entity)
    }

    fn activate_entity(&mut self, entity: NetEntityId) {
        if !self.activation_cost.is_zero() {
            thread::sleep(self.activation_cost);
        }
        if let Some(test_entity) = self.entities.get_mut(&entity) {
            test_entity.active = true;
        }
    }

    fn entity_role(&self, entity: NetEntityId) -> Option<NetEntityRole> {
        self.entities.get(&entity).map(|test_entity| test_entity.role)
    }

    fn set_entity_role(&mut self, entity: NetEntityId, role: NetEntityRole) {
        if let Some(test_entity) = self.entities.get_mut(&entity) {
            test_entity.role = role;
        }
    }

    fn prefab_id(&self, entity: NetEntityId) -> Option<PrefabEntityId> {
        self.entities
            .get(&entity)
            .map(|test_entity| test_entity.prefab.clone())
    }

    fn create_entity(
        &mut self,
        entity: NetEntityId,
        prefab: &PrefabEntityId,
        role: NetEntityRole,
    ) -> bool {
        if prefab.prefab_name.is_empty() {
            return false;
        }
        self.entities.insert(
            entity,
            TestEntity {
                prefab: prefab.clone(),
                role,
                active: false,
                properties: vec![0; PROPERTY_COUNT],
                owning_connection: None,
                received_rpcs: Vec::new(),
            },
        );
        true
    }

    fn remove_entity(&mut self, entity: NetEntityId) {
        if self.entities.remove(&entity).is_some() {
            self.removed.push(entity);
        }
    }

    fn set_owning_connection(&mut self, entity: NetEntityId, connection: ConnectionId) {
        if let Some(test_entity) = self.entities.get_mut(&entity) {
            test_entity.owning_connection = Some(connection);
        }
    }

    fn property_snapshot(&self, entity: NetEntityId) -> Vec<Vec<u8>> {
        self.entities
            .get(&entity)
            .map(|test_entity| test_entity.properties.iter().map(|value| Self::encode(*value)).collect())
            .unwrap_or_default()
    }

    fn apply_property(&mut self, entity: NetEntityId, property: usize, value: &[u8]) -> bool {
        let Some(test_entity) = self.entities.get_mut(&entity) else {
            return false;
        };
        let Some(slot) = test_entity.properties.get_mut(property) else {
            return false;
        };
        let mut reader = BitReader::new(value);
        match u32::de(&mut reader) {
            Ok(decoded) => {
                *slot = decoded;
                true
            }
            Err(_) => false,
        }
    }

    fn predictable_properties(&self, _entity: NetEntityId) -> ReplicationRecord {
        self.predictable.clone()
    }

    fn handle_rpc(&mut self, entity: NetEntityId, message: &NetworkEntityRpcMessage) -> bool {
        if message.rpc_id == REJECTED_RPC_ID {
            return false;
        }
        match self.entities.get_mut(&entity) {
            Some(test_entity) => {
                test_entity.received_rpcs.push(message.rpc_id);
                true
            }
            None => false,
        }
    }
}
