use crate::types::{ConnectionId, HostId, NetEntityId};

use super::EntityMigrationMessage;

/// Synchronous notification. Handlers run inline, in registration order,
/// when the event is signalled.
pub struct Event<T> {
    handlers: Vec<Box<dyn FnMut(&T)>>,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: impl FnMut(&T) + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn signal(&mut self, value: &T) {
        for handler in self.handlers.iter_mut() {
            handler(value);
        }
    }
}

/// A migration message that must be delivered to the destination host
#[derive(Clone, Debug)]
pub struct SendMigrateEntityEvent {
    pub connection_id: ConnectionId,
    pub message: EntityMigrationMessage,
}

/// Authority over `entity` moved to `remote_host`. Every other replication
/// manager of this host should receive it through `on_post_entity_migration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityMigratedEvent {
    pub entity: NetEntityId,
    pub remote_host: HostId,
}
