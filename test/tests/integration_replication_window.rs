/// Integration tests for replicator lifetime driven by the replication window
/// Entities entering, leaving, and re-entering a client's window, plus the
/// limits on how much goes out per frame

use std::time::Duration;

use netrep_shared::{
    replication::{NetEntityRole, ReplicationConfig, ReplicatorState},
    Instant, NetEntityId, PacketNotifiable,
};
use netrep_test::{
    deliver_packets, exchange, LocalPacket, TestHost, TestWindow, TestWindowHandle, HEALTH,
};

const ENTITY: NetEntityId = NetEntityId::new(42);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn server_and_client(config: ReplicationConfig) -> (TestHost, TestHost, TestWindowHandle) {
    let (mut server, client) = TestHost::server_and_client_with_config(config);
    let (window, window_handle) = TestWindow::new();
    server.manager.set_replication_window(Box::new(window));
    (server, client, window_handle)
}

fn spawn_crates(
    server: &mut TestHost,
    window: &TestWindowHandle,
    ids: std::ops::RangeInclusive<u32>,
    remote_role: NetEntityRole,
) {
    for id in ids {
        let entity = NetEntityId::new(id.into());
        server.world.spawn(entity, "crate", 100, 5);
        window.insert(entity, remote_role);
    }
}

/// Updates carried by each update packet, in send order
fn updates_per_packet(packets: &[LocalPacket]) -> Vec<usize> {
    packets
        .iter()
        .filter_map(|packet| match packet {
            LocalPacket::EntityUpdates { payload, .. } => {
                Some(LocalPacket::decode_updates(payload).unwrap().len())
            }
            _ => None,
        })
        .collect()
}

/// Serialized size of one creation update for an entity spawned by
/// [`spawn_crates`]
fn creation_update_size() -> usize {
    let (mut server, _client, window) = server_and_client(ReplicationConfig::default());
    spawn_crates(&mut server, &window, 1..=1, NetEntityRole::Client);
    server.manager.send_updates(&mut server.world, &Instant::now());
    let packets = server.connection.take_packets();
    let LocalPacket::EntityUpdates { payload, .. } = &packets[0] else {
        panic!("expected an update packet");
    };
    LocalPacket::decode_updates(payload).unwrap()[0].estimated_serialize_size()
}

#[test]
fn leaving_window_deletes_after_pending_removal() {
    init_logger();
    let (mut server, mut client, window) = server_and_client(ReplicationConfig::default());
    let mut now = Instant::now();
    server.world.spawn(ENTITY, "crate", 100, 5);
    window.insert(ENTITY, NetEntityRole::Client);
    exchange(&mut server, &mut client, &now).unwrap();
    assert!(client.world.entity(ENTITY).is_some());

    window.remove(ENTITY);
    exchange(&mut server, &mut client, &now).unwrap();
    assert!(matches!(
        server.manager.entity_replicator(ENTITY).unwrap().state(),
        ReplicatorState::PendingRemoval { .. }
    ));
    assert!(client.world.entity(ENTITY).is_some());

    // pending removal lasts one second by default
    now.add_millis(1000);
    let delivery = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(delivery.update_count, 1);
    assert!(client.world.entity(ENTITY).is_none());
    assert_eq!(client.world.removed(), &[ENTITY]);
    assert!(server
        .manager
        .entity_replicator(ENTITY)
        .unwrap()
        .is_marked_for_removal());

    // the acknowledged delete lets both sides erase their replicators
    now.add_millis(20);
    exchange(&mut server, &mut client, &now).unwrap();
    assert!(server.manager.entity_replicator(ENTITY).is_none());
    client.manager.send_updates(&mut client.world, &now);
    assert!(client.manager.entity_replicator(ENTITY).is_none());
}

#[test]
fn reentering_window_cancels_removal() {
    init_logger();
    let (mut server, mut client, window) = server_and_client(ReplicationConfig::default());
    let mut now = Instant::now();
    server.world.spawn(ENTITY, "crate", 100, 5);
    window.insert(ENTITY, NetEntityRole::Client);
    exchange(&mut server, &mut client, &now).unwrap();

    window.remove(ENTITY);
    exchange(&mut server, &mut client, &now).unwrap();

    now.add_millis(500);
    window.insert(ENTITY, NetEntityRole::Client);
    exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(
        server.manager.entity_replicator(ENTITY).unwrap().state(),
        ReplicatorState::Active
    );

    now.add_millis(1000);
    let delivery = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(delivery.update_count, 0);
    assert!(client.world.entity(ENTITY).is_some());
}

#[test]
fn congested_connection_holds_updates() {
    init_logger();
    let (mut server, mut client, window) = server_and_client(ReplicationConfig::default());
    let mut now = Instant::now();
    server.world.spawn(ENTITY, "crate", 100, 5);
    window.insert(ENTITY, NetEntityRole::Client);

    server.connection.set_send_allowed(false);
    let held = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(held.update_count, 0);
    assert!(client.world.entity(ENTITY).is_none());

    server.connection.set_send_allowed(true);
    now.add_millis(20);
    let sent = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(sent.update_count, 1);
    assert_eq!(client.world.property(ENTITY, HEALTH), Some(100));
}

#[test]
fn pending_creations_are_throttled() {
    init_logger();
    let config = ReplicationConfig {
        max_remote_entities_pending_creation: 1,
        ..ReplicationConfig::default()
    };
    let (mut server, mut client, window) = server_and_client(config);
    let mut now = Instant::now();
    for id in 1..=3 {
        let entity = NetEntityId::new(id);
        server.world.spawn(entity, "crate", 100, 5);
        window.insert(entity, NetEntityRole::Client);
    }

    server.manager.send_updates(&mut server.world, &now);
    assert_eq!(server.connection.queued_packet_count(), 1);
    assert_eq!(server.manager.remote_entities_pending_creation_count(), 1);
    server.connection.take_packets();

    // nothing acked yet, so nothing new goes out
    now.add_millis(20);
    server.manager.send_updates(&mut server.world, &now);
    assert_eq!(server.connection.queued_packet_count(), 0);

    // the unacked creation is resent after its drop timeout, then each
    // acknowledged creation frees the slot for the next
    for _ in 0..3 {
        now.add_millis(100);
        let delivery = exchange(&mut server, &mut client, &now).unwrap();
        assert_eq!(delivery.update_count, 1);
    }
    for id in 1..=3 {
        assert!(client.world.entity(NetEntityId::new(id)).is_some());
    }
    assert_eq!(server.manager.remote_entities_pending_creation_count(), 0);
}

#[test]
fn activation_waits_for_ready_entities() {
    init_logger();
    let (mut server, mut client, window) = server_and_client(ReplicationConfig::default());
    let mut now = Instant::now();
    server.world.spawn(ENTITY, "crate", 100, 5);
    window.insert(ENTITY, NetEntityRole::Client);
    client.world.set_ready(ENTITY, false);

    exchange(&mut server, &mut client, &now).unwrap();
    assert!(!client.world.entity(ENTITY).unwrap().active);

    client.world.set_ready(ENTITY, true);
    now.add_millis(20);
    exchange(&mut server, &mut client, &now).unwrap();
    assert!(client.world.entity(ENTITY).unwrap().active);
}

/// Proxy replicators are capped per frame; autonomous ones are not
#[test]
fn proxy_sends_are_capped_per_frame() {
    init_logger();
    let config = ReplicationConfig {
        max_proxy_replicator_sends: 1,
        ..ReplicationConfig::default()
    };
    let (mut server, mut client, window) = server_and_client(config);
    let mut now = Instant::now();
    spawn_crates(&mut server, &window, 1..=3, NetEntityRole::Client);
    spawn_crates(&mut server, &window, 4..=4, NetEntityRole::Autonomous);

    let first = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(first.update_count, 2);
    assert!(client.world.entity(NetEntityId::new(4)).is_some());
    assert!(client.world.entity(NetEntityId::new(1)).is_some());
    assert!(client.world.entity(NetEntityId::new(2)).is_none());

    for _ in 0..2 {
        now.add_millis(20);
        let frame = exchange(&mut server, &mut client, &now).unwrap();
        assert_eq!(frame.update_count, 1);
    }
    for id in 1..=4 {
        assert!(client.world.entity(NetEntityId::new(id)).is_some());
    }

    now.add_millis(20);
    let idle = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(idle.update_count, 0);
}

#[test]
fn updates_per_packet_are_capped() {
    init_logger();
    let config = ReplicationConfig {
        max_updates_per_packet: 1,
        ..ReplicationConfig::default()
    };
    let (mut server, mut client, window) = server_and_client(config);
    let now = Instant::now();
    spawn_crates(&mut server, &window, 1..=3, NetEntityRole::Client);

    server.manager.send_updates(&mut server.world, &now);
    let packets = server.connection.take_packets();
    assert_eq!(updates_per_packet(&packets), vec![1, 1, 1]);

    deliver_packets(packets, &mut client.manager, &mut client.world, &now).unwrap();
    for id in 1..=3 {
        assert!(client.world.entity(NetEntityId::new(id)).is_some());
    }
}

/// Updates are packed until the next one would overflow the payload
#[test]
fn updates_are_packed_up_to_payload_size() {
    init_logger();
    let size = creation_update_size();
    let config = ReplicationConfig {
        max_payload_bytes: size * 2 + size / 2,
        ..ReplicationConfig::default()
    };
    let (mut server, mut client, window) = server_and_client(config);
    let now = Instant::now();
    spawn_crates(&mut server, &window, 1..=4, NetEntityRole::Client);

    server.manager.send_updates(&mut server.world, &now);
    let packets = server.connection.take_packets();
    assert_eq!(updates_per_packet(&packets), vec![2, 2]);

    deliver_packets(packets, &mut client.manager, &mut client.world, &now).unwrap();
    for id in 1..=4 {
        assert_eq!(client.world.property(NetEntityId::new(id), HEALTH), Some(100));
    }
}

/// An update bigger than a whole payload still goes out, alone in its packet
#[test]
fn oversized_update_is_sent_alone() {
    init_logger();
    let size = creation_update_size();
    let config = ReplicationConfig {
        max_payload_bytes: size - 1,
        ..ReplicationConfig::default()
    };
    let (mut server, mut client, window) = server_and_client(config);
    let mut now = Instant::now();
    spawn_crates(&mut server, &window, 1..=3, NetEntityRole::Client);

    server.manager.send_updates(&mut server.world, &now);
    let packets = server.connection.take_packets();
    assert_eq!(updates_per_packet(&packets), vec![1, 1, 1]);
    let delivery = deliver_packets(packets, &mut client.manager, &mut client.world, &now).unwrap();
    for packet_index in delivery.update_packets {
        server.manager.notify_packet_delivered(packet_index, &now);
    }
    for id in 1..=3 {
        assert!(client.world.entity(NetEntityId::new(id)).is_some());
    }

    now.add_millis(20);
    let idle = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(idle.update_count, 0);
}

/// With an activation time slice, slow activations spill into later frames
#[test]
fn activation_time_slice_defers_to_next_frame() {
    init_logger();
    let config = ReplicationConfig {
        entity_activation_time_slice: Duration::from_millis(1),
        ..ReplicationConfig::default()
    };
    let (mut server, mut client, window) = server_and_client(config);
    let now = Instant::now();
    client.world.set_activation_cost(Duration::from_millis(5));
    spawn_crates(&mut server, &window, 1..=3, NetEntityRole::Client);

    let active_count = |client: &TestHost| {
        (1..=3)
            .filter(|id| client.world.entity(NetEntityId::new(*id)).unwrap().active)
            .count()
    };

    let delivery = exchange(&mut server, &mut client, &now).unwrap();
    assert_eq!(delivery.update_count, 3);
    assert_eq!(active_count(&client), 1);

    for expected in 2..=3 {
        client.manager.activate_pending_entities(&mut client.world);
        assert_eq!(active_count(&client), expected);
    }
}
