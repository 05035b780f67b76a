/// Integration tests for replication over a traffic-controlled link
/// Delivery outcomes feed both traffic control and the replication manager,
/// and a link that keeps losing datagrams gets dropped for its quality

use netrep_shared::{
    replication::{DisconnectReason, NetEntityRole},
    traffic::TrafficControlConfig,
    ConnectionId, Instant, NetEntityId,
};
use netrep_test::{exchange_lossy, TestHost, TestWindow, TestWindowHandle, TrafficHost, HEALTH};

const ENTITY: NetEntityId = NetEntityId::new(9);
const FRAME_MILLIS: u32 = 20;
const DISCONNECT_THRESHOLD: f32 = 0.5;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn replicate_over_traffic() -> (TrafficHost, TestHost, TestWindowHandle, Instant) {
    let now = Instant::now();
    let (mut server, client) = TrafficHost::server_and_client(TrafficControlConfig::default(), &now);
    let (window, window_handle) = TestWindow::new();
    server.manager.set_replication_window(Box::new(window));
    server.world.spawn(ENTITY, "drone", 100, 0);
    window_handle.insert(ENTITY, NetEntityRole::Client);
    (server, client, window_handle, now)
}

#[test]
fn healthy_link_keeps_replicating() {
    init_logger();
    let (mut server, mut client, _window, mut now) = replicate_over_traffic();

    for frame in 0..30u32 {
        server.world.set_property(ENTITY, HEALTH, 100 + frame);
        let result = exchange_lossy(&mut server, &mut client, &now, DISCONNECT_THRESHOLD, |_| true)
            .unwrap();
        assert_eq!(result.delivered.len(), 1);
        assert!(result.lost.is_empty());
        now.add_millis(FRAME_MILLIS);
    }

    assert!(server.disconnects.is_empty());
    assert_eq!(client.world.property(ENTITY, HEALTH), Some(129));
    let state = server.link.congestion_state().unwrap();
    assert_eq!(state.datagrams_in_flight, 0);
    assert!(!state.in_recovery);
}

/// A lost update is reported to the manager, which sends the property again
/// on the next frame even though it did not change
#[test]
fn lost_update_is_resent() {
    init_logger();
    let (mut server, mut client, _window, mut now) = replicate_over_traffic();
    exchange_lossy(&mut server, &mut client, &now, DISCONNECT_THRESHOLD, |_| true).unwrap();
    now.add_millis(FRAME_MILLIS);

    server.world.set_property(ENTITY, HEALTH, 60);
    let result =
        exchange_lossy(&mut server, &mut client, &now, DISCONNECT_THRESHOLD, |_| false).unwrap();
    assert_eq!(result.lost.len(), 1);
    assert_eq!(client.world.property(ENTITY, HEALTH), Some(100));
    now.add_millis(FRAME_MILLIS);

    let result =
        exchange_lossy(&mut server, &mut client, &now, DISCONNECT_THRESHOLD, |_| true).unwrap();
    assert_eq!(result.delivery.update_count, 1);
    assert_eq!(client.world.property(ENTITY, HEALTH), Some(60));

    let state = server.link.congestion_state().unwrap();
    assert!(state.connection_factor > 0.0);
    assert!(server.disconnects.is_empty());
}

/// Every datagram after the first is lost: the window collapses to its floor
/// and the connection is handed to the listener exactly once
#[test]
fn sustained_loss_disconnects_replicating_client() {
    init_logger();
    let (mut server, mut client, _window, mut now) = replicate_over_traffic();
    let initial_window = server.link.congestion_state().unwrap().window_bytes;

    exchange_lossy(&mut server, &mut client, &now, DISCONNECT_THRESHOLD, |_| true).unwrap();
    assert!(client.world.entity(ENTITY).is_some());

    for frame in 1..=30u32 {
        now.add_millis(FRAME_MILLIS);
        server.world.set_property(ENTITY, HEALTH, 100 + frame);
        let result =
            exchange_lossy(&mut server, &mut client, &now, DISCONNECT_THRESHOLD, |_| false)
                .unwrap();
        // the manager keeps trying while the link is still open
        assert_eq!(result.lost.len(), 1, "frame {} sent nothing", frame);

        if frame <= 3 {
            assert!(server.disconnects.is_empty(), "dropped after {} losses", frame);
        }
    }

    assert_eq!(
        server.disconnects.entries(),
        vec![(ConnectionId::new(1), DisconnectReason::ConnectionQuality)]
    );
    assert_eq!(client.world.property(ENTITY, HEALTH), Some(100));

    let state = server.link.congestion_state().unwrap();
    assert!(state.window_bytes < initial_window);
    assert_eq!(state.window_bytes, TrafficControlConfig::default().min_window_bytes);
    assert!(state.connection_factor > DISCONNECT_THRESHOLD);
}
