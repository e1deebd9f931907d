use std::time::Duration;

use persona_core::connections::{Connection, ConnectionId, ConnectionState, Direction, SendOutcome};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::{ManagerConfig, ReconnectPolicy};
use crate::error::WsError;
use crate::manager::{ConnectionManager, ManagerEvent};
use crate::testing::{MockPeer, MockServer, mock_transport};
use crate::registry::ConnectionPatch;
use crate::transport::{Frame, NO_STATUS_RECEIVED};

fn test_config() -> ManagerConfig {
    ManagerConfig {
        reconnect: ReconnectPolicy::fixed(Duration::from_secs(5)),
        ..ManagerConfig::default()
    }
}

fn start(config: ManagerConfig) -> (ConnectionManager, MockServer) {
    let (connector, server) = mock_transport();
    (ConnectionManager::spawn(config, connector), server)
}

async fn open(
    manager: &ConnectionManager,
    server: &mut MockServer,
    id: ConnectionId,
) -> (Connection, MockPeer) {
    let (conn, peer) = tokio::join!(manager.connect(id), async {
        server.next_request().await.accept()
    });
    (conn.unwrap(), peer)
}

async fn wait_for(
    events: &mut broadcast::Receiver<ManagerEvent>,
    id: ConnectionId,
    predicate: impl Fn(&Connection) -> bool,
) -> Connection {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ManagerEvent::ConnectionChanged(conn)) if conn.id == id && predicate(&conn) => {
                    return conn;
                }
                Ok(_) => continue,
                Err(err) => panic!("event stream failed: {err}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("connection never reached the expected state")
}

fn in_state(state: ConnectionState) -> impl Fn(&Connection) -> bool {
    move |conn| conn.state == state
}

async fn next_ping_nonce(peer: &mut MockPeer) -> String {
    match peer.next_frame().await {
        Some(Frame::Text(text)) => {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "ping");
            value["nonce"].as_str().unwrap().to_string()
        }
        other => panic!("expected ping frame, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn connect_marks_connected_and_records_timestamp() {
    let (manager, mut server) = start(test_config());
    let registered = manager.register("desktop", "ws://localhost:9000").await.unwrap();
    assert_eq!(registered.state, ConnectionState::Disconnected);
    assert!(registered.last_connected.is_none());

    let (conn, _peer) = open(&manager, &mut server, registered.id).await;
    assert_eq!(conn.state, ConnectionState::Connected);
    assert!(conn.last_connected.is_some());
    assert!(conn.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn connect_unknown_id_is_rejected() {
    let (manager, _server) = start(test_config());
    let id = ConnectionId::new();
    assert!(matches!(
        manager.connect(id).await,
        Err(WsError::UnknownConnection(missing)) if missing == id
    ));
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_does_not_reopen() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, _peer) = open(&manager, &mut server, id).await;

    let again = manager.connect(id).await.unwrap();
    assert_eq!(again.state, ConnectionState::Connected);
    assert!(server.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn second_connect_while_opening_joins_the_pending_attempt() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;

    let (first, second, _peer) = tokio::join!(manager.connect(id), manager.connect(id), async {
        server.next_request().await.accept()
    });
    assert_eq!(first.unwrap().state, ConnectionState::Connected);
    assert_eq!(second.unwrap().state, ConnectionState::Connected);
    assert!(server.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn probe_reply_updates_round_trip_and_is_not_logged() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    let opened_at = Instant::now();
    let nonce = next_ping_nonce(&mut peer).await;
    assert_eq!(opened_at.elapsed(), Duration::from_secs(30));

    tokio::time::advance(Duration::from_millis(40)).await;
    peer.send_text(&format!(r#"{{"type":"pong","nonce":"{nonce}"}}"#));

    let conn = wait_for(&mut events, id, |conn| conn.ping.is_some()).await;
    assert_eq!(conn.ping, Some(40));
    assert_eq!(conn.message_count, 0);
    assert!(manager.messages(Some(id)).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_probe_leaves_round_trip_unmeasured() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;

    let first = next_ping_nonce(&mut peer).await;
    // Unrelated traffic does not resolve the probe and is logged as usual.
    peer.send_text(r#"{"type":"chat","text":"hi"}"#);

    let second = next_ping_nonce(&mut peer).await;
    assert_ne!(first, second);

    let conn = manager.connection(id).await.unwrap();
    assert_eq!(conn.ping, None);
    assert_eq!(conn.state, ConnectionState::Connected);
    assert_eq!(conn.message_count, 1);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_sets_error_then_reconnects_after_delay() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.close(1006, "");
    let errored = wait_for(&mut events, id, in_state(ConnectionState::Error)).await;
    assert_eq!(
        errored.error.as_deref(),
        Some("Connection closed abnormally (code 1006)")
    );
    let closed_at = Instant::now();

    let request = server.next_request().await;
    assert_eq!(closed_at.elapsed(), Duration::from_secs(5));
    let reconnecting = manager.connection(id).await.unwrap();
    assert_eq!(reconnecting.state, ConnectionState::Reconnecting);
    assert_eq!(reconnecting.reconnect_attempts, 1);

    let _peer = request.accept();
    let conn = wait_for(&mut events, id, in_state(ConnectionState::Connected)).await;
    assert_eq!(conn.reconnect_attempts, 0);
    assert!(conn.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn stream_ending_without_close_frame_counts_as_abnormal() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.drop_stream();
    let errored = wait_for(&mut events, id, in_state(ConnectionState::Error)).await;
    assert_eq!(errored.error.as_deref(), Some("Connection lost"));
    assert!(matches!(
        events.recv().await,
        Ok(ManagerEvent::ReconnectScheduled { attempt: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn close_without_status_code_counts_as_abnormal() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.close(NO_STATUS_RECEIVED, "");
    let errored = wait_for(&mut events, id, in_state(ConnectionState::Error)).await;
    assert_eq!(
        errored.error.as_deref(),
        Some("Connection closed abnormally (code 1005)")
    );
    assert!(matches!(
        events.recv().await,
        Ok(ManagerEvent::ReconnectScheduled { attempt: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn normal_close_disconnects_without_retry() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.close(1000, "bye");
    let conn = wait_for(&mut events, id, in_state(ConnectionState::Disconnected)).await;
    assert!(conn.error.is_none());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(server.try_next_request().is_none());
    assert_eq!(
        manager.connection(id).await.unwrap().state,
        ConnectionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_sends_normal_close_and_cancels_pending_reconnect() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.close(4000, "server restarting");
    wait_for(&mut events, id, in_state(ConnectionState::Error)).await;

    let conn = manager.disconnect(id).await.unwrap();
    assert_eq!(conn.state, ConnectionState::Disconnected);
    assert!(conn.error.is_none());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(server.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_live_session_with_normal_code() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;

    let conn = manager.disconnect(id).await.unwrap();
    assert_eq!(conn.state, ConnectionState::Disconnected);
    assert_eq!(
        peer.next_frame().await,
        Some(Frame::Close {
            code: 1000,
            reason: "Client disconnect".to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn open_failure_retries_until_attempts_are_exhausted() {
    let config = ManagerConfig {
        reconnect: ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::fixed(Duration::from_secs(5))
        },
        ..ManagerConfig::default()
    };
    let (manager, mut server) = start(config);
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let mut events = manager.subscribe();

    let (conn, ()) = tokio::join!(manager.connect(id), async {
        server.next_request().await.reject("connection refused");
    });
    let conn = conn.unwrap();
    assert_eq!(conn.state, ConnectionState::Error);
    assert!(conn.error.as_deref().unwrap().contains("connection refused"));

    server.next_request().await.reject("connection refused");
    server.next_request().await.reject("connection refused");

    let gave_up = wait_for(&mut events, id, |conn| {
        conn.error
            .as_deref()
            .is_some_and(|error| error.contains("abandoned"))
    })
    .await;
    assert_eq!(gave_up.state, ConnectionState::Error);
    assert_eq!(gave_up.reconnect_attempts, 2);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(server.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn open_failure_without_retry_stays_in_error() {
    let config = ManagerConfig {
        reconnect: ReconnectPolicy {
            retry_on_open_failure: false,
            ..ReconnectPolicy::fixed(Duration::from_secs(5))
        },
        ..ManagerConfig::default()
    };
    let (manager, mut server) = start(config);
    let id = manager.register("desktop", "ws://x").await.unwrap().id;

    let (conn, ()) = tokio::join!(manager.connect(id), async {
        server.next_request().await.reject("no route to host");
    });
    assert_eq!(conn.unwrap().state, ConnectionState::Error);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(server.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_is_skipped_and_not_logged() {
    let (manager, _server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;

    let outcome = manager.send_message(id, "hello").await.unwrap();
    assert_eq!(
        outcome,
        SendOutcome::Skipped {
            state: ConnectionState::Disconnected
        }
    );
    assert!(manager.messages(None).await.unwrap().is_empty());
    assert_eq!(manager.connection(id).await.unwrap().message_count, 0);
}

#[tokio::test(start_paused = true)]
async fn send_while_connected_writes_and_logs() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;

    let outcome = manager.send_message(id, "hello").await.unwrap();
    let SendOutcome::Sent { entry } = outcome else {
        panic!("expected sent outcome, got {outcome:?}");
    };
    assert_eq!(entry.direction, Direction::Sent);
    assert_eq!(entry.size, 5);
    assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".to_string())));

    let conn = manager.connection(id).await.unwrap();
    assert_eq!(conn.message_count, 1);
    assert_eq!(conn.bytes_sent, 5);
    assert!(conn.last_message.is_some());
    assert_eq!(manager.messages(Some(id)).await.unwrap(), vec![entry]);
}

#[tokio::test(start_paused = true)]
async fn send_failure_reports_failed_and_marks_error() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;

    peer.stop_reading();
    let outcome = manager.send_message(id, "hello").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Failed { .. }));

    let conn = manager.connection(id).await.unwrap();
    assert_eq!(conn.state, ConnectionState::Error);
    assert_eq!(conn.message_count, 0);
}

#[tokio::test(start_paused = true)]
async fn inbound_text_and_binary_are_logged_with_counters() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.send_text("status ok");
    peer.send_binary(vec![1, 2, 3, 4]);

    let conn = wait_for(&mut events, id, |conn| conn.message_count == 2).await;
    assert_eq!(conn.bytes_received, 13);

    let entries = manager.messages(Some(id)).await.unwrap();
    let previews: Vec<_> = entries.iter().map(|e| e.preview.as_str()).collect();
    assert_eq!(previews, vec!["status ok", "[Binary data: 4 bytes]"]);
    assert!(entries.iter().all(|e| e.direction == Direction::Received));
}

#[tokio::test(start_paused = true)]
async fn transport_error_marks_error_without_closing() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.fail("frame too large");
    let conn = wait_for(&mut events, id, in_state(ConnectionState::Error)).await;
    assert!(conn.error.as_deref().unwrap().contains("frame too large"));

    // The session stays attached; later frames are still logged.
    peer.send_text("still here");
    wait_for(&mut events, id, |conn| conn.message_count == 1).await;
}

#[tokio::test(start_paused = true)]
async fn clear_messages_targets_one_connection_or_all() {
    let (manager, mut server) = start(test_config());
    let a = manager.register("alpha", "ws://a").await.unwrap().id;
    let b = manager.register("beta", "ws://b").await.unwrap().id;
    let (_, _peer_a) = open(&manager, &mut server, a).await;
    let (_, _peer_b) = open(&manager, &mut server, b).await;

    manager.send_message(a, "one").await.unwrap();
    manager.send_message(b, "two").await.unwrap();
    manager.send_message(b, "three").await.unwrap();

    assert_eq!(manager.clear_messages(Some(a)).await.unwrap(), 1);
    assert_eq!(manager.connection(a).await.unwrap().message_count, 0);
    assert_eq!(manager.connection(b).await.unwrap().message_count, 2);
    assert_eq!(manager.messages(None).await.unwrap().len(), 2);

    assert_eq!(manager.clear_messages(None).await.unwrap(), 2);
    let conn = manager.connection(b).await.unwrap();
    assert_eq!((conn.message_count, conn.bytes_sent), (0, 0));
    assert_eq!(conn.state, ConnectionState::Connected);

    let missing = ConnectionId::new();
    assert!(matches!(
        manager.clear_messages(Some(missing)).await,
        Err(WsError::UnknownConnection(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn deregister_closes_session_and_purges_log() {
    let (manager, mut server) = start(test_config());
    let a = manager.register("alpha", "ws://a").await.unwrap().id;
    let b = manager.register("beta", "ws://b").await.unwrap().id;
    let (_, mut peer_a) = open(&manager, &mut server, a).await;
    let (_, _peer_b) = open(&manager, &mut server, b).await;
    manager.send_message(a, "one").await.unwrap();
    manager.send_message(b, "two").await.unwrap();
    assert_eq!(peer_a.next_frame().await, Some(Frame::Text("one".to_string())));

    assert!(manager.deregister(a).await.unwrap());
    assert!(matches!(peer_a.next_frame().await, Some(Frame::Close { code: 1000, .. })));

    let remaining = manager.messages(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].connection_id, b);
    assert!(matches!(
        manager.connection(a).await,
        Err(WsError::UnknownConnection(_))
    ));
    assert!(!manager.deregister(a).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn deregister_during_backoff_prevents_reconnect() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    peer.close(1011, "internal error");
    wait_for(&mut events, id, in_state(ConnectionState::Error)).await;
    manager.deregister(id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(server.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn update_state_merges_and_find_by_name_resolves() {
    let (manager, _server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;

    let renamed = manager
        .update_state(
            id,
            ConnectionPatch {
                name: Some("laptop".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "laptop");
    assert_eq!(renamed.url, "ws://x/");

    assert!(manager.find_by_name("desktop").await.unwrap().is_none());
    assert_eq!(manager.find_by_name("laptop").await.unwrap().unwrap().id, id);
}

#[tokio::test(start_paused = true)]
async fn disconnected_patch_closes_the_live_session() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut old_peer) = open(&manager, &mut server, id).await;

    let conn = manager
        .update_state(id, ConnectionPatch::state(ConnectionState::Disconnected))
        .await
        .unwrap();
    assert_eq!(conn.state, ConnectionState::Disconnected);
    assert_eq!(
        old_peer.next_frame().await,
        Some(Frame::Close {
            code: 1000,
            reason: "Client disconnect".to_string()
        })
    );

    // The detached session no longer feeds the log.
    old_peer.send_text("late");
    let (conn, mut peer) = open(&manager, &mut server, id).await;
    assert_eq!(conn.state, ConnectionState::Connected);
    assert!(manager.messages(Some(id)).await.unwrap().is_empty());

    let outcome = manager.send_message(id, "hello").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));
    assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".to_string())));
}

#[tokio::test(start_paused = true)]
async fn lifecycle_state_patches_are_rejected() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;

    for state in [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
    ] {
        assert!(matches!(
            manager.update_state(id, ConnectionPatch::state(state)).await,
            Err(WsError::InvalidState(rejected)) if rejected == state
        ));
    }
    let conn = manager.connection(id).await.unwrap();
    assert_eq!(conn.state, ConnectionState::Disconnected);
    assert!(server.try_next_request().is_none());

    let flagged = manager
        .update_state(id, ConnectionPatch::error("manual"))
        .await
        .unwrap();
    assert_eq!(flagged.state, ConnectionState::Error);
    assert_eq!(flagged.error.as_deref(), Some("manual"));
}

#[tokio::test(start_paused = true)]
async fn connect_after_transport_error_replaces_the_session() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut old_peer) = open(&manager, &mut server, id).await;
    let mut events = manager.subscribe();

    old_peer.fail("frame too large");
    wait_for(&mut events, id, in_state(ConnectionState::Error)).await;

    let (conn, mut peer) = open(&manager, &mut server, id).await;
    assert_eq!(conn.state, ConnectionState::Connected);
    assert!(conn.error.is_none());
    assert!(matches!(old_peer.next_frame().await, Some(Frame::Close { code: 1000, .. })));

    manager.send_message(id, "hello").await.unwrap();
    assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".to_string())));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_manager() {
    let (manager, mut server) = start(test_config());
    let id = manager.register("desktop", "ws://x").await.unwrap().id;
    let (_, mut peer) = open(&manager, &mut server, id).await;

    manager.shutdown().await;
    assert!(matches!(peer.next_frame().await, Some(Frame::Close { code: 1000, .. })));
    assert!(matches!(
        manager.connections().await,
        Err(WsError::ManagerStopped)
    ));
}
