mod common;

use std::time::Duration;

use common::{spawn_session, wait_for, wait_notice, Station};
use scicall_guest::session::MixRole;
use scicall_guest::{ConnectionState, LegKind, Notice, StreamState, UserAction};
use scicall_protocol::ConnectError;

#[tokio::test]
async fn test_hello_handshake() {
    let station = Station::bind().await;
    let (session, mut notices, _pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_notice(&mut notices, |n| matches!(n, Notice::Connected { .. })).await;

    peer.send(r#"{"cmd":"hello_from_server"}"#).await;
    assert_eq!(
        peer.next_non_keepalive().await.as_deref(),
        Some(r#"{"cmd":"hello_from_guest"}"#)
    );

    session.shutdown().await;
}

#[tokio::test]
async fn test_double_toggle_ends_connected() {
    let station = Station::bind().await;
    let (session, _notices, _pipeline) = spawn_session(station.config());

    session.act(UserAction::ToggleConnect).unwrap();
    session.act(UserAction::ToggleConnect).unwrap();
    let _peer = station.accept().await;

    let snapshot = wait_for(&session, |s| s.connection == ConnectionState::Connected).await;
    assert!(!snapshot.legs.any_active());
    assert!(station.stays_quiet(Duration::from_millis(200)).await);

    session.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_wins_over_pending_connect() {
    let station = Station::bind().await;
    let (session, _notices, pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    session.act(UserAction::Disconnect).unwrap();

    // The connect itself still completes on the wire, but the guest drops it.
    let mut peer = station.accept().await;
    peer.expect_closed().await;

    let snapshot = wait_for(&session, |s| s.connection == ConnectionState::Idle).await;
    assert!(!snapshot.legs.any_active());
    assert!(pipeline.calls().is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_station() {
    let station = Station::bind().await;
    let config = station.config();
    drop(station);

    let (session, mut notices, _pipeline) = spawn_session(config);
    session.act(UserAction::Connect).unwrap();

    let notice = wait_notice(&mut notices, |n| matches!(n, Notice::ConnectFailed(_))).await;
    assert!(matches!(notice, Notice::ConnectFailed(ConnectError::Unreachable(_))));
    wait_for(&session, |s| s.connection == ConnectionState::Idle).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_streams_and_volumes() {
    let station = Station::bind().await;
    let (session, _notices, pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;

    peer.send(r#"{"cmd":"set_srtlatency","data":120}"#).await;
    peer.send(r#"{"cmd":"start_common_stream"}"#).await;
    peer.send(r#"{"cmd":"start_feedback_stream","count_of_guests":3,"count_of_externals":2}"#)
        .await;
    peer.send(r#"{"cmd":"start_feedback_stream","count_of_guests":3,"count_of_externals":2}"#)
        .await;

    let snapshot = wait_for(&session, |s| {
        s.legs.outbound == StreamState::Active && s.legs.mix == StreamState::Active
    })
    .await;
    assert_eq!(snapshot.legs.feedback, StreamState::Active);
    assert_eq!(snapshot.latency_ms, 120);
    assert_eq!(snapshot.mix_legs.len(), 5);

    // Let the duplicate start land before counting builds.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.mix_legs.len(), 5);
    assert_eq!(pipeline.build_count(LegKind::FastFeedbackMix), 1);
    assert_eq!(pipeline.build_count(LegKind::Feedback), 1);

    peer.send(r#"{"cmd":"set_volumes","guest_channels":[0.5,0.5,1.0],"external_channels":[1.5]}"#)
        .await;
    let snapshot = wait_for(&session, |s| {
        s.mix_legs
            .iter()
            .any(|l| l.role == MixRole::External && l.index == 0 && l.volume == 1.5)
    })
    .await;
    let volumes: Vec<f64> = snapshot.mix_legs.iter().map(|l| l.volume).collect();
    assert_eq!(volumes, vec![0.5, 0.5, 1.0, 1.5, 1.0]);

    session.shutdown().await;
    assert!(pipeline.live_legs().is_empty());
}

#[tokio::test]
async fn test_keepalive_carries_channel() {
    let station = Station::bind().await;
    let (session, _notices, _pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;

    let line = peer.next_line().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["cmd"], "keepalive");
    assert_eq!(value["ch"], 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_remote_close_stops_everything() {
    let station = Station::bind().await;
    let (session, mut notices, pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;

    peer.send(r#"{"cmd":"start_common_stream"}"#).await;
    peer.send(r#"{"cmd":"start_feedback_stream","count_of_guests":1,"count_of_externals":1}"#)
        .await;
    wait_for(&session, |s| s.legs.mix == StreamState::Active && s.legs.outbound == StreamState::Active)
        .await;

    drop(peer);

    let snapshot = wait_for(&session, |s| s.connection == ConnectionState::Disconnected).await;
    assert!(!snapshot.legs.any_active());
    assert!(snapshot.mix_legs.is_empty());
    assert!(pipeline.live_legs().is_empty());
    wait_notice(&mut notices, |n| matches!(n, Notice::Disconnected { .. })).await;

    // A new session can be started afterwards.
    session.act(UserAction::ToggleConnect).unwrap();
    let _peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_restart_rebuilds_same_registry() {
    let station = Station::bind().await;
    let (session, mut notices, _pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;
    peer.send(r#"{"cmd":"start_feedback_stream","count_of_guests":3,"count_of_externals":2}"#)
        .await;
    let first = wait_for(&session, |s| s.mix_legs.len() == 5).await.mix_legs;

    peer.send(r#"{"cmd":"remote_restart"}"#).await;
    wait_notice(&mut notices, |n| matches!(n, Notice::RestartRequested)).await;
    peer.expect_closed().await;

    // The guest comes back on its own.
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;
    peer.send(r#"{"cmd":"start_feedback_stream","count_of_guests":3,"count_of_externals":2}"#)
        .await;
    let second = wait_for(&session, |s| s.mix_legs.len() == 5).await.mix_legs;
    assert_eq!(first, second);

    session.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_cancels_restart() {
    let station = Station::bind().await;
    let mut config = station.config();
    config.reconnect_delay = Duration::from_millis(300);
    let (session, mut notices, _pipeline) = spawn_session(config);

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;

    peer.send(r#"{"cmd":"remote_restart"}"#).await;
    wait_notice(&mut notices, |n| matches!(n, Notice::RestartRequested)).await;
    session.act(UserAction::Disconnect).unwrap();

    peer.expect_closed().await;
    assert!(station.stays_quiet(Duration::from_millis(600)).await);
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.connection, ConnectionState::Idle);

    session.shutdown().await;
}

#[tokio::test]
async fn test_collision_keeps_connection() {
    let station = Station::bind().await;
    let (session, mut notices, _pipeline) = spawn_session(station.config());

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;

    peer.send(r#"{"cmd":"client_collision"}"#).await;
    wait_notice(&mut notices, |n| matches!(n, Notice::ChannelOccupied)).await;
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.connection, ConnectionState::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn test_malformed_flood_disconnects() {
    let station = Station::bind().await;
    let mut config = station.config();
    config.max_consecutive_malformed = 3;
    let (session, _notices, _pipeline) = spawn_session(config);

    session.act(UserAction::Connect).unwrap();
    let mut peer = station.accept().await;
    wait_for(&session, |s| s.connection == ConnectionState::Connected).await;

    peer.send(r#"{"cmd":"no_such_command"}"#).await;
    peer.send("not json").await;
    peer.send(r#"{"cmd":"set_srtlatency"}"#).await;
    peer.send("[1,2,3]").await;

    wait_for(&session, |s| s.connection == ConnectionState::Disconnected).await;
    peer.expect_closed().await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_self_test_without_station() {
    let (session, _notices, pipeline) = spawn_session(Default::default());

    session.act(UserAction::SelfTest).unwrap();
    let snapshot = wait_for(&session, |s| s.legs.feedback == StreamState::Active).await;
    assert_eq!(snapshot.legs.outbound, StreamState::Active);
    assert_eq!(snapshot.legs.mix, StreamState::Stopped);
    assert_eq!(snapshot.connection, ConnectionState::Idle);

    session.act(UserAction::SelfTest).unwrap();
    wait_for(&session, |s| !s.legs.any_active()).await;
    assert!(pipeline.live_legs().is_empty());

    session.shutdown().await;
}
