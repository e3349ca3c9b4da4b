//! Session routing tests
//!
//! Ownership, isolation and reconnection behaviour of the hub, driven through
//! the client message protocol.

mod common;

use common::outputs_for;
use common::settle;
use common::Harness;
use termhub_daemon::test_support::MockMultiplexer;
use termhub_daemon::SessionStatus;
use termhub_protocol::ClientMessage;
use termhub_protocol::ErrorKind;
use termhub_protocol::ServerMessage;
use termhub_protocol::Size;
use termhub_protocol::SpawnArgs;
use termhub_protocol::SplitDirection;
use termhub_protocol::SplitRequest;

// =============================================================================
// Isolation
// =============================================================================

#[tokio::test]
async fn test_output_reaches_only_the_owner() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let mut c2 = harness.connect("w2");
    let s1 = c1.spawn_session("r1", "shell").await;
    let s2 = c2.spawn_session("r2", "shell").await;

    assert!(harness.backend.emit_output(&s1, b"from-s1"));
    assert!(harness.backend.emit_output(&s2, b"from-s2"));
    c1.expect_output(&s1, b"from-s1").await;
    c2.expect_output(&s2, b"from-s2").await;
    settle().await;

    assert!(outputs_for(&c1.drain(), &s2).is_empty());
    assert!(outputs_for(&c2.drain(), &s1).is_empty());
}

#[tokio::test]
async fn test_input_from_non_owner_is_dropped_silently() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let mut c2 = harness.connect("w2");
    let s1 = c1.spawn_session("r1", "shell").await;

    c2.input(&s1, b"rm -rf /\r").await;
    c1.input(&s1, b"ls\r").await;

    assert_eq!(harness.backend.written(&s1), b"ls\r");
    assert!(c2.drain().is_empty());
    assert_eq!(harness.hub.diagnostics().not_owner_rejections, 1);
}

#[tokio::test]
async fn test_attach_from_other_window_is_rejected() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let mut c2 = harness.connect("w2");
    let s1 = c1.spawn_session("r1", "shell").await;

    c2.attach_id(&s1).await;

    match c2.next().await {
        ServerMessage::Error { kind, session_id, .. } => {
            assert_eq!(kind, ErrorKind::WindowMismatch);
            assert_eq!(session_id.as_deref(), Some(s1.as_str()));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(harness.hub.owners(&s1), vec![c1.id]);
}

#[tokio::test]
async fn test_spawn_naming_other_window_is_rejected() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");

    c1.send(ClientMessage::Spawn {
        request_id: "r1".into(),
        kind: "shell".into(),
        size: Size::new(80, 24),
        window_id: "w2".into(),
        spawn_args: SpawnArgs::default(),
        split: None,
    })
    .await;

    match c1.next().await {
        ServerMessage::SpawnError { kind, request_id, .. } => {
            assert_eq!(kind, ErrorKind::WindowMismatch);
            assert_eq!(request_id, "r1");
        }
        other => panic!("expected spawnError, got {other:?}"),
    }
    assert_eq!(harness.backend.spawn_count(), 0);
}

// =============================================================================
// Detach and reconnect
// =============================================================================

#[tokio::test]
async fn test_attach_twice_keeps_one_owner() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;

    c1.attach_id(&s1).await;
    c1.attach_id(&s1).await;

    assert_eq!(harness.hub.owners(&s1), vec![c1.id]);
    assert_eq!(harness.backend.spawn_count(), 1);
}

#[tokio::test]
async fn test_disconnect_leaves_session_detached() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;

    c1.disconnect().await;

    let info = harness.hub.session(&s1).unwrap();
    assert_eq!(info.status, SessionStatus::Detached);
    assert!(harness.hub.owners(&s1).is_empty());
    assert!(!harness.backend.was_terminated(&s1));
}

#[tokio::test]
async fn test_output_while_detached_is_replayed_on_reattach() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;
    c1.disconnect().await;

    harness.backend.emit_output(&s1, b"while-away");
    settle().await;

    let mut c2 = harness.connect("w1");
    c2.attach_id(&s1).await;
    c2.expect_output(&s1, b"while-away").await;
    assert_eq!(harness.hub.session(&s1).unwrap().status, SessionStatus::Active);
}

#[tokio::test]
async fn test_detach_without_keep_alive_terminates_last_owner_session() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;

    c1.detach(&s1, false).await;

    assert!(matches!(c1.next().await, ServerMessage::Detached { .. }));
    assert!(harness.backend.was_terminated(&s1));
    assert!(harness.hub.session(&s1).is_none());
}

#[tokio::test]
async fn test_detach_by_non_owner_is_not_owner_error() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let mut c2 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;

    c2.detach(&s1, false).await;

    match c2.next().await {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotOwner),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(!harness.backend.was_terminated(&s1));
}

#[tokio::test]
async fn test_attach_to_missing_session_never_spawns() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");

    c1.attach_id(&termhub_daemon::SessionId::new("gone1234")).await;
    c1.attach_heuristic(None, "shell").await;

    for _ in 0..2 {
        match c1.next().await {
            ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::SessionGone),
            other => panic!("expected error, got {other:?}"),
        }
    }
    assert_eq!(harness.backend.spawn_count(), 0);
}

#[tokio::test]
async fn test_heuristic_skips_sessions_held_by_live_connections() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let _held = c1.spawn_session("r1", "shell").await;
    let mut c2 = harness.connect("w1");

    c2.attach_heuristic(None, "shell").await;

    match c2.next().await {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::SessionGone),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_detach_does_not_kill_backed_session() {
    let harness = Harness::with_multiplexer(MockMultiplexer::new("termhub"));
    let mux = harness.mux.clone().unwrap();
    let mut c1 = harness.connect("w1");
    c1.spawn_with(
        "r1",
        "shell",
        SpawnArgs {
            persistent: true,
            ..SpawnArgs::default()
        },
    )
    .await;
    let s1 = c1.expect_spawned().await;
    let name = format!("termhub-{s1}");
    assert_eq!(mux.tag_of(&name, "@termhub_window").as_deref(), Some("w1"));
    assert_eq!(mux.tag_of(&name, "@termhub_id").as_deref(), Some(s1.as_str()));

    c1.detach(&s1, true).await;
    settle().await;

    let info = harness.hub.session(&s1).unwrap();
    assert_eq!(info.status, SessionStatus::Detached);
    assert!(harness.backend.was_terminated(&s1));
    assert!(mux.names().contains(&name));
    assert!(harness
        .hub
        .list_sessions()
        .iter()
        .any(|s| s.session_id == s1.as_str()));

    let mut c2 = harness.connect("w1");
    c2.attach_id(&s1).await;
    match c2.next().await {
        ServerMessage::Spawned {
            session_id,
            attached,
            ..
        } => {
            assert_eq!(session_id, s1.as_str());
            assert!(attached);
        }
        other => panic!("expected spawned, got {other:?}"),
    }
    assert_eq!(harness.backend.spawn_count(), 2);
    let launch = harness.backend.launch_of(&s1).unwrap();
    assert_eq!(launch.args, vec!["attach".to_string(), name]);

    harness.backend.emit_output(&s1, b"restored");
    c2.expect_output(&s1, b"restored").await;
}

#[tokio::test]
async fn test_restored_sessions_are_reachable_after_restart() {
    let mux = MockMultiplexer::new("termhub");
    mux.seed("termhub-abc12345", Some("shell"), Some("w1"));
    let harness = Harness::with_multiplexer(mux);
    let mut c1 = harness.connect("w1");

    c1.attach_heuristic(None, "shell").await;

    match c1.next().await {
        ServerMessage::Spawned {
            session_id,
            attached,
            ..
        } => {
            assert_eq!(session_id, "abc12345");
            assert!(attached);
        }
        other => panic!("expected spawned, got {other:?}"),
    }
    assert_eq!(harness.backend.spawn_count(), 1);
}

// =============================================================================
// Example scenario
// =============================================================================

#[tokio::test]
async fn test_split_close_disconnect_reconnect_scenario() {
    let harness = Harness::new();
    let mut c1 = harness.connect("W1");
    let s1 = c1.spawn_session("r1", "shell").await;

    c1.send(ClientMessage::Spawn {
        request_id: "r2".into(),
        kind: "shell".into(),
        size: Size::new(80, 24),
        window_id: "W1".into(),
        spawn_args: SpawnArgs::default(),
        split: Some(SplitRequest {
            session_id: s1.to_string(),
            direction: SplitDirection::Right,
            multiplexer_layout: false,
        }),
    })
    .await;
    let s2 = c1.expect_spawned().await;
    match c1
        .next_matching(|m| matches!(m, ServerMessage::SplitChanged { .. }))
        .await
    {
        ServerMessage::SplitChanged { group } => {
            assert_eq!(group.panes, vec![s1.to_string(), s2.to_string()]);
        }
        other => panic!("expected splitChanged, got {other:?}"),
    }
    let group = harness.hub.group_of(&s1).unwrap();
    assert_eq!(group.panes, vec![s1.clone(), s2.clone()]);

    c1.close(&s2).await;
    match c1
        .next_matching(|m| matches!(m, ServerMessage::SplitDissolved { .. }))
        .await
    {
        ServerMessage::SplitDissolved { group_id, survivor } => {
            assert_eq!(group_id, group.id.to_string());
            assert_eq!(survivor.as_deref(), Some(s1.as_str()));
        }
        other => panic!("expected splitDissolved, got {other:?}"),
    }
    assert!(harness.hub.group_of(&s1).is_none());
    assert!(harness.hub.session(&s2).is_none());

    c1.disconnect().await;
    assert_eq!(
        harness.hub.session(&s1).unwrap().status,
        SessionStatus::Detached
    );

    let mut c2 = harness.connect("W1");
    c2.attach_heuristic(None, "shell").await;
    match c2.next().await {
        ServerMessage::Spawned {
            session_id,
            attached,
            ..
        } => {
            assert_eq!(session_id, s1.as_str());
            assert!(attached);
        }
        other => panic!("expected spawned, got {other:?}"),
    }
    assert_eq!(harness.backend.spawn_count(), 2);
    assert!(harness.hub.split_violations().is_empty());
}

#[tokio::test]
async fn test_process_exit_reports_code_and_dissolves_group() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;
    let s2 = c1.spawn_session("r2", "shell").await;
    c1.send(ClientMessage::Split {
        session_id: s1.to_string(),
        other_session_id: s2.to_string(),
        direction: SplitDirection::Down,
    })
    .await;
    assert!(harness.hub.group_of(&s2).is_some());

    harness.backend.emit_exit(&s2, Some(3));

    match c1
        .next_matching(|m| matches!(m, ServerMessage::Exited { .. }))
        .await
    {
        ServerMessage::Exited { session_id, code } => {
            assert_eq!(session_id, s2.as_str());
            assert_eq!(code, Some(3));
        }
        other => panic!("expected exited, got {other:?}"),
    }
    assert!(harness.hub.group_of(&s1).is_none());
    assert!(harness.hub.session(&s2).is_none());
}

#[tokio::test]
async fn test_move_pane_revokes_owners_and_rehomes_session() {
    let harness = Harness::new();
    let mut c1 = harness.connect("w1");
    let s1 = c1.spawn_session("r1", "shell").await;

    c1.send(ClientMessage::MovePane {
        session_id: s1.to_string(),
        window_id: "w2".into(),
    })
    .await;

    assert!(matches!(c1.next().await, ServerMessage::Detached { .. }));
    let info = harness.hub.session(&s1).unwrap();
    assert_eq!(info.window.as_ref().map(|w| w.as_str()), Some("w2"));

    let mut c2 = harness.connect("w2");
    c2.attach_heuristic(None, "shell").await;
    match c2.next().await {
        ServerMessage::Spawned { session_id, .. } => assert_eq!(session_id, s1.as_str()),
        other => panic!("expected spawned, got {other:?}"),
    }
}
