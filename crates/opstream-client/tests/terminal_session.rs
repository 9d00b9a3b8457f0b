#![allow(clippy::unwrap_used, clippy::expect_used)] // Integration tests use unwrap for brevity

//! Integration tests for the terminal session manager.
//!
//! Runs against an in-memory connector with a paused clock, so grace periods
//! and backoff delays elapse instantly and deterministically.

mod common;

use std::time::Duration;

use tokio::time::Instant;

use opstream_client::terminal::{
    ABNORMAL_CLOSURE, NORMAL_CLOSURE, RemoteEnd, SessionConfig, SessionError, SessionStatus,
    TerminalEvent, TerminalHandle, TerminalSessionManager, TransportEvent,
};
use opstream_core::ReconnectPolicy;
use opstream_core::protocol::{ClientMessage, ServerMessage};

use common::{MockConnector, MockControl, mock_connector};

const URL: &str = "ws://backend/api/instances/vm-42/terminal?token=t1";
const GRACE: Duration = Duration::from_secs(60);

fn config(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        grace_period: GRACE,
        max_listeners: 8,
        reconnect: ReconnectPolicy::from_millis(1_000, 30_000, max_attempts),
        ..SessionConfig::default()
    }
}

fn manager(max_attempts: u32) -> (TerminalSessionManager<MockConnector>, MockControl) {
    let (connector, control) = mock_connector();
    (
        TerminalSessionManager::new(config(max_attempts), connector),
        control,
    )
}

async fn next_event(handle: &mut TerminalHandle) -> TerminalEvent {
    tokio::time::timeout(Duration::from_secs(3600), handle.recv())
        .await
        .expect("no event within an hour")
        .expect("session ended")
}

async fn remote_sends(remote: &RemoteEnd, event: TransportEvent) {
    remote.inbound.send(event).await.unwrap();
}

fn output(data: &str) -> TransportEvent {
    TransportEvent::Message(ServerMessage::Output { data: data.into() })
}

// =========================================================================
// Attach / detach reference counting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn sequential_attaches_share_one_connection() {
    let (manager, mut control) = manager(3);

    let mut first = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut first).await, TerminalEvent::Opened { epoch: 1 });
    let mut remote = control.next_remote().await;
    first.detach();

    for _ in 0..3 {
        let mut handle = manager.attach("vm-42", URL).await.unwrap();
        assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 1 });
        handle.detach();
    }
    assert_eq!(control.connects(), 1);

    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert_eq!(snapshot.listeners, 0);
    assert_eq!(snapshot.status, SessionStatus::Open);
    assert!(snapshot.grace_armed);

    // Detach only arms the grace timer
    tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
    assert!(manager.snapshot("vm-42").await.is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(manager.snapshot("vm-42").await.is_none());
    assert_eq!(manager.stats().await.session_count, 0);
    // Teardown dropped the connection
    assert_eq!(remote.outbound.recv().await, None);
    assert_eq!(control.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn reattach_within_grace_reuses_connection() {
    let (manager, mut control) = manager(3);

    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut handle).await;
    let remote = control.next_remote().await;
    handle.detach();

    tokio::time::sleep(GRACE / 2).await;
    let mut again = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut again).await, TerminalEvent::Opened { epoch: 1 });

    remote_sends(&remote, output("still here")).await;
    assert_eq!(
        next_event(&mut again).await,
        TerminalEvent::Output("still here".into())
    );

    // The cancelled timer never fires
    tokio::time::sleep(GRACE * 10).await;
    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert!(!snapshot.grace_armed);
    assert_eq!(snapshot.listeners, 1);
    assert_eq!(control.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_after_teardown_starts_new_session() {
    let (manager, mut control) = manager(3);

    let handle = manager.attach("vm-42", URL).await.unwrap();
    let _old = control.next_remote().await;
    handle.detach();
    tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
    assert!(manager.snapshot("vm-42").await.is_none());

    let mut fresh = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut fresh).await, TerminalEvent::Opened { epoch: 1 });
    assert_eq!(control.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_attaches_during_connect_share_one_socket() {
    let (manager, mut control) = manager(3);
    control.set_connect_delay(Duration::from_secs(1));

    let mut a = manager.attach("vm-42", URL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut b = manager.attach("vm-42", URL).await.unwrap();

    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Connecting);
    assert_eq!(snapshot.listeners, 2);

    assert_eq!(next_event(&mut a).await, TerminalEvent::Opened { epoch: 1 });
    assert_eq!(next_event(&mut b).await, TerminalEvent::Opened { epoch: 1 });

    let remote = control.next_remote().await;
    remote_sends(&remote, output("hello")).await;
    remote_sends(&remote, output("world")).await;
    for handle in [&mut a, &mut b] {
        assert_eq!(next_event(handle).await, TerminalEvent::Output("hello".into()));
        assert_eq!(next_event(handle).await, TerminalEvent::Output("world".into()));
    }

    assert_eq!(control.connects(), 1);
    assert!(a.try_recv().is_none());
    assert!(b.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn detach_keeps_other_listeners_streaming() {
    let (manager, mut control) = manager(3);

    let mut a = manager.attach("vm-42", URL).await.unwrap();
    let b = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut a).await;
    let remote = control.next_remote().await;

    b.detach();
    remote_sends(&remote, output("for a")).await;
    assert_eq!(next_event(&mut a).await, TerminalEvent::Output("for a".into()));

    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert_eq!(snapshot.listeners, 1);
    assert!(!snapshot.grace_armed);
}

#[tokio::test(start_paused = true)]
async fn listener_limit_enforced() {
    let (connector, _control) = mock_connector();
    let manager = TerminalSessionManager::new(
        SessionConfig {
            max_listeners: 2,
            ..config(3)
        },
        connector,
    );

    let a = manager.attach("vm-42", URL).await.unwrap();
    let _b = manager.attach("vm-42", URL).await.unwrap();
    let err = manager.attach("vm-42", URL).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::TooManyListeners {
            key: "vm-42".into(),
            max: 2
        }
    );

    a.detach();
    assert!(manager.attach("vm-42", URL).await.is_ok());
}

// =========================================================================
// Input
// =========================================================================

#[tokio::test(start_paused = true)]
async fn input_and_resize_forwarded_to_socket() {
    let (manager, mut control) = manager(3);
    control.set_connect_delay(Duration::from_secs(1));

    let mut a = manager.attach("vm-42", URL).await.unwrap();
    let mut b = manager.attach("vm-42", URL).await.unwrap();
    // Not open yet: dropped
    a.send_input("early").unwrap();

    next_event(&mut a).await;
    next_event(&mut b).await;
    let mut remote = control.next_remote().await;

    a.send_input("ls -la\r").unwrap();
    b.resize(120, 40).unwrap();
    b.resize(100, 30).unwrap();

    assert_eq!(
        remote.outbound.recv().await,
        Some(ClientMessage::input("ls -la\r"))
    );
    assert_eq!(
        remote.outbound.recv().await,
        Some(ClientMessage::resize(120, 40))
    );
    assert_eq!(
        remote.outbound.recv().await,
        Some(ClientMessage::resize(100, 30))
    );
    assert!(remote.outbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn remote_error_message_is_forwarded() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut handle).await;
    let remote = control.next_remote().await;

    remote_sends(
        &remote,
        TransportEvent::Message(ServerMessage::Error {
            message: "instance not running".into(),
        }),
    )
    .await;
    assert_eq!(
        next_event(&mut handle).await,
        TerminalEvent::RemoteError("instance not running".into())
    );
    assert_eq!(
        manager.snapshot("vm-42").await.unwrap().status,
        SessionStatus::Open
    );
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_and_resets_attempts() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 1 });
    let mut first = control.next_remote().await;

    remote_sends(
        &first,
        TransportEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        },
    )
    .await;

    assert_eq!(
        next_event(&mut handle).await,
        TerminalEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
    let _second = control.next_remote().await;

    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert_eq!(snapshot.attempt, 0);
    assert_eq!(snapshot.epoch, 2);
    assert_eq!(snapshot.connects, 2);
    assert_eq!(snapshot.status, SessionStatus::Open);
    assert!(handle.try_recv().is_none());
    // The lost connection was released
    assert_eq!(first.outbound.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn normal_close_does_not_reconnect() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut handle).await;
    let remote = control.next_remote().await;

    remote_sends(
        &remote,
        TransportEvent::Closed {
            code: NORMAL_CLOSURE,
            reason: "shell exited".into(),
        },
    )
    .await;
    assert_eq!(
        next_event(&mut handle).await,
        TerminalEvent::Closed {
            code: NORMAL_CLOSURE,
            reason: "shell exited".into()
        }
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(control.connects(), 1);
    assert_eq!(
        manager.snapshot("vm-42").await.unwrap().status,
        SessionStatus::Closed
    );

    // A manual reconnect starts a new epoch
    handle.reconnect().unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
}

#[tokio::test(start_paused = true)]
async fn reattach_after_normal_close_opens_next_epoch() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 1 });
    let remote = control.next_remote().await;

    remote_sends(
        &remote,
        TransportEvent::Closed {
            code: NORMAL_CLOSURE,
            reason: "exit".into(),
        },
    )
    .await;
    assert!(matches!(
        next_event(&mut handle).await,
        TerminalEvent::Closed { .. }
    ));
    drop(handle);

    // Remount well inside the grace period
    tokio::time::sleep(Duration::from_secs(5)).await;
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
    assert_eq!(control.connects(), 2);

    let remote = control.next_remote().await;
    remote_sends(&remote, output("$ ")).await;
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Output("$ ".into()));

    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Open);
    assert!(!snapshot.grace_armed);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let (manager, control) = manager(3);
    control.fail_next(100);

    let started = Instant::now();
    let mut handle = manager.attach("vm-42", URL).await.unwrap();

    let mut delays = Vec::new();
    for expected_attempt in 1..=3 {
        match next_event(&mut handle).await {
            TerminalEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt, expected_attempt);
                delays.push(delay);
            }
            other => panic!("expected Reconnecting, got {other:?}"),
        }
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );

    match next_event(&mut handle).await {
        TerminalEvent::Failed { attempts, error } => {
            assert_eq!(attempts, 3);
            assert!(error.contains("connection refused"), "got: {error}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(7));
    // Initial connect plus three reconnects
    assert_eq!(control.connects(), 4);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(control.connects(), 4);
    assert_eq!(
        manager.snapshot("vm-42").await.unwrap().status,
        SessionStatus::Failed
    );

    // A late listener learns about the failure right away
    let mut late = manager.attach("vm-42", URL).await.unwrap();
    assert!(matches!(
        next_event(&mut late).await,
        TerminalEvent::Failed { attempts: 3, .. }
    ));

    // Manual reconnect re-arms the session
    control.fail_next(0);
    handle.reconnect().unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 1 });
    assert_eq!(next_event(&mut late).await, TerminalEvent::Opened { epoch: 1 });
    assert_eq!(control.connects(), 5);
}

#[tokio::test(start_paused = true)]
async fn backoff_resets_after_successful_open() {
    let (manager, mut control) = manager(5);
    control.fail_next(2);

    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(
        next_event(&mut handle).await,
        TerminalEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(
        next_event(&mut handle).await,
        TerminalEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(2)
        }
    );
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 1 });
    let remote = control.next_remote().await;

    remote_sends(&remote, TransportEvent::Error("connection reset".into())).await;
    assert_eq!(
        next_event(&mut handle).await,
        TerminalEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_bypasses_backoff() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut handle).await;
    let first = control.next_remote().await;

    // A later attach refreshes the URL used for future connects
    let fresh_url = "ws://backend/api/instances/vm-42/terminal?token=t2";
    let mut other = manager.attach("vm-42", fresh_url).await.unwrap();
    next_event(&mut other).await;

    remote_sends(
        &first,
        TransportEvent::Closed {
            code: 1011,
            reason: "server restart".into(),
        },
    )
    .await;
    assert!(matches!(
        next_event(&mut handle).await,
        TerminalEvent::Reconnecting { attempt: 1, .. }
    ));

    let before = Instant::now();
    handle.reconnect().unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
    assert!(before.elapsed() < Duration::from_secs(1));
    let _second = control.next_remote().await;

    // The abandoned backoff timer never triggers another connect
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(control.connects(), 2);
    assert!(handle.try_recv().is_none());
    assert_eq!(control.urls(), vec![URL.to_string(), fresh_url.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_replaces_open_connection() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut handle).await;
    let mut first = control.next_remote().await;

    handle.reconnect().unwrap();
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
    let _second = control.next_remote().await;

    // The old socket is closed; its close is never reported
    assert_eq!(first.outbound.recv().await, None);
    assert!(handle.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn send_failure_triggers_reconnect() {
    let (manager, mut control) = manager(3);
    let mut handle = manager.attach("vm-42", URL).await.unwrap();
    next_event(&mut handle).await;
    let RemoteEnd { outbound, inbound } = control.next_remote().await;
    drop(outbound);

    handle.send_input("x").unwrap();
    assert!(matches!(
        next_event(&mut handle).await,
        TerminalEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(next_event(&mut handle).await, TerminalEvent::Opened { epoch: 2 });
    drop(inbound);
}

#[tokio::test(start_paused = true)]
async fn lagging_listener_is_detached_without_stalling_others() {
    let (connector, mut control) = mock_connector();
    let manager = TerminalSessionManager::new(
        SessionConfig {
            listener_queue: 4,
            ..config(3)
        },
        connector,
    );
    let mut slow = manager.attach("vm-42", URL).await.unwrap();
    let mut fast = manager.attach("vm-42", URL).await.unwrap();
    assert_eq!(next_event(&mut slow).await, TerminalEvent::Opened { epoch: 1 });
    assert_eq!(next_event(&mut fast).await, TerminalEvent::Opened { epoch: 1 });
    let remote = control.next_remote().await;

    for n in 0..6 {
        let line = format!("line {n}\r\n");
        remote_sends(&remote, output(&line)).await;
        assert_eq!(next_event(&mut fast).await, TerminalEvent::Output(line));
    }

    // The slow handle keeps its full queue, then its stream ends
    for n in 0..4 {
        assert_eq!(
            slow.recv().await,
            Some(TerminalEvent::Output(format!("line {n}\r\n")))
        );
    }
    assert_eq!(slow.recv().await, None);

    let snapshot = manager.snapshot("vm-42").await.unwrap();
    assert_eq!(snapshot.listeners, 1);
    assert_eq!(control.connects(), 1);
}

// =========================================================================
// Manager
// =========================================================================

#[tokio::test(start_paused = true)]
async fn sessions_are_isolated_per_key() {
    let (manager, mut control) = manager(3);
    let mut a = manager.attach("vm-1", URL).await.unwrap();
    let mut b = manager.attach("vm-2", URL).await.unwrap();
    next_event(&mut a).await;
    next_event(&mut b).await;
    let remote_a = control.next_remote().await;
    let _remote_b = control.next_remote().await;

    let stats = manager.stats().await;
    assert_eq!(stats.session_count, 2);
    assert_eq!(stats.total_listeners, 2);
    assert_eq!(manager.keys().await, vec!["vm-1", "vm-2"]);

    remote_sends(&remote_a, output("only vm-1")).await;
    assert_eq!(
        next_event(&mut a).await,
        TerminalEvent::Output("only vm-1".into())
    );
    assert!(b.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_session() {
    let (manager, mut control) = manager(3);
    let mut a = manager.attach("vm-1", URL).await.unwrap();
    next_event(&mut a).await;
    let mut remote = control.next_remote().await;

    manager.shutdown().await;
    assert_eq!(
        next_event(&mut a).await,
        TerminalEvent::Closed {
            code: NORMAL_CLOSURE,
            reason: "session shut down".into()
        }
    );
    assert_eq!(a.recv().await, None);
    assert_eq!(
        a.send_input("x").unwrap_err(),
        SessionError::Closed { key: "vm-1".into() }
    );
    assert_eq!(remote.outbound.recv().await, None);
    assert_eq!(manager.stats().await.session_count, 0);

    let mut fresh = manager.attach("vm-1", URL).await.unwrap();
    assert_eq!(next_event(&mut fresh).await, TerminalEvent::Opened { epoch: 1 });
}
