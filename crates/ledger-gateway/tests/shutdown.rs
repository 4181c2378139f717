mod common;

use axum::{body::Body, http::Request};
use common::{Script, ScriptedLedger, guard};
use core::time::Duration;
use ledger_gateway::server::{
    http::{AppState, router},
    lifecycle::{Lifecycle, ServerState, ShutdownCoordinator, ShutdownOutcome},
};
use ledger_gateway_core::Error;
use std::{sync::Arc, time::Instant};
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    _dir: TempDir,
    lifecycle: Arc<Lifecycle>,
    coordinator: Arc<ShutdownCoordinator>,
    probe: Arc<common::Probe>,
    sessions: ledger_gateway::server::session::SessionGuard,
}

fn harness(script: Script, drain: Duration, release: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let (ledger, probe) = ScriptedLedger::new(script);
    let sessions = guard(ledger, dir.path());
    let lifecycle = Arc::new(Lifecycle::new());
    let coordinator = Arc::new(ShutdownCoordinator::new(
        Arc::clone(&lifecycle),
        sessions.clone(),
        drain,
        release,
    ));
    Harness {
        _dir: dir,
        lifecycle,
        coordinator,
        probe,
        sessions,
    }
}

#[tokio::test]
async fn shutdown_runs_once() {
    let h = harness(Script::default(), Duration::from_secs(1), Duration::from_secs(1));

    assert_eq!(
        h.coordinator.shutdown().await,
        ShutdownOutcome::Completed {
            drained: true,
            released: true,
        }
    );
    assert_eq!(h.lifecycle.state(), ServerState::Stopped);
    assert_eq!(
        h.coordinator.shutdown().await,
        ShutdownOutcome::AlreadyInProgress
    );
    assert_eq!(h.lifecycle.state(), ServerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_signals_trigger_a_single_sequence() {
    let h = harness(Script::default(), Duration::from_secs(1), Duration::from_secs(1));

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.shutdown().await })
        })
        .collect();
    let mut completed = 0;
    for call in calls {
        if matches!(call.await.unwrap(), ShutdownOutcome::Completed { .. }) {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_in_flight_requests() {
    let h = harness(Script::default(), Duration::from_secs(5), Duration::from_secs(1));
    let request = h.lifecycle.try_admit().unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(request);
    });

    let started = Instant::now();
    let outcome = h.coordinator.shutdown().await;

    assert_eq!(
        outcome,
        ShutdownOutcome::Completed {
            drained: true,
            released: true,
        }
    );
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(h.lifecycle.tracker().is_empty());
}

#[tokio::test]
async fn stuck_requests_do_not_block_shutdown_forever() {
    let h = harness(
        Script::default(),
        Duration::from_millis(50),
        Duration::from_millis(50),
    );
    let _stuck = h.lifecycle.try_admit().unwrap();

    let started = Instant::now();
    let outcome = h.coordinator.shutdown().await;

    assert_eq!(
        outcome,
        ShutdownOutcome::Completed {
            drained: false,
            released: true,
        }
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.lifecycle.state(), ServerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_new_work_is_admitted_once_draining() {
    let h = harness(Script::default(), Duration::from_secs(5), Duration::from_secs(1));
    let request = h.lifecycle.try_admit().unwrap();

    let shutdown = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.shutdown().await })
    };
    while h.lifecycle.state() == ServerState::Running {
        tokio::task::yield_now().await;
    }

    assert!(h.lifecycle.try_admit().is_none());
    assert_eq!(h.lifecycle.tracker().len(), 1);

    drop(request);
    assert!(matches!(
        shutdown.await.unwrap(),
        ShutdownOutcome::Completed { drained: true, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_the_open_session_then_refuses_more() {
    let h = harness(
        Script {
            hold: Duration::from_millis(100),
            ..Script::default()
        },
        Duration::from_secs(1),
        Duration::from_secs(5),
    );

    let running = {
        let sessions = h.sessions.clone();
        tokio::spawn(async move {
            sessions
                .with_session(|ledger| Box::pin(async move { ledger.accounts().await }))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcome = h.coordinator.shutdown().await;
    assert_eq!(
        outcome,
        ShutdownOutcome::Completed {
            drained: true,
            released: true,
        }
    );
    assert_eq!(h.probe.closes(), 1);
    running.await.unwrap().unwrap();

    let err = h
        .sessions
        .with_session(|ledger| Box::pin(async move { ledger.accounts().await }))
        .await
        .unwrap_err();
    assert_eq!(err, Error::ServiceShutdown);
    assert_eq!(h.probe.connects(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_a_session_whose_client_disconnected() {
    let h = harness(
        Script {
            hold: Duration::from_millis(300),
            ..Script::default()
        },
        Duration::from_secs(5),
        Duration::from_millis(50),
    );
    let app = router(AppState {
        sessions: h.sessions.clone(),
        lifecycle: Arc::clone(&h.lifecycle),
    });

    let request = Request::get("/api/accounts").body(Body::empty()).unwrap();
    let client = tokio::spawn(app.oneshot(request));
    tokio::time::timeout(Duration::from_secs(1), async {
        while !h.sessions.is_session_open() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session opens");
    client.abort();
    let _ = client.await;
    assert!(h.lifecycle.tracker().is_empty());
    assert!(h.sessions.is_session_open());

    let outcome = h.coordinator.shutdown().await;

    assert_eq!(
        outcome,
        ShutdownOutcome::Completed {
            drained: true,
            released: true,
        }
    );
    assert!(!h.sessions.is_session_open());
    assert_eq!(h.probe.closes(), 1);
    assert_eq!(h.lifecycle.state(), ServerState::Stopped);
}

#[tokio::test]
async fn stopped_resolves_when_shutdown_completes() {
    let h = harness(Script::default(), Duration::from_secs(1), Duration::from_secs(1));
    let stopped = h.lifecycle.stopped();

    h.coordinator.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), stopped)
        .await
        .expect("stopped future resolves");
}
