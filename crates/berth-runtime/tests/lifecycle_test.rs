//! Integration tests for the container lifecycle.
//!
//! Every test drives a fresh engine over the simulated backend with its
//! own temporary data directory:
//! 1. State machine transitions and volume cleanup
//! 2. Condition waits racing against transitions
//! 3. Listing and pruning
//! 4. Health checks and forced stops

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use berth_common::config::BerthConfig;
use berth_common::error::ErrorKind;
use berth_common::types::ContainerState;
use berth_runtime::backend::{SimulatedBackend, SimulatedWorkload};
use berth_runtime::container::CreateOptions;
use berth_runtime::engine::{Engine, RemoveOptions};
use berth_runtime::health::{HealthCheckConfig, HealthStatus};
use berth_runtime::query::ListOptions;
use berth_runtime::signal::Signal;
use tempfile::TempDir;

fn engine_with(backend: SimulatedBackend) -> (TempDir, Engine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::new(BerthConfig::with_data_dir(dir.path()), Arc::new(backend));
    (dir, engine)
}

fn engine() -> (TempDir, Engine) {
    engine_with(SimulatedBackend::new())
}

fn top(name: &str) -> CreateOptions {
    CreateOptions::new("alpine", vec!["top".into()]).name(name)
}

async fn running(engine: &Engine, name: &str) -> String {
    let id = engine.create(top(name)).expect("create");
    engine.start(name).await.expect("start");
    id.to_string()
}

async fn state_of(engine: &Engine, reference: &str) -> ContainerState {
    engine.inspect(reference, false).await.unwrap().record.state
}

fn all() -> ListOptions {
    ListOptions {
        all: true,
        ..ListOptions::default()
    }
}

// ── Transitions ──────────────────────────────────────────────────────

#[tokio::test]
async fn pause_is_visible_and_not_repeatable() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;

    engine.pause("web").await.unwrap();
    assert_eq!(state_of(&engine, "web").await, ContainerState::Paused);

    let err = engine.pause("web").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn paused_container_refuses_stop_and_kill() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;
    engine.pause("web").await.unwrap();

    let stop = engine.stop("web", None).await.unwrap_err();
    assert_eq!(stop.kind(), ErrorKind::InvalidState);
    let kill = engine.kill("web", "SIGKILL").await.unwrap_err();
    assert_eq!(kill.kind(), ErrorKind::InvalidState);

    engine.unpause("web").await.unwrap();
    assert_eq!(state_of(&engine, "web").await, ContainerState::Running);
}

#[tokio::test]
async fn forced_remove_of_paused_container_erases_every_reference() {
    let (_dir, engine) = engine();
    let id = running(&engine, "web").await;
    engine.pause("web").await.unwrap();

    let err = engine.remove("web", RemoveOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let _ = engine
        .remove("web", RemoveOptions::default().forced())
        .await
        .unwrap();
    for reference in [id.as_str(), &id[..6], "web"] {
        let err = engine.inspect(reference, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{reference} still resolves");
    }
}

#[tokio::test]
async fn init_twice_fails() {
    let (_dir, engine) = engine();
    let _ = engine.create(top("web")).unwrap();

    engine.init("web").await.unwrap();
    assert_eq!(state_of(&engine, "web").await, ContainerState::Initialized);
    let err = engine.init("web").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    engine.start("web").await.unwrap();
    assert_eq!(state_of(&engine, "web").await, ContainerState::Running);
}

#[tokio::test]
async fn concurrent_pauses_yield_one_success() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;

    let (a, b) = tokio::join!(engine.pause("web"), engine.pause("web"));
    assert!(a.is_ok() ^ b.is_ok());
    let err = a.err().or(b.err()).unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn duplicate_names_conflict_until_removal() {
    let (_dir, engine) = engine();
    let _ = engine.create(top("web")).unwrap();

    let err = engine.create(top("web")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let _ = engine.remove("web", RemoveOptions::default()).await.unwrap();
    assert!(engine.create(top("web")).is_ok());
}

#[tokio::test]
async fn remove_many_reports_each_item() {
    let (_dir, engine) = engine();
    let _ = engine.create(top("idle")).unwrap();
    let _ = running(&engine, "busy").await;

    let report = engine
        .remove_many(&["idle", "busy", "ghost"], RemoveOptions::default())
        .await;
    assert_eq!(report.succeeded().collect::<Vec<_>>().len(), 1);
    let failures: HashMap<&str, ErrorKind> = report
        .failures()
        .map(|(id, failure)| (id, failure.kind))
        .collect();
    assert_eq!(failures["busy"], ErrorKind::InvalidState);
    assert_eq!(failures["ghost"], ErrorKind::NotFound);
}

#[tokio::test]
async fn pause_during_stop_grace_is_not_escalated() {
    let workload = SimulatedWorkload::new().ignoring(Signal::SIGTERM);
    let (_dir, engine) = engine_with(SimulatedBackend::with_workload(workload));
    let _ = running(&engine, "web").await;

    let (stopped, paused) = tokio::join!(
        engine.stop("web", Some(Duration::from_millis(300))),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine.pause("web").await
        }
    );
    paused.unwrap();
    assert_eq!(stopped.unwrap_err().kind(), ErrorKind::InvalidState);

    let report = engine.inspect("web", false).await.unwrap();
    assert_eq!(report.record.state, ContainerState::Paused);
    assert_eq!(report.record.exit_code, -1);
    engine.unpause("web").await.unwrap();
}

#[tokio::test]
async fn kill_refuses_job_control_signals() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;

    for signal in ["SIGSTOP", "TSTP", "SIGCONT"] {
        let err = engine.kill("web", signal).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{signal}");
    }
    assert_eq!(state_of(&engine, "web").await, ContainerState::Running);
}

#[tokio::test]
async fn volumes_outlive_removal_while_referenced() {
    let (_dir, engine) = engine();
    let _ = engine.create(top("a").anonymous_volume("/data")).unwrap();
    let volume = engine.inspect("a", false).await.unwrap().record.volumes[0]
        .name
        .clone();
    let path = engine.config().volumes_dir().join(&volume);
    let _ = engine
        .create(top("b").named_volume(volume.as_str(), "/data"))
        .unwrap();

    let with_volumes = RemoveOptions::default().with_volumes();
    let _ = engine.remove("a", with_volumes).await.unwrap();
    assert!(path.exists(), "volume still mounted by b was deleted");
    let _ = engine.remove("b", with_volumes).await.unwrap();
    assert!(!path.exists());

    let _ = engine.create(top("c").anonymous_volume("/cache")).unwrap();
    let kept = engine.inspect("c", false).await.unwrap().record.volumes[0]
        .name
        .clone();
    let _ = engine.remove("c", RemoveOptions::default()).await.unwrap();
    assert!(engine.config().volumes_dir().join(kept).exists());
}

// ── Waits ────────────────────────────────────────────────────────────

#[tokio::test]
async fn exit_wait_races_stop() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;

    let waiter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.wait("web", &[]).await })
    };
    tokio::task::yield_now().await;
    engine.stop("web", None).await.unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), 143);
}

#[tokio::test]
async fn wait_on_unknown_reference_fails_immediately() {
    let (_dir, engine) = engine();
    let outcome = tokio::time::timeout(Duration::from_secs(1), engine.wait("ghost", &[]))
        .await
        .expect("wait blocked");
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn wait_for_pause_unblocks_after_pause_commits() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;

    let waiter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.wait("web", &[ContainerState::Paused]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    engine.pause("web").await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), -1);
}

#[tokio::test]
async fn satisfied_wait_returns_immediately() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;
    engine.kill("web", "TERM").await.unwrap();

    let code = tokio::time::timeout(Duration::from_secs(1), engine.wait("web", &[]))
        .await
        .expect("wait blocked");
    assert_eq!(code.unwrap(), 143);
    assert_eq!(engine.wait("web", &[]).await.unwrap(), 143);
}

#[tokio::test]
async fn removal_fails_pending_waiters() {
    let (_dir, engine) = engine();
    let _ = engine.create(top("web")).unwrap();

    let waiter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.wait("web", &[ContainerState::Running]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = engine.remove("web", RemoveOptions::default()).await.unwrap();

    assert_eq!(waiter.await.unwrap().unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn natural_exit_is_recorded() {
    let workload = SimulatedWorkload::new().run_for(Duration::from_millis(30), 3);
    let (_dir, engine) = engine_with(SimulatedBackend::with_workload(workload));
    let _ = running(&engine, "job").await;

    assert_eq!(engine.wait("job", &[]).await.unwrap(), 3);
    let report = engine.inspect("job", false).await.unwrap();
    assert_eq!(report.record.state, ContainerState::Stopped);
    assert!(report.record.finished_at.is_some());
}

// ── Listing and pruning ──────────────────────────────────────────────

#[tokio::test]
async fn default_listing_excludes_paused_and_stopped() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "paused").await;
    engine.pause("paused").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _ = running(&engine, "stopped").await;
    engine.stop("stopped", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _ = running(&engine, "live").await;

    let running_only = engine.list(&ListOptions::default()).await.unwrap();
    assert_eq!(running_only.len(), 1);
    assert_eq!(running_only[0].name, "live");

    let last = ListOptions { last: 1, ..all() };
    let newest = engine.list(&last).await.unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].name, "live");
    assert_eq!(engine.list(&all()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn last_created_is_listed_first_and_killable() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "first").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _ = running(&engine, "second").await;

    let last = ListOptions {
        last: 1,
        ..ListOptions::default()
    };
    let listed = engine.list(&last).await.unwrap();
    assert_eq!(listed[0].name, "second");

    engine.kill("second", "SIGTERM").await.unwrap();
    assert_eq!(engine.wait("second", &[]).await.unwrap(), 143);
}

#[tokio::test]
async fn last_covers_every_state() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "live").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _ = engine.create(top("idle")).unwrap();

    let last = ListOptions {
        last: 1,
        ..ListOptions::default()
    };
    let listed = engine.list(&last).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "idle");
}

#[tokio::test]
async fn prune_honours_its_filters() {
    let (_dir, engine) = engine();
    for name in ["a", "b"] {
        let _ = running(&engine, name).await;
        engine.stop(name, None).await.unwrap();
    }
    let _ = running(&engine, "live").await;

    let name_filter = HashMap::from([("name".to_string(), vec!["a".to_string()])]);
    let err = engine.prune(&name_filter).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(engine.list(&all()).await.unwrap().len(), 3);

    let no_match = HashMap::from([("label".to_string(), vec!["absent".to_string()])]);
    assert!(engine.prune(&no_match).await.unwrap().is_empty());

    let far = (chrono::Utc::now() + chrono::Duration::days(365)).to_rfc3339();
    let everything = HashMap::from([("until".to_string(), vec![far])]);
    let report = engine.prune(&everything).await.unwrap();
    assert_eq!(report.len(), 2);
    assert!(report.is_success());

    let left = engine.list(&all()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "live");
}

// ── Health checks and forced stops ───────────────────────────────────

#[tokio::test]
async fn healthcheck_requires_configuration() {
    let (_dir, engine) = engine();
    let _ = running(&engine, "web").await;

    let err = engine.healthcheck("web").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionRequired);
    let err = engine.healthcheck("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn failing_healthcheck_turns_unhealthy() {
    let workload = SimulatedWorkload::new().exec_exit_code(1);
    let (_dir, engine) = engine_with(SimulatedBackend::with_workload(workload));
    let check = HealthCheckConfig::shell("exit 1").with_retries(2);
    let _ = engine.create(top("web").healthcheck(check)).unwrap();

    let err = engine.healthcheck("web").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    engine.start("web").await.unwrap();
    assert_eq!(
        engine.healthcheck("web").await.unwrap().status,
        HealthStatus::Starting
    );
    let health = engine.healthcheck("web").await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.failing_streak, 2);
}

#[tokio::test]
async fn running_healthcheck_blocks_neither_listing_nor_stop() {
    let workload = SimulatedWorkload::new().exec_duration(Duration::from_secs(2));
    let (_dir, engine) = engine_with(SimulatedBackend::with_workload(workload));
    let check = HealthCheckConfig::shell("sleep 2");
    let _ = engine.create(top("web").healthcheck(check)).unwrap();
    engine.start("web").await.unwrap();
    let _ = running(&engine, "other").await;

    let checker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.healthcheck("web").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let limit = Duration::from_millis(500);
    let listed = tokio::time::timeout(limit, engine.list(&ListOptions::default()))
        .await
        .expect("listing blocked by health check")
        .unwrap();
    assert_eq!(listed.len(), 2);
    tokio::time::timeout(limit, engine.stop("web", None))
        .await
        .expect("stop blocked by health check")
        .unwrap();

    let err = checker.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(engine.inspect("web", false).await.unwrap().record.health.is_none());
}

#[tokio::test]
async fn stop_escalates_to_sigkill() {
    let workload = SimulatedWorkload::new().ignoring(Signal::SIGTERM);
    let (_dir, engine) = engine_with(SimulatedBackend::with_workload(workload));
    let _ = running(&engine, "stubborn").await;

    engine
        .stop("stubborn", Some(Duration::from_millis(50)))
        .await
        .unwrap();
    let report = engine.inspect("stubborn", false).await.unwrap();
    assert_eq!(report.record.state, ContainerState::Stopped);
    assert_eq!(report.record.exit_code, 137);
}

#[tokio::test]
async fn top_lists_processes_of_running_containers() {
    let (_dir, engine) = engine();
    let _ = engine.create(top("web")).unwrap();
    let err = engine.top("web", &["pid"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    engine.start("web").await.unwrap();
    let report = engine.top("web", &["pid,bogus", "args"]).await.unwrap();
    assert_eq!(report.titles, vec!["PID", "COMMAND"]);
    assert_eq!(report.processes.len(), 1);
    assert_eq!(report.processes[0][0], "1");
}
