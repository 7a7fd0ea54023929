mod common;

use common::{
    exit_output, test_config, write_compose, Call, FakeClock, FakeCredentials, FakeDatabase,
    FakeRuntime, FakeState,
};
use std::time::Duration;
use tempfile::TempDir;
use vertica_supervisor::config::Timings;
use vertica_supervisor::docker::DockerError;
use vertica_supervisor::supervisor::TickOutcome;
use vertica_supervisor::{Error, Supervisor, SupervisorConfig, SupervisorState};

fn supervisor(
    config: SupervisorConfig,
    runtime: &std::sync::Arc<FakeRuntime>,
    clock: &std::sync::Arc<FakeClock>,
) -> Supervisor {
    Supervisor::new(config, runtime.clone(), clock.clone(), FakeCredentials::ok())
}

#[tokio::test]
async fn test_unhealthy_within_grace_issues_no_commands() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 10);
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    for _ in 0..3 {
        let outcome = sup.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Pending(_)));
        clock.advance(Duration::from_secs(1));
    }

    assert!(
        runtime.mutating_calls().is_empty(),
        "unexpected commands: {:?}",
        runtime.mutating_calls()
    );
    assert_eq!(sup.state(), &SupervisorState::RunningUnhealthy);
}

#[tokio::test]
async fn test_healthy_container_is_ready_on_first_tick() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("healthy", 5);
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    let report = sup.ensure_ready().await.unwrap();
    assert_eq!(report.ticks, 1);
    assert_eq!(sup.state(), &SupervisorState::RunningHealthy);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_running_without_health_check_counts_as_ready() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::new(FakeState {
        status: Some("running".to_string()),
        started_at: Some(common::started_before_epoch(3)),
        ..Default::default()
    });
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    assert!(sup.ensure_ready().await.is_ok());
}

#[tokio::test]
async fn test_absent_container_is_brought_up() {
    let data = TempDir::new().unwrap();
    let compose = write_compose(data.path(), "vertica/vertica-ce:24.1.0-0");
    let runtime = FakeRuntime::absent();
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), Some(&compose)), &runtime, &clock);

    sup.tick().await.unwrap();
    assert_eq!(
        runtime.count(|c| *c == Call::ComposeUp { force_recreate: false }),
        1
    );
    assert_eq!(runtime.count(|c| matches!(c, Call::Login { .. })), 0);
}

#[tokio::test]
async fn test_missing_compose_file_is_fatal_after_compose_timeout() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::absent();
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    let err = sup.ensure_ready().await.unwrap_err();
    assert!(matches!(err, Error::Compose(ref msg) if msg.contains("No compose file")));
    assert!(matches!(sup.state(), SupervisorState::Failed(_)));
    assert_eq!(clock.sleeps().iter().sum::<Duration>(), Duration::from_secs(300));
}

#[tokio::test]
async fn test_compose_file_appearing_later_is_used() {
    let data = TempDir::new().unwrap();
    let path = data.path().join("compose.yml");
    let runtime = FakeRuntime::absent();
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), Some(&path)), &runtime, &clock);

    for _ in 0..2 {
        let err = sup.tick().await.unwrap_err();
        assert!(matches!(err, Error::ComposeFailed(ref msg) if msg.contains("not yet available")));
        assert!(!err.is_fatal());
        clock.advance(Duration::from_secs(10));
    }
    assert_eq!(runtime.count(|c| matches!(c, Call::ComposeUp { .. })), 0);

    write_compose(data.path(), "vertica/vertica-ce:latest");
    sup.tick().await.unwrap();
    assert_eq!(
        runtime.count(|c| *c == Call::ComposeUp { force_recreate: false }),
        1
    );
}

#[tokio::test]
async fn test_compose_failure_is_retried_on_next_tick() {
    let data = TempDir::new().unwrap();
    let compose = write_compose(data.path(), "vertica/vertica-ce:latest");
    let runtime = FakeRuntime::absent();
    runtime.with(|s| {
        s.compose_starts_healthy = true;
        s.compose_results.push_back(Err(DockerError::refused(
            "docker compose up -d",
            "net/http: TLS handshake timeout",
            Some(1),
        )));
    });
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), Some(&compose)), &runtime, &clock);

    let report = sup.ensure_ready().await.unwrap();
    assert_eq!(report.ticks, 3);
    assert_eq!(
        runtime.count(|c| *c == Call::ComposeUp { force_recreate: false }),
        2
    );
    assert_eq!(sup.state(), &SupervisorState::RunningHealthy);
}

#[tokio::test]
async fn test_exited_container_is_started_and_dead_is_recreated() {
    let data = TempDir::new().unwrap();
    let compose = write_compose(data.path(), "vertica/vertica-ce:latest");
    let runtime = FakeRuntime::new(FakeState {
        status: Some("exited".to_string()),
        ..Default::default()
    });
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), Some(&compose)), &runtime, &clock);

    sup.tick().await.unwrap();
    assert_eq!(runtime.count(|c| *c == Call::Start), 1);

    runtime.with(|s| s.status = Some("dead".to_string()));
    sup.tick().await.unwrap();
    assert_eq!(
        runtime.count(|c| *c == Call::ComposeUp { force_recreate: true }),
        1
    );
    let rewritten = std::fs::read_to_string(&compose).unwrap();
    assert!(rewritten.contains("VERTICA_ACCEPT_EULA"));
}

#[tokio::test]
async fn test_overall_timeout_is_fatal() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("starting", 0);
    let clock = FakeClock::new();
    let mut config = test_config(data.path(), None);
    config.timings.overall_timeout = Duration::from_secs(30);
    let mut sup = supervisor(config, &runtime, &clock);

    let err = sup.ensure_ready().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(30)));
    assert!(err.to_string().contains("Timed out waiting for container readiness"));
    assert_eq!(clock.sleeps().iter().sum::<Duration>(), Duration::from_secs(30));
}

#[tokio::test]
async fn test_stuck_starting_restarts_once_then_fails() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("starting", 1000);
    let clock = FakeClock::new();
    runtime.with(|s| s.clock = Some(clock.clone()));
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    sup.tick().await.unwrap();
    assert_eq!(runtime.count(|c| *c == Call::Restart), 1);

    // Restart budget spent, fatal threshold not reached yet.
    clock.advance(Duration::from_secs(100));
    sup.tick().await.unwrap();
    assert_eq!(runtime.count(|c| *c == Call::Restart), 1);

    clock.advance(Duration::from_secs(200));
    let err = sup.tick().await.unwrap_err();
    assert!(matches!(err, Error::StuckStarting { elapsed_secs, .. } if elapsed_secs >= 1200.0));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_stuck_starting_fails_within_default_overall_timeout() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("starting", 0);
    let clock = FakeClock::new();
    runtime.with(|s| s.clock = Some(clock.clone()));
    let mut config = test_config(data.path(), None);
    config.timings = Timings::default();
    let mut sup = supervisor(config, &runtime, &clock);

    let err = sup.ensure_ready().await.unwrap_err();
    assert!(matches!(err, Error::StuckStarting { elapsed_secs, .. } if elapsed_secs >= 1200.0));
    assert_eq!(runtime.count(|c| *c == Call::Restart), 1);
    assert_eq!(clock.sleeps().iter().sum::<Duration>(), Duration::from_secs(1200));
}

#[tokio::test]
async fn test_eula_prompt_recreates_only_on_first_observation() {
    let data = TempDir::new().unwrap();
    let compose = write_compose(data.path(), "vertica/vertica-ce:latest");
    let runtime = FakeRuntime::running("unhealthy", 60);
    runtime.with(|s| s.logs = "Output is not a tty --- can't reliably display EULA\n".to_string());
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), Some(&compose)), &runtime, &clock);

    sup.tick().await.unwrap();
    assert_eq!(
        runtime.count(|c| *c == Call::ComposeUp { force_recreate: true }),
        1
    );
    assert_eq!(runtime.execs_containing("write_acceptance"), 1);
    let rewritten = std::fs::read_to_string(&compose).unwrap();
    assert!(rewritten.contains("VERTICA_ACCEPT_EULA"));

    // Past the log cache TTL the prompt is still reported.
    clock.advance(Duration::from_secs(45));
    sup.tick().await.unwrap();
    assert_eq!(
        runtime.count(|c| matches!(c, Call::ComposeUp { .. })),
        1,
        "a repeated prompt must not recreate again"
    );
}

#[tokio::test]
async fn test_missing_database_triggers_creation() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    runtime.with(|s| {
        s.health_log = vec![(
            "vsql: FATAL 4149:  Database VMart is not defined".to_string(),
            1,
        )];
        s.env = vec!["VERTICA_DB_PASSWORD=s3cret".to_string()];
    });
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    sup.tick().await.unwrap();
    let create = runtime
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Exec { user, command, env } if command.iter().any(|a| a.contains("create_db")) => {
                Some((user, command, env))
            }
            _ => None,
        })
        .expect("create_db was not invoked");
    assert_eq!(create.0.as_deref(), Some("dbadmin"));
    assert!(create.1.iter().any(|a| a == "127.0.0.1"));
    assert!(create.1.iter().all(|a| !a.contains("s3cret")));
    assert!(create.2.contains(&("VSUP_DB_PASSWORD".to_string(), "s3cret".to_string())));
}

#[tokio::test]
async fn test_database_creation_falls_back_to_root() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    runtime.with(|s| {
        s.logs = "Database VMart is not defined".to_string();
        s.exec_responses = vec![("create_db".to_string(), exit_output(1, "permission denied"))];
    });
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    sup.tick().await.unwrap();
    let users: Vec<Option<String>> = runtime
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Exec { user, command, .. } if command.iter().any(|a| a.contains("create_db")) => {
                Some(user)
            }
            _ => None,
        })
        .collect();
    assert_eq!(users, vec![Some("dbadmin".to_string()), Some("0".to_string())]);
    assert!(matches!(sup.state(), SupervisorState::RunningUnhealthy));
}

#[tokio::test]
async fn test_eula_prompt_without_compose_file_skips_recreate() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    runtime.with(|s| s.logs = "Output is not a tty --- can't reliably display EULA\n".to_string());
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    assert!(sup.tick().await.is_ok());
    assert_eq!(runtime.execs_containing("write_acceptance"), 1);
    assert_eq!(runtime.count(|c| matches!(c, Call::ComposeUp { .. })), 0);
    assert_eq!(sup.state(), &SupervisorState::RunningUnhealthy);
}

#[tokio::test]
async fn test_unreadable_container_config_is_repaired_once() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    runtime.with(|s| s.exec_responses = vec![("test -r".to_string(), exit_output(1, ""))]);
    let clock = FakeClock::new();
    let mut sup = supervisor(test_config(data.path(), None), &runtime, &clock);

    sup.tick().await.unwrap();
    let as_root = |needle: &'static str| {
        move |c: &Call| {
            matches!(c, Call::Exec { user, command, .. }
                if user.as_deref() == Some("0") && command.join(" ").starts_with(needle))
        }
    };
    assert_eq!(runtime.count(as_root("chmod a+r /opt/vertica/config/admintools.conf")), 1);
    assert_eq!(runtime.count(|c| *c == Call::Restart), 0);

    clock.advance(Duration::from_secs(10));
    sup.tick().await.unwrap();
    assert_eq!(runtime.count(as_root("chmod a+r /opt/vertica/config/admintools.conf")), 1);
}

#[tokio::test]
async fn test_direct_connection_overrides_failing_health_check() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    let clock = FakeClock::new();
    let db = FakeDatabase::new();
    let mut sup =
        supervisor(test_config(data.path(), None), &runtime, &clock).with_database_client(db.clone());

    let report = sup.ensure_ready().await.unwrap();
    assert_eq!(report.ticks, 1);
    assert_eq!(db.connects(), 1);
    assert_eq!(runtime.count(|c| *c == Call::Restart), 0);
    assert_eq!(sup.state(), &SupervisorState::RunningHealthy);
}

#[tokio::test]
async fn test_direct_connection_attempts_are_spaced() {
    let data = TempDir::new().unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    let clock = FakeClock::new();
    let db = FakeDatabase::unreachable("Connection refused");
    let mut sup =
        supervisor(test_config(data.path(), None), &runtime, &clock).with_database_client(db.clone());

    sup.tick().await.unwrap();
    assert_eq!(db.connects(), 1);
    assert_eq!(runtime.count(|c| *c == Call::Restart), 1);

    clock.advance(Duration::from_secs(10));
    sup.tick().await.unwrap();
    assert_eq!(db.connects(), 1);

    clock.advance(Duration::from_secs(60));
    sup.tick().await.unwrap();
    assert_eq!(db.connects(), 2);
}

#[tokio::test]
async fn test_unhealthy_escalates_to_data_reset_then_fails() {
    let data = TempDir::new().unwrap();
    let compose = write_compose(data.path(), "vertica/vertica-ce:latest");
    std::fs::create_dir(data.path().join("VMart")).unwrap();
    let runtime = FakeRuntime::running("unhealthy", 60);
    let clock = FakeClock::new();
    let mut config = test_config(data.path(), Some(&compose));
    config.timings.restart_throttle = Duration::ZERO;
    config.timings.max_unhealthy_restarts = 1;
    config.timings.max_recreates = 1;
    let mut sup = supervisor(config, &runtime, &clock);

    let err = sup.ensure_ready().await.unwrap_err();
    assert!(matches!(
        err,
        Error::RemainedUnhealthy { restarts: 4, recreates: 3, .. }
    ));
    assert!(err.is_fatal());
    // restart, recreate, restart, reset + recreate, then the same once more
    assert_eq!(runtime.count(|c| *c == Call::Restart), 4);
    assert_eq!(
        runtime.count(|c| *c == Call::ComposeUp { force_recreate: true }),
        3
    );
    assert!(!data.path().join("VMart").exists());
    assert!(matches!(sup.state(), SupervisorState::Failed(_)));
}
