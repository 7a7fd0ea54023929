mod common;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{epoch, FakeClock, FakeRuntime};
use proptest::prelude::*;
use vertica_supervisor::probe::{normalize_docker_timestamp, uptime_from, HealthLogTracker};
use vertica_supervisor::{ContainerObservation, ContainerStatus, HealthState, RuntimeProbe};

#[tokio::test]
async fn test_status_of_absent_container() {
    let runtime = FakeRuntime::absent();
    let probe = RuntimeProbe::new(runtime.clone(), FakeClock::new());
    assert_eq!(probe.status("vertica_ce").await, ContainerObservation::absent());
}

#[tokio::test]
async fn test_status_of_running_container() {
    let runtime = FakeRuntime::running("unhealthy", 42);
    runtime.with(|s| s.restart_count = 3);
    let probe = RuntimeProbe::new(runtime.clone(), FakeClock::new());

    let observation = probe.status("vertica_ce").await;
    assert_eq!(observation.status, ContainerStatus::Running);
    assert_eq!(observation.health, HealthState::Unhealthy);
    assert_eq!(observation.restart_count, Some(3));
    let uptime = observation.uptime_seconds.unwrap();
    assert!((uptime - 42.0).abs() < 1e-6, "uptime {}", uptime);
}

#[tokio::test]
async fn test_health_log_entries_reported_once() {
    let runtime = FakeRuntime::running("starting", 5);
    runtime.with(|s| {
        s.health_log = vec![("first".to_string(), 1), ("second".to_string(), 1)];
    });
    let probe = RuntimeProbe::new(runtime.clone(), FakeClock::new());
    let mut tracker = HealthLogTracker::default();

    let entries = probe.health_log("vertica_ce").await;
    assert_eq!(tracker.new_entries(&entries).len(), 2);
    assert!(tracker.new_entries(&entries).is_empty());

    runtime.with(|s| s.health_log.push(("third".to_string(), 0)));
    let entries = probe.health_log("vertica_ce").await;
    let fresh = tracker.new_entries(&entries);
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].output, "third");
    assert_eq!(fresh[0].exit_code, 0);
}

#[test]
fn test_zero_timestamp_means_not_started() {
    assert_eq!(uptime_from("0001-01-01T00:00:00Z", epoch()), Some(0.0));
    assert_eq!(uptime_from("not a timestamp", epoch()), None);
}

fn offset_strategy() -> impl Strategy<Value = (String, i64)> {
    prop_oneof![
        Just(("".to_string(), 0)),
        Just(("Z".to_string(), 0)),
        (1i64..14, 0i64..60, any::<bool>()).prop_map(|(h, m, negative)| {
            let sign = if negative { '-' } else { '+' };
            let seconds = (h * 3600 + m * 60) * if negative { -1 } else { 1 };
            (format!("{}{:02}:{:02}", sign, h, m), seconds)
        }),
    ]
}

proptest! {
    #[test]
    fn test_normalization_keeps_microseconds_and_offset(
        day in 1u32..=28,
        hour in 0u32..24,
        minute in 0u32..60,
        second in 0u32..60,
        fraction in "[0-9]{0,9}",
        (offset, _) in offset_strategy(),
    ) {
        let base = format!("2024-03-{:02}T{:02}:{:02}:{:02}", day, hour, minute, second);
        let raw = if fraction.is_empty() {
            format!("{}{}", base, offset)
        } else {
            format!("{}.{}{}", base, fraction, offset)
        };

        let normalized = normalize_docker_timestamp(&raw).unwrap();
        let mut micros: String = fraction.chars().take(6).collect();
        while micros.len() < 6 {
            micros.push('0');
        }
        let expected_offset = if offset.is_empty() || offset == "Z" { "+00:00" } else { offset.as_str() };
        prop_assert_eq!(normalized, format!("{}.{}{}", base, micros, expected_offset));
    }

    #[test]
    fn test_uptime_is_clamped_elapsed_time(
        start_offset_micros in -10_000_000_000i64..10_000_000_000i64,
        (offset, offset_seconds) in offset_strategy(),
    ) {
        let now: DateTime<Utc> = epoch();
        let start_utc = now - ChronoDuration::microseconds(start_offset_micros);
        // Render the same instant in the chosen offset.
        let local = start_utc.naive_utc() + ChronoDuration::seconds(offset_seconds);
        let raw = format!("{}{}", local.format("%Y-%m-%dT%H:%M:%S%.6f"), offset);

        let uptime = uptime_from(&raw, now).unwrap();
        let expected = (start_offset_micros as f64 / 1_000_000.0).max(0.0);
        prop_assert!((uptime - expected).abs() < 1e-5, "uptime {} expected {}", uptime, expected);
    }
}
