use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use vertica_supervisor::config::Parser;
use vertica_supervisor::sanitizer::Identity;
use vertica_supervisor::Error;

#[test]
fn test_load_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vsup.yaml");
    fs::write(
        &path,
        r#"
container: vertica_dev
database: analytics
port: 15433
public_host: vertica.example.com
tls_mode: require
compose_files: [/srv/compose.yml]
data_roots: [/srv/vertica]
fallback_identity: "1000:1000"
credentials:
  bootstrap_user: dbadmin
  admin_user: app_admin
timings:
  unhealthy_grace: 5m
  poll_interval: 2s
  max_stuck_restarts: 3
"#,
    )
    .unwrap();

    let config = Parser::new().load_config(&path).unwrap();
    assert_eq!(config.container, "vertica_dev");
    assert_eq!(config.database, "analytics");
    assert_eq!(config.port, 15433);
    assert_eq!(config.public_host.as_deref(), Some("vertica.example.com"));
    assert_eq!(config.compose_files, vec![PathBuf::from("/srv/compose.yml")]);
    assert_eq!(config.fallback_identity, Identity::new(1000, 1000));
    assert_eq!(config.credentials.admin_user.as_deref(), Some("app_admin"));
    assert_eq!(config.timings.unhealthy_grace, Duration::from_secs(300));
    assert_eq!(config.timings.poll_interval, Duration::from_secs(2));
    assert_eq!(config.timings.max_stuck_restarts, 3);
    // Untouched timings keep their defaults.
    assert_eq!(config.timings.stuck_fatal_threshold, Duration::from_secs(1200));
}

#[test]
fn test_invalid_yaml_is_reported() {
    let err = Parser::new().parse_config("timings: [not, a, map]").unwrap_err();
    assert!(matches!(err, Error::Yaml(_)), "unexpected error: {:?}", err);
}

#[test]
fn test_env_overrides_file_values() {
    let mut config = Parser::new()
        .parse_config("host: db.internal\ncredentials:\n  bootstrap_password: from-file\n")
        .unwrap();
    config
        .apply_env_from(|key| match key {
            "VERTICA_HOST" => Some("10.0.0.5".to_string()),
            "DBADMIN_PASSWORD" => Some(String::new()),
            "VERTICA_DB_NAME" => Some("VMart2".to_string()),
            _ => None,
        })
        .unwrap();

    assert_eq!(config.host, "10.0.0.5");
    assert_eq!(config.database, "VMart2");
    assert_eq!(config.credentials.bootstrap_password.as_deref(), Some(""));
}

#[test]
fn test_compose_file_is_first_existing_candidate() {
    let dir = TempDir::new().unwrap();
    let second = dir.path().join("compose.yaml");
    fs::write(&second, "services: {}\n").unwrap();

    let mut config = Parser::new().parse_config("").unwrap();
    config.compose_files = vec![dir.path().join("compose.remote.yml"), second.clone()];
    assert_eq!(config.compose_file(), Some(second));

    config.compose_files.clear();
    assert_eq!(config.compose_file(), None);
}
