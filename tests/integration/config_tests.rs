use clap::Parser;
use dupetriage::actions::RetryPolicy;
use dupetriage::cli::Cli;
use dupetriage::config::{ConfigError, RunConfig, Settings};
use dupetriage::duplicates::DetectionMode;
use dupetriage::error::ExitCode;
use figment::providers::Serialized;
use figment::Figment;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_settings_defaults() {
    // Figment without the environment layer so other tests cannot interfere
    let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
        .extract()
        .unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.port, 5173);
    assert_eq!(settings.retry_policy(), RetryPolicy::default());
}

#[test]
fn test_settings_from_env() {
    std::env::set_var("DUPETRIAGE_DELETE_RETRIES", "3");
    std::env::set_var("DUPETRIAGE_RETRY_DELAY_MS", "20");

    let settings: Settings = Settings::figment(None).extract().unwrap();

    assert_eq!(settings.delete_retries, 3);
    assert_eq!(
        settings.retry_policy(),
        RetryPolicy::new(3, Duration::from_millis(20))
    );

    // Clean up
    std::env::remove_var("DUPETRIAGE_DELETE_RETRIES");
    std::env::remove_var("DUPETRIAGE_RETRY_DELAY_MS");
}

#[test]
fn test_settings_load_explicit_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
host = "0.0.0.0"
port = 8080
poll_interval_ms = 250
io_threads = 2
"#,
    )
    .unwrap();

    let settings = Settings::load(Some(&path)).unwrap();
    assert_eq!(settings.host, "0.0.0.0");
    assert_eq!(settings.port, 8080);
    assert_eq!(settings.poll_interval(), Duration::from_millis(250));
    assert_eq!(settings.io_threads, 2);
}

#[test]
fn test_cli_flags_override_settings() {
    let dir = tempdir().unwrap();
    let settings = Settings {
        host: "0.0.0.0".into(),
        port: 8080,
        io_threads: 2,
        ..Settings::default()
    };
    let cli = Cli::try_parse_from([
        "dupetriage",
        dir.path().to_str().unwrap(),
        "--port",
        "9999",
        "--io-threads",
        "6",
        "--mode",
        "ahash",
        "--threshold",
        "12",
    ])
    .unwrap();

    let config = RunConfig::from_cli(&cli, &settings).unwrap();
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 9999);
    assert_eq!(config.io_threads, 6);
    assert_eq!(config.mode, Some(DetectionMode::Ahash));
    assert_eq!(config.threshold, 12);
}

#[test]
fn test_invalid_values_map_to_config_exit_code() {
    let dir = tempdir().unwrap();
    let root = dir.path().to_str().unwrap();
    let missing = dir.path().join("missing");
    let canonical = dir.path().canonicalize().unwrap();
    let file = dir.path().join("file.jpg");
    fs::write(&file, b"x").unwrap();

    let cases: Vec<Vec<&str>> = vec![
        vec![root, "--threshold", "65"],
        vec![missing.to_str().unwrap()],
        vec![file.to_str().unwrap()],
        vec![root, "--decision-folder", canonical.to_str().unwrap()],
        vec![root, "--io-threads", "0"],
    ];
    for extra in cases {
        let mut args = vec!["dupetriage"];
        args.extend(extra.iter().copied());
        let cli = Cli::try_parse_from(&args).unwrap();
        let err = RunConfig::from_cli(&cli, &Settings::default()).unwrap_err();
        let err = anyhow::Error::from(err);
        assert_eq!(ExitCode::for_error(&err), ExitCode::InvalidConfig, "{args:?}");
    }
}

#[test]
fn test_missing_settings_file_is_config_error() {
    let dir = tempdir().unwrap();
    let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::SettingsFileNotFound(_)));
    assert_eq!(
        ExitCode::for_error(&anyhow::Error::from(err)),
        ExitCode::InvalidConfig
    );
}
