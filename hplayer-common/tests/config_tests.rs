//! Integration tests for config file resolution and loading
//!
//! Tests that manipulate HPLAYER_CONFIG are marked with #[serial] so they do
//! not race each other on the process environment.

use hplayer_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use hplayer_common::{Error, PlayerConfig};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    let dir = TempDir::new().unwrap();
    let cli_path = dir.path().join("cli.toml");
    env::set_var(CONFIG_ENV_VAR, dir.path().join("env.toml"));

    let resolved = resolve_config_path(Some(&cli_path));
    assert_eq!(resolved, Some(cli_path));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_variable_used_without_cli_argument() {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join("env.toml");
    env::set_var(CONFIG_ENV_VAR, &env_path);

    assert_eq!(resolve_config_path(None), Some(env_path));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config = PlayerConfig::resolve(Some(&missing)).unwrap();
    assert_eq!(config, PlayerConfig::default());
}

#[test]
#[serial]
fn test_existing_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
is_loop_play = true
is_auto_play = true
max_buffer_duration = 10.0
preferred_audio_language = "eng"

[logging]
level = "trace"
"#,
    )
    .unwrap();

    let config = PlayerConfig::resolve(Some(&path)).unwrap();
    assert!(config.is_loop_play);
    assert!(config.is_auto_play);
    assert_eq!(config.max_buffer_duration, 10.0);
    assert_eq!(config.preferred_audio_language.as_deref(), Some("eng"));
    assert_eq!(config.logging.level, "trace");
    // Untouched fields keep their defaults
    assert_eq!(config.video_frame_max_count, 8);
}

#[test]
#[serial]
fn test_invalid_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "output_channels = 0\n").unwrap();

    let result = PlayerConfig::resolve(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}
