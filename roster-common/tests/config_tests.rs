//! Configuration loading and priority order
//!
//! Tests that touch process environment variables are marked #[serial] so
//! they never run in parallel with each other.

use roster_common::cipher::CipherMode;
use roster_common::config::{
    ConfigOverrides, RosterConfig, DEFAULT_PORT, ENV_CONFIG, ENV_DATABASE, ENV_ENCRYPTION_KEY,
    ENV_LEGACY_ENCRYPTION_KEY, ENV_PORT, ENV_REGISTER_TOKEN,
};
use roster_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn clear_env() {
    for name in [
        ENV_CONFIG,
        ENV_PORT,
        ENV_DATABASE,
        ENV_ENCRYPTION_KEY,
        ENV_LEGACY_ENCRYPTION_KEY,
        ENV_REGISTER_TOKEN,
    ] {
        env::remove_var(name);
    }
}

#[test]
fn test_defaults() {
    let config = RosterConfig::default();
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.bind_address, "127.0.0.1");
    assert!(config.require_auth);
    assert!(!config.strict_validation);
    assert_eq!(config.cipher_mode, CipherMode::FixedIv);
    assert_eq!(config.identity.first_column, "Student First");
    assert_eq!(config.identity.last_column, "Student Last");
    assert_eq!(config.logging.level, "info");
    assert!(config.database_path.ends_with("roster.db"));
}

#[test]
fn test_toml_overrides_defaults_partially() {
    let config = RosterConfig::from_toml_str(
        r#"
        port = 6000
        cipher_mode = "random-iv"
        strict_validation = true

        [identity]
        first_column = "First"

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.port, 6000);
    assert_eq!(config.cipher_mode, CipherMode::RandomIv);
    assert!(config.strict_validation);
    assert_eq!(config.identity.first_column, "First");
    assert_eq!(config.identity.last_column, "Student Last");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.bind_address, "127.0.0.1");
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = RosterConfig::from_toml_str("port = \"not a number\"");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = RosterConfig::from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.port, DEFAULT_PORT);
}

#[test]
fn test_cipher_requires_key() {
    let config = RosterConfig::default();
    assert!(matches!(config.cipher(), Err(Error::Config(_))));

    let bad = RosterConfig {
        encryption_key: Some("1234".into()),
        ..RosterConfig::default()
    };
    assert!(matches!(bad.cipher(), Err(Error::Config(_))));

    let good = RosterConfig {
        encryption_key: Some(KEY.into()),
        cipher_mode: CipherMode::RandomIv,
        ..RosterConfig::default()
    };
    assert_eq!(good.cipher().unwrap().mode(), CipherMode::RandomIv);
}

#[test]
#[serial]
fn test_priority_cli_over_env_over_file() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.toml");
    std::fs::write(
        &file,
        format!("port = 6001\ndatabase_path = \"/from/file.db\"\nencryption_key = \"{}\"\n", KEY),
    )
    .unwrap();

    env::set_var(ENV_PORT, "6002");
    env::set_var(ENV_DATABASE, "/from/env.db");

    let overrides = ConfigOverrides {
        config_path: Some(file),
        port: Some(6003),
        ..ConfigOverrides::default()
    };
    let config = RosterConfig::load(&overrides).unwrap();

    assert_eq!(config.port, 6003);
    assert_eq!(config.database_path, PathBuf::from("/from/env.db"));
    assert_eq!(config.encryption_key.as_deref(), Some(KEY));

    clear_env();
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("roster.toml");
    std::fs::write(&file, "register_token = \"from-file\"\n").unwrap();
    env::set_var(ENV_CONFIG, &file);

    let config = RosterConfig::load(&ConfigOverrides::default()).unwrap();
    assert_eq!(config.register_token.as_deref(), Some("from-file"));

    env::set_var(ENV_REGISTER_TOKEN, "from-env");
    let config = RosterConfig::load(&ConfigOverrides::default()).unwrap();
    assert_eq!(config.register_token.as_deref(), Some("from-env"));

    clear_env();
}

#[test]
#[serial]
fn test_legacy_encryption_key_variable() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    env::set_var(ENV_LEGACY_ENCRYPTION_KEY, KEY);

    let overrides = ConfigOverrides {
        config_path: Some(dir.path().join("none.toml")),
        ..ConfigOverrides::default()
    };
    let config = RosterConfig::load(&overrides).unwrap();
    assert!(config.cipher().is_ok());

    clear_env();
}
