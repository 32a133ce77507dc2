#![allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use vault_sort_app::config::{apply_overrides, default_config, load, locate, save};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config_layout() {
    let config = default_config(Path::new("/home/ana"));
    assert_eq!(config.vault.root, Path::new("/home/ana/_Vault"));
    assert_eq!(
        config.intake.roots,
        vec![
            Path::new("/home/ana/Downloads").to_path_buf(),
            Path::new("/home/ana/Desktop").to_path_buf()
        ]
    );
    assert!(!config.dry_run);
    config.validate().unwrap();
}

#[test]
fn test_save_and_load_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested/config.yaml");
    let config = default_config(temp.path());

    save(&config, &path).unwrap();
    let loaded = load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_env_overrides_win() {
    let mut config = default_config(Path::new("/home/ana"));
    apply_overrides(
        &mut config,
        lookup(&[
            ("VAULT_SORT_LLM_URL", "http://10.0.0.2:9000/completion"),
            ("VAULT_SORT_DRY_RUN", "1"),
            ("VAULT_SORT_MAX_STEPS", "25"),
            ("VAULT_SORT_MEM_LIMIT", "4"),
            ("VAULT_SORT_REQUEST_TIMEOUT", "30"),
        ]),
    )
    .unwrap();

    assert_eq!(config.oracle.url, "http://10.0.0.2:9000/completion");
    assert!(config.dry_run);
    assert_eq!(config.limits.max_steps, 25);
    assert_eq!(config.limits.mem_limit, 4);
    assert_eq!(config.oracle.request_timeout_secs, 30);
}

#[test]
fn test_bad_override_is_an_error() {
    let mut config = default_config(Path::new("/home/ana"));
    assert!(apply_overrides(&mut config, lookup(&[("VAULT_SORT_MAX_STEPS", "lots")])).is_err());
    assert!(apply_overrides(&mut config, lookup(&[("VAULT_SORT_DRY_RUN", "maybe")])).is_err());
}

#[test]
fn test_load_missing_file_points_to_init() {
    let temp = TempDir::new().unwrap();
    let err = load(&temp.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{:#}", err).contains("vault-sort init"));
}

#[test]
fn test_load_rejects_invalid_values() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.yaml");
    fs::write(
        &path,
        "vault:\n  root: /srv/vault\nlimits:\n  max_steps: 0\n",
    )
    .unwrap();
    assert!(load(&path).is_err());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.yaml");
    fs::write(&path, "vault:\n  root: /srv/vault\ndry_run: true\n").unwrap();

    let config = load(&path).unwrap();
    assert_eq!(config.vault.root, Path::new("/srv/vault"));
    assert!(config.dry_run);
    assert_eq!(config.limits.max_steps, 500);
    assert_eq!(config.oracle.max_attempts, 3);
}

#[test]
fn test_explicit_path_wins() {
    let path = locate(Some(Path::new("/etc/vault-sort.yaml"))).unwrap();
    assert_eq!(path, Path::new("/etc/vault-sort.yaml"));
}
