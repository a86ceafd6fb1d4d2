use super::*;

use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:data/test.db"),
        "sqlite://data/test.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}

#[test]
fn prepared_database_url_creates_parent_dir() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.path().join("data").exists());
}

#[test]
fn missing_file_yields_defaults() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let settings =
        load_settings_from(&temp_root.path().join("absent.toml"), env_from(&[])).expect("load");
    assert_eq!(settings, Settings::default());
}

#[test]
fn file_values_are_overridden_by_environment() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("diary-node.toml");
    fs::write(
        &path,
        r#"
        bind_addr = "0.0.0.0:9000"
        chain_id = 11155111
        chain_name = "sepolia"
        diary_address = "0x1111111111111111111111111111111111111111"
        "#,
    )
    .expect("write config");

    let settings = load_settings_from(
        &path,
        env_from(&[("APP__BIND_ADDR", "127.0.0.1:7000"), ("DATABASE_URL", "sqlite::memory:")]),
    )
    .expect("load");

    assert_eq!(settings.bind_addr, "127.0.0.1:7000");
    assert_eq!(settings.database_url, "sqlite::memory:");
    assert_eq!(settings.chain_id, ChainId(11_155_111));
    assert_eq!(settings.chain_name, "sepolia");
    assert_eq!(settings.diary_address, Address([0x11; 20]));
}

#[test]
fn malformed_environment_override_is_an_error() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let result = load_settings_from(
        &temp_root.path().join("absent.toml"),
        env_from(&[("APP__DIARY_ADDRESS", "not-an-address")]),
    );
    assert!(result.is_err());
}

#[test]
fn network_key_is_created_once_and_reloaded() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("keys").join("network.key");

    let created = load_or_create_network_key(&path).expect("create");
    let reloaded = load_or_create_network_key(&path).expect("reload");
    assert_eq!(created.public_key(), reloaded.public_key());
}
