use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use fhe::SealingKeypair;
use serde::Deserialize;
use shared::{
    directory::{DEV_DIARY_ADDRESS, HARDHAT_CHAIN_ID},
    domain::{Address, ChainId},
};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "diary-node.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub chain_id: ChainId,
    pub chain_name: String,
    pub diary_address: Address,
    pub network_key_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8545".into(),
            database_url: "sqlite://./data/diary-node.db".into(),
            chain_id: HARDHAT_CHAIN_ID,
            chain_name: "hardhat".into(),
            diary_address: DEV_DIARY_ADDRESS,
            network_key_path: PathBuf::from("./data/network.key"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    chain_id: Option<u64>,
    chain_name: Option<String>,
    diary_address: Option<Address>,
    network_key_path: Option<PathBuf>,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_PATH), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file at `path` if present, then environment
/// overrides looked up through `env`.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        if let Some(v) = file_cfg.bind_addr {
            settings.bind_addr = v;
        }
        if let Some(v) = file_cfg.database_url {
            settings.database_url = v;
        }
        if let Some(v) = file_cfg.chain_id {
            settings.chain_id = ChainId(v);
        }
        if let Some(v) = file_cfg.chain_name {
            settings.chain_name = v;
        }
        if let Some(v) = file_cfg.diary_address {
            settings.diary_address = v;
        }
        if let Some(v) = file_cfg.network_key_path {
            settings.network_key_path = v;
        }
    }

    if let Some(v) = env("DIARY_NODE_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__CHAIN_ID") {
        let parsed = v
            .parse::<u64>()
            .with_context(|| format!("APP__CHAIN_ID '{v}' is not a chain id"))?;
        settings.chain_id = ChainId(parsed);
    }
    if let Some(v) = env("APP__CHAIN_NAME") {
        settings.chain_name = v;
    }
    if let Some(v) = env("APP__DIARY_ADDRESS") {
        settings.diary_address = v
            .parse()
            .with_context(|| format!("APP__DIARY_ADDRESS '{v}' is not an address"))?;
    }
    if let Some(v) = env("APP__NETWORK_KEY_PATH") {
        settings.network_key_path = PathBuf::from(v);
    }

    Ok(settings)
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    if let Some(path) = sqlite_path(&database_url) {
        ensure_parent_dir_exists(&path)?;
    }
    Ok(database_url)
}

/// Reads the node's network sealing key, generating and persisting one on
/// first start. The file holds the hex-encoded secret.
pub fn load_or_create_network_key(path: &Path) -> anyhow::Result<SealingKeypair> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read network key '{}'", path.display()))?;
        let bytes = hex::decode(raw.trim())
            .with_context(|| format!("network key '{}' is not hex", path.display()))?;
        return SealingKeypair::from_secret_slice(&bytes)
            .with_context(|| format!("network key '{}' is invalid", path.display()));
    }

    ensure_parent_dir_exists(path)?;
    let keypair = SealingKeypair::generate();
    fs::write(path, hex::encode(keypair.secret_bytes().as_slice()))
        .with_context(|| format!("failed to write network key '{}'", path.display()))?;
    info!("node: generated network key path={}", path.display());
    Ok(keypair)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(path: &Path) -> anyhow::Result<()> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for '{}'",
            parent.display(),
            path.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
