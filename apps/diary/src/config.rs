use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::GatewayOptions;
use serde::Deserialize;
use shared::{
    directory::{ChainDirectory, HARDHAT_CHAIN_ID},
    domain::ChainId,
};

pub const DEFAULT_CONFIG_PATH: &str = "diary.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub gateway_url: String,
    pub chain_id: ChainId,
    pub profiles_dir: Option<PathBuf>,
    pub deployments_path: Option<PathBuf>,
    pub receipt_poll_ms: u64,
    pub receipt_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8545".into(),
            chain_id: HARDHAT_CHAIN_ID,
            profiles_dir: None,
            deployments_path: None,
            receipt_poll_ms: 250,
            receipt_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_ms.max(1)),
            receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
        }
    }

    /// Built-in deployments, overridden by the optional deployments file.
    pub fn chain_directory(&self) -> anyhow::Result<ChainDirectory> {
        let builtin = ChainDirectory::builtin();
        let Some(path) = &self.deployments_path else {
            return Ok(builtin);
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read deployments '{}'", path.display()))?;
        let overrides = ChainDirectory::from_toml(&raw)
            .with_context(|| format!("failed to parse deployments '{}'", path.display()))?;
        Ok(builtin.merged_with(overrides))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    gateway_url: Option<String>,
    chain_id: Option<u64>,
    profiles_dir: Option<PathBuf>,
    deployments_path: Option<PathBuf>,
    receipt_poll_ms: Option<u64>,
    receipt_timeout_secs: Option<u64>,
}

pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    load_settings_from(path, |key| std::env::var(key).ok())
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
        if let Some(v) = file_cfg.gateway_url {
            settings.gateway_url = v;
        }
        if let Some(v) = file_cfg.chain_id {
            settings.chain_id = ChainId(v);
        }
        if let Some(v) = file_cfg.profiles_dir {
            settings.profiles_dir = Some(v);
        }
        if let Some(v) = file_cfg.deployments_path {
            settings.deployments_path = Some(v);
        }
        if let Some(v) = file_cfg.receipt_poll_ms {
            settings.receipt_poll_ms = v;
        }
        if let Some(v) = file_cfg.receipt_timeout_secs {
            settings.receipt_timeout_secs = v;
        }
    }

    if let Some(v) = env("DIARY_GATEWAY_URL") {
        settings.gateway_url = v;
    }
    if let Some(v) = env("APP__GATEWAY_URL") {
        settings.gateway_url = v;
    }
    if let Some(v) = env("APP__CHAIN_ID") {
        let parsed = v
            .parse::<u64>()
            .with_context(|| format!("APP__CHAIN_ID '{v}' is not a chain id"))?;
        settings.chain_id = ChainId(parsed);
    }
    if let Some(v) = env("DIARY_PROFILES_DIR").filter(|v| !v.trim().is_empty()) {
        settings.profiles_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = env("APP__DEPLOYMENTS_PATH") {
        settings.deployments_path = Some(PathBuf::from(v));
    }

    Ok(settings)
}

/// Per-user files: the wallet key and the session database holding the
/// decryption signature cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub root: PathBuf,
    pub wallet_key_path: PathBuf,
    pub db_path: PathBuf,
}

impl Profile {
    pub fn resolve(settings: &Settings, name: &str) -> anyhow::Result<Self> {
        let base = match &settings.profiles_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("unable to resolve local app data dir"))?
                .join("mood_diary")
                .join("profiles"),
        };
        let root = base.join(name);
        Ok(Self {
            wallet_key_path: root.join("wallet.key"),
            db_path: root.join("session.sqlite3"),
            root,
        })
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.to_string_lossy().replace('\\', "/"))
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
