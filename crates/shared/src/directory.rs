use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Address, ChainId};

pub const HARDHAT_CHAIN_ID: ChainId = ChainId(31_337);
pub const SEPOLIA_CHAIN_ID: ChainId = ChainId(11_155_111);

/// First contract address a fresh local node hands out (`0x5FbD...0aa3`).
pub const DEV_DIARY_ADDRESS: Address = Address([
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67, 0xf0, 0x32, 0xd9, 0x3f, 0x64, 0x2f,
    0x64, 0x18, 0x0a, 0xa3,
]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub address: Address,
    pub chain_id: ChainId,
    pub chain_name: String,
}

/// The diary instance a session should target. `address` is `None` when the
/// contract is not deployed on the selected chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiaryDeployment {
    pub address: Option<Address>,
    pub chain_id: Option<ChainId>,
    pub chain_name: Option<String>,
}

impl DiaryDeployment {
    pub fn is_deployed(&self) -> bool {
        self.address.is_some_and(|address| !address.is_zero())
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    deployments: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ChainDirectory {
    entries: BTreeMap<ChainId, DirectoryEntry>,
}

impl ChainDirectory {
    pub fn builtin() -> Self {
        Self::default()
            .with_entry(DirectoryEntry {
                address: DEV_DIARY_ADDRESS,
                chain_id: HARDHAT_CHAIN_ID,
                chain_name: "hardhat".to_string(),
            })
            .with_entry(DirectoryEntry {
                address: Address::ZERO,
                chain_id: SEPOLIA_CHAIN_ID,
                chain_name: "sepolia".to_string(),
            })
    }

    /// Parses a deployments file:
    ///
    /// ```toml
    /// [[deployments]]
    /// chain_id = 31337
    /// address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
    /// chain_name = "hardhat"
    /// ```
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        let file: DirectoryFile = toml::from_str(raw)?;
        Ok(file
            .deployments
            .into_iter()
            .fold(Self::default(), Self::with_entry))
    }

    pub fn with_entry(mut self, entry: DirectoryEntry) -> Self {
        self.entries.insert(entry.chain_id, entry);
        self
    }

    /// Entries from `other` replace entries for the same chain.
    pub fn merged_with(self, other: ChainDirectory) -> Self {
        other.entries.into_values().fold(self, Self::with_entry)
    }

    pub fn entry(&self, chain_id: ChainId) -> Option<&DirectoryEntry> {
        self.entries.get(&chain_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    pub fn resolve(&self, chain_id: Option<ChainId>) -> DiaryDeployment {
        let Some(chain_id) = chain_id else {
            return DiaryDeployment::default();
        };

        match self.entries.get(&chain_id) {
            Some(entry) if !entry.address.is_zero() => DiaryDeployment {
                address: Some(entry.address),
                chain_id: Some(entry.chain_id),
                chain_name: Some(entry.chain_name.clone()),
            },
            _ => DiaryDeployment {
                address: None,
                chain_id: Some(chain_id),
                chain_name: None,
            },
        }
    }
}
