use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use fhe::SealingKeypair;
use serde::{Deserialize, Serialize};
use shared::{
    domain::Address,
    protocol::{DecryptionAuthorization, HandleContractPair, UserDecryptHttpRequest},
};
use storage::KeyValueStore;
use tracing::{info, warn};

use crate::{error::ClientError, FheClient, WalletSigner};

pub const DEFAULT_DURATION_DAYS: u32 = 365;
const STORAGE_KEY_PREFIX: &str = "fhevm-decryption-signature";

/// Wallet-signed authorization letting the relayer re-encrypt plaintexts
/// to a locally held keypair. Persisted so the wallet is prompted once per
/// validity window.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionSignature {
    pub public_key_b64: String,
    private_key_b64: String,
    pub signature_b64: String,
    pub verifying_key_b64: String,
    pub user_address: Address,
    pub contract_addresses: Vec<Address>,
    pub start_timestamp: i64,
    pub duration_days: u32,
}

impl fmt::Debug for DecryptionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionSignature")
            .field("public_key_b64", &self.public_key_b64)
            .field("user_address", &self.user_address)
            .field("contract_addresses", &self.contract_addresses)
            .field("start_timestamp", &self.start_timestamp)
            .field("duration_days", &self.duration_days)
            .finish_non_exhaustive()
    }
}

impl DecryptionSignature {
    pub fn authorization(&self) -> DecryptionAuthorization {
        DecryptionAuthorization {
            public_key_b64: self.public_key_b64.clone(),
            contract_addresses: self.contract_addresses.clone(),
            user_address: self.user_address,
            start_timestamp: self.start_timestamp,
            duration_days: self.duration_days,
        }
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.authorization().is_valid_at(now)
    }

    pub fn keypair(&self) -> Result<SealingKeypair, ClientError> {
        let secret = STANDARD
            .decode(&self.private_key_b64)
            .map_err(|err| ClientError::Other(format!("invalid decryption key encoding: {err}")))?;
        Ok(SealingKeypair::from_secret_slice(&secret)?)
    }

    pub fn http_request(&self, handles: Vec<HandleContractPair>) -> UserDecryptHttpRequest {
        UserDecryptHttpRequest {
            handles,
            authorization: self.authorization(),
            verifying_key_b64: self.verifying_key_b64.clone(),
            signature_b64: self.signature_b64.clone(),
        }
    }

    pub async fn load_or_sign(
        fhe: &dyn FheClient,
        contracts: &[Address],
        signer: &dyn WalletSigner,
        storage: &dyn KeyValueStore,
    ) -> Result<Option<Self>, ClientError> {
        Self::load_or_sign_at(fhe, contracts, signer, storage, Utc::now().timestamp()).await
    }

    /// Returns a cached signature still valid at `now`, or asks the wallet
    /// for a new one. A wallet rejection is returned as an error; any other
    /// signing failure yields `Ok(None)`.
    pub async fn load_or_sign_at(
        fhe: &dyn FheClient,
        contracts: &[Address],
        signer: &dyn WalletSigner,
        storage: &dyn KeyValueStore,
        now: i64,
    ) -> Result<Option<Self>, ClientError> {
        let user = signer.address();
        let mut contracts = contracts.to_vec();
        contracts.sort();
        contracts.dedup();
        let key = storage_key(user, &contracts);

        match storage.get_item(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Self>(&raw) {
                Ok(cached) if cached.usable_for(user, &contracts, now) => return Ok(Some(cached)),
                Ok(_) | Err(_) => {
                    info!("decrypt: discarding stale decryption signature user={user}");
                    if let Err(err) = storage.remove_item(&key).await {
                        warn!("decrypt: failed to remove stale signature user={user} err={err}");
                    }
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!("decrypt: signature cache unavailable user={user} err={err}");
            }
        }

        let keypair = fhe.generate_keypair();
        let authorization = DecryptionAuthorization {
            public_key_b64: STANDARD.encode(keypair.public_key()),
            contract_addresses: contracts,
            user_address: user,
            start_timestamp: now,
            duration_days: DEFAULT_DURATION_DAYS,
        };
        let signing_bytes = authorization
            .signing_bytes()
            .map_err(|err| ClientError::Other(format!("failed to encode authorization: {err}")))?;

        let signature = match signer.sign_message(&signing_bytes).await {
            Ok(signature) => signature,
            Err(err) if err.is_user_rejection() => return Err(err.into()),
            Err(err) => {
                warn!("decrypt: wallet could not sign decryption authorization user={user} err={err}");
                return Ok(None);
            }
        };

        let signed = Self {
            public_key_b64: authorization.public_key_b64,
            private_key_b64: STANDARD.encode(keypair.secret_bytes().as_slice()),
            signature_b64: STANDARD.encode(signature),
            verifying_key_b64: STANDARD.encode(signer.verifying_key()),
            user_address: user,
            contract_addresses: authorization.contract_addresses,
            start_timestamp: authorization.start_timestamp,
            duration_days: authorization.duration_days,
        };

        match serde_json::to_string(&signed) {
            Ok(raw) => {
                if let Err(err) = storage.set_item(&key, &raw).await {
                    warn!("decrypt: failed to cache decryption signature user={user} err={err}");
                }
            }
            Err(err) => warn!("decrypt: failed to encode decryption signature user={user} err={err}"),
        }
        info!(
            "decrypt: signed new decryption authorization user={} contracts={}",
            user,
            signed.contract_addresses.len()
        );
        Ok(Some(signed))
    }

    fn usable_for(&self, user: Address, contracts: &[Address], now: i64) -> bool {
        self.user_address == user
            && self.contract_addresses == contracts
            && self.is_valid_at(now)
            && self.keypair().is_ok()
    }
}

fn storage_key(user: Address, contracts: &[Address]) -> String {
    let contracts = contracts
        .iter()
        .map(Address::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{STORAGE_KEY_PREFIX}:{user}:{contracts}")
}

#[cfg(test)]
#[path = "tests/signature_tests.rs"]
mod tests;
