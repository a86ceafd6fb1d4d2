use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use shared::domain::Address;
use zeroize::{Zeroize, Zeroizing};

use crate::FheError;

pub const SECRET_KEY_LEN: usize = 32;
const ADDRESS_DOMAIN: &[u8] = b"mood-diary/address/v1";

/// Local ed25519 account. The address is the last 20 bytes of a domain
/// separated SHA-256 over the verifying key.
#[derive(Clone)]
pub struct LocalWallet {
    signing_key: SigningKey,
    address: Address,
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret_slice(bytes: &[u8]) -> Result<Self, FheError> {
        let mut raw: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|_| {
            FheError::InvalidKey(format!(
                "expected {SECRET_KEY_LEN}-byte wallet key, got {}",
                bytes.len()
            ))
        })?;
        let wallet = Self::from_signing_key(SigningKey::from_bytes(&raw));
        raw.zeroize();
        Ok(wallet)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_from_verifying_key(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn verifying_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

pub fn address_from_verifying_key(verifying_key: &[u8; 32]) -> Address {
    let digest = Sha256::new()
        .chain_update(ADDRESS_DOMAIN)
        .chain_update(verifying_key)
        .finalize();
    let mut address = [0u8; Address::LEN];
    address.copy_from_slice(&digest[digest.len() - Address::LEN..]);
    Address(address)
}

/// Checks that `signature` over `message` was produced by the key behind
/// `claimed`.
pub fn verify_wallet_signature(
    claimed: Address,
    verifying_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), FheError> {
    let key_bytes: [u8; 32] = verifying_key
        .try_into()
        .map_err(|_| FheError::InvalidKey("verifying key must be 32 bytes".to_string()))?;
    let actual = address_from_verifying_key(&key_bytes);
    if actual != claimed {
        return Err(FheError::SignerMismatch { claimed, actual });
    }

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|err| FheError::InvalidKey(err.to_string()))?;
    let signature = Signature::from_slice(signature).map_err(|_| FheError::BadSignature)?;
    key.verify(message, &signature)
        .map_err(|_| FheError::BadSignature)
}
