use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Address, ChainId, Handle, TxHash};

const TRANSACTION_SIGNING_DOMAIN: &[u8] = b"mood-diary/transaction/v1\n";
const DECRYPTION_SIGNING_DOMAIN: &[u8] = b"mood-diary/user-decrypt/v1\n";
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub address: Address,
    pub chain_id: ChainId,
    pub chain_name: String,
    pub deployed_at_block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkKeyResponse {
    pub chain_id: ChainId,
    pub public_key_b64: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntryCountResponse {
    pub entry_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HandleResponse {
    pub handle: Handle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanDecryptResponse {
    pub can_decrypt: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallerQuery {
    pub caller: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ContractCall {
    SubmitMood {
        handle: Handle,
        input_proof_b64: String,
    },
    RequestTrendHandle,
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::SubmitMood { .. } => "submitMood",
            ContractCall::RequestTrendHandle => "requestTrendHandle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub chain_id: ChainId,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub call: ContractCall,
}

impl UnsignedTransaction {
    /// Bytes covered by the sender's wallet signature.
    pub fn signing_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = TRANSACTION_SIGNING_DOMAIN.to_vec();
        bytes.extend(serde_json::to_vec(self)?);
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    pub verifying_key_b64: String,
    pub signature_b64: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubmitTransactionResponse {
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Mined,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    pub mined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleContractPair {
    pub handle: Handle,
    pub contract_address: Address,
}

/// Time-bounded grant a wallet signs so the relayer may re-encrypt
/// plaintexts to `public_key_b64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionAuthorization {
    pub public_key_b64: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: i64,
    pub duration_days: u32,
}

impl DecryptionAuthorization {
    pub fn signing_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = DECRYPTION_SIGNING_DOMAIN.to_vec();
        bytes.extend(serde_json::to_vec(self)?);
        Ok(bytes)
    }

    pub fn expires_at(&self) -> i64 {
        self.start_timestamp
            .saturating_add(i64::from(self.duration_days).saturating_mul(SECONDS_PER_DAY))
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        now >= self.start_timestamp && now < self.expires_at()
    }

    pub fn covers(&self, contract: &Address) -> bool {
        self.contract_addresses.contains(contract)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDecryptHttpRequest {
    pub handles: Vec<HandleContractPair>,
    pub authorization: DecryptionAuthorization,
    pub verifying_key_b64: String,
    pub signature_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPlaintext {
    pub handle: Handle,
    pub ephemeral_public_key_b64: String,
    pub nonce_b64: String,
    pub ciphertext_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDecryptHttpResponse {
    pub results: Vec<SealedPlaintext>,
}
