//! Client side of the mood diary: the session controller and the seams it
//! drives (wallet, diary contract, FHE relayer, signature cache storage).

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use fhe::{ClearValue, SealingKeypair};
use shared::{
    domain::{Address, Handle, TxHash},
    protocol::TxReceipt,
};

pub mod controller;
pub mod error;
pub mod fhe_client;
pub mod gateway;
pub mod signature;
pub mod types;
pub mod wallet;

pub use controller::{
    ClearTrend, DiaryController, OperationStatus, SessionCollaborators, SessionState,
    TrendValueError,
};
pub use error::{classify, is_user_rejection, user_message, ClientError, WalletError};
pub use fhe_client::HttpFheClient;
pub use gateway::{GatewayOptions, HttpGateway};
pub use signature::DecryptionSignature;
pub use types::{EncryptedInput, EncryptedPayload, UserDecryptRequest};
pub use wallet::LocalSigner;

/// A wallet able to sign on behalf of the connected account.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> Address;
    fn verifying_key(&self) -> [u8; 32];
    /// Rejections are reported as `WalletError::Rejected { code: 4001 }`.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError>;
}

/// A sent transaction that has not been mined yet.
#[async_trait]
pub trait PendingTransaction: Send {
    fn hash(&self) -> TxHash;
    async fn wait(self: Box<Self>) -> Result<TxReceipt, ClientError>;
}

/// Proxy for one deployed diary contract.
#[async_trait]
pub trait DiaryContract: Send + Sync {
    fn address(&self) -> Address;
    async fn entry_count(&self) -> Result<u64, ClientError>;
    async fn encrypted_trend(&self) -> Result<Handle, ClientError>;
    /// Reverts unless `caller` was granted access to the current trend.
    async fn my_trend_handle(&self, caller: Address) -> Result<Handle, ClientError>;
    async fn submit_mood(
        &self,
        signer: &dyn WalletSigner,
        handle: Handle,
        input_proof: &[u8],
    ) -> Result<Box<dyn PendingTransaction>, ClientError>;
    async fn request_trend_handle(
        &self,
        signer: &dyn WalletSigner,
    ) -> Result<Box<dyn PendingTransaction>, ClientError>;
}

pub trait DiaryProvider: Send + Sync {
    fn contract(&self, address: Address) -> Arc<dyn DiaryContract>;
}

#[async_trait]
pub trait FheClient: Send + Sync {
    fn create_encrypted_input(&self, contract: Address, user: Address) -> EncryptedInput {
        EncryptedInput::new(contract, user)
    }
    async fn encrypt(&self, input: &EncryptedInput) -> Result<EncryptedPayload, ClientError>;
    fn generate_keypair(&self) -> SealingKeypair;
    async fn user_decrypt(
        &self,
        request: &UserDecryptRequest,
    ) -> Result<HashMap<Handle, ClearValue>, ClientError>;
}

#[cfg(test)]
#[path = "tests/mocks.rs"]
mod mocks;
