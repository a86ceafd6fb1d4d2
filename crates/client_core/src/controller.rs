//! Session controller for one wallet on one chain: reads the diary stats,
//! submits encrypted moods, requests trend access and decrypts the average.
//!
//! Operations take `&mut SessionState` and never return errors; every
//! outcome ends up in `SessionState::message` and the operation's status.

use std::sync::Arc;

use fhe::{ClearValue, FheError};
use shared::{
    directory::{ChainDirectory, DiaryDeployment},
    domain::{Address, ChainId, Handle, MoodScore},
    protocol::{HandleContractPair, TxReceipt, TxStatus},
};
use storage::KeyValueStore;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    error::{is_user_rejection, user_message, ClientError},
    signature::DecryptionSignature,
    types::UserDecryptRequest,
    DiaryContract, DiaryProvider, FheClient, PendingTransaction, WalletSigner,
};

const MSG_CONNECT_TO_SUBMIT: &str = "Connect a wallet to submit a mood score.";
const MSG_CONNECT_TO_REQUEST: &str = "Connect a wallet to request access.";
const MSG_NOTHING_TO_DECRYPT: &str = "Nothing to decrypt yet.";
const MSG_REFRESH_FAILED: &str = "Unable to refresh diary state.";
const MSG_SUBMIT_SENT: &str = "Encrypting and storing your mood...";
const MSG_SUBMIT_MINED: &str = "Mood encrypted and stored privately.";
const MSG_SUBMIT_REJECTED: &str = "Transaction was rejected by your wallet.";
const MSG_REQUEST_SENT: &str = "Requesting encrypted trend handle...";
const MSG_REQUEST_MINED: &str = "Trend handle shared with your wallet.";
const MSG_REQUEST_REJECTED: &str = "Wallet cancelled trend access authorization.";
const MSG_DECRYPT_UNAUTHORIZED: &str = "Unable to authorize FHE decryption.";
const MSG_DECRYPT_DONE: &str = "Average decrypted locally.";
const MSG_DECRYPT_REJECTED: &str = "Wallet cancelled decryption signature. Please try again.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperationStatus {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn is_running(self) -> bool {
        self == OperationStatus::Running
    }

    fn settled<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Failed
        }
    }
}

/// A decrypted average, trusted only while `handle` is still the caller's
/// authorized trend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearTrend {
    pub handle: Handle,
    pub value: MoodScore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub entry_count: u64,
    pub network_trend_handle: Option<Handle>,
    pub my_trend_handle: Option<Handle>,
    pub clear_trend: Option<ClearTrend>,
    pub message: String,
    pub refresh: OperationStatus,
    pub submit: OperationStatus,
    pub request_access: OperationStatus,
    pub decrypt: OperationStatus,
}

impl SessionState {
    fn reset_chain_data(&mut self) {
        self.clear_trend = None;
        self.my_trend_handle = None;
        self.network_trend_handle = None;
        self.entry_count = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrendValueError {
    #[error("Decryption returned unexpected boolean value.")]
    UnexpectedBoolean,
    #[error("Decryption returned invalid mood score value.")]
    InvalidScore,
}

/// Accepts only integer plaintexts in the mood score range. A missing value
/// counts as invalid.
pub fn validate_trend_value(value: Option<&ClearValue>) -> Result<MoodScore, TrendValueError> {
    match value {
        Some(ClearValue::Bool(_)) => Err(TrendValueError::UnexpectedBoolean),
        Some(value) => value
            .as_u128()
            .and_then(|raw| u8::try_from(raw).ok())
            .and_then(|raw| MoodScore::new(raw).ok())
            .ok_or(TrendValueError::InvalidScore),
        None => Err(TrendValueError::InvalidScore),
    }
}

/// Everything a session talks to. Any collaborator may be missing while the
/// wallet or the FHE client is still connecting.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub provider: Option<Arc<dyn DiaryProvider>>,
    pub signer: Option<Arc<dyn WalletSigner>>,
    pub fhe: Option<Arc<dyn FheClient>>,
    pub storage: Arc<dyn KeyValueStore>,
    pub wallet_address: Option<Address>,
}

struct TxContext {
    contract: Arc<dyn DiaryContract>,
    signer: Arc<dyn WalletSigner>,
    fhe: Arc<dyn FheClient>,
    wallet: Address,
}

enum DecryptOutcome {
    Decrypted(MoodScore),
    Unauthorized,
    Rejected(TrendValueError),
}

pub struct DiaryController {
    collaborators: SessionCollaborators,
    directory: ChainDirectory,
    deployment: DiaryDeployment,
    contract: Option<Arc<dyn DiaryContract>>,
}

impl DiaryController {
    pub fn new(
        collaborators: SessionCollaborators,
        directory: ChainDirectory,
        chain_id: Option<ChainId>,
    ) -> Self {
        let deployment = directory.resolve(chain_id);
        let contract = build_contract(&collaborators, &deployment);
        Self {
            collaborators,
            directory,
            deployment,
            contract,
        }
    }

    pub fn deployment(&self) -> &DiaryDeployment {
        &self.deployment
    }

    pub fn contract_address(&self) -> Option<Address> {
        self.deployment.address
    }

    /// True while no diary is deployed on the selected chain.
    pub fn is_deploying(&self) -> bool {
        !self.deployment.is_deployed()
    }

    pub fn is_ready_for_tx(&self) -> bool {
        self.collaborators.fhe.is_some()
            && self.deployment.is_deployed()
            && self.collaborators.signer.is_some()
            && self.collaborators.wallet_address.is_some()
    }

    pub fn can_decrypt(&self, state: &SessionState) -> bool {
        state.my_trend_handle.is_some_and(|handle| !handle.is_zero())
            && !state.decrypt.is_running()
    }

    /// Points the session at the diary deployed on `chain_id`. Cached chain
    /// data is cleared before the first read against the new contract.
    pub async fn change_chain(&mut self, state: &mut SessionState, chain_id: Option<ChainId>) {
        self.deployment = self.directory.resolve(chain_id);
        self.contract = build_contract(&self.collaborators, &self.deployment);
        state.reset_chain_data();

        match self.deployment.address {
            Some(address) => info!(
                "session: chain changed chain_id={:?} diary={}",
                chain_id.map(|id| id.0),
                address
            ),
            None => warn!(
                "session: no diary deployed chain_id={:?}",
                chain_id.map(|id| id.0)
            ),
        }

        if self.contract.is_some() {
            self.refresh_stats(state).await;
        }
    }

    pub async fn refresh_stats(&self, state: &mut SessionState) {
        let Some(contract) = self.contract.clone() else {
            return;
        };

        state.refresh = OperationStatus::Running;
        let result = self.read_stats(contract.as_ref()).await;
        state.refresh = OperationStatus::settled(&result);
        match result {
            Ok((entry_count, network_trend_handle, my_trend_handle)) => {
                state.entry_count = entry_count;
                state.network_trend_handle = Some(network_trend_handle);
                state.my_trend_handle = my_trend_handle;
            }
            Err(err) => {
                error!("session: refresh failed diary={} err={err}", contract.address());
                state.message = MSG_REFRESH_FAILED.to_string();
            }
        }
    }

    async fn read_stats(
        &self,
        contract: &dyn DiaryContract,
    ) -> Result<(u64, Handle, Option<Handle>), ClientError> {
        let (entry_count, network_trend_handle) =
            futures::try_join!(contract.entry_count(), contract.encrypted_trend())?;

        let my_trend_handle = match &self.collaborators.signer {
            Some(signer) => contract.my_trend_handle(signer.address()).await.ok(),
            None => None,
        };
        Ok((entry_count, network_trend_handle, my_trend_handle))
    }

    /// Validates `score` locally, then encrypts it and submits it to the
    /// diary. Invalid scores never reach the network.
    pub async fn submit_mood(&self, state: &mut SessionState, score: f64) {
        let Some(tx) = self.tx_context() else {
            state.message = MSG_CONNECT_TO_SUBMIT.to_string();
            return;
        };
        let score = match MoodScore::from_raw(score) {
            Ok(score) => score,
            Err(err) => {
                state.message = err.to_string();
                return;
            }
        };

        state.submit = OperationStatus::Running;
        let result = self.send_mood(state, &tx, score).await;
        match &result {
            Ok(receipt) => {
                info!(
                    "session: mood stored tx={} block={}",
                    receipt.tx_hash, receipt.block_number
                );
                self.refresh_stats(state).await;
            }
            Err(err) => {
                error!("session: mood submission failed err={err}");
                state.message = if is_user_rejection(err) {
                    MSG_SUBMIT_REJECTED.to_string()
                } else {
                    format!("Failed to submit mood entry: {}", user_message(err))
                };
            }
        }
        state.submit = OperationStatus::settled(&result);
    }

    async fn send_mood(
        &self,
        state: &mut SessionState,
        tx: &TxContext,
        score: MoodScore,
    ) -> Result<TxReceipt, ClientError> {
        let mut input = tx.fhe.create_encrypted_input(tx.contract.address(), tx.wallet);
        input.add32(u32::from(score.value()));
        let encrypted = tx.fhe.encrypt(&input).await?;
        let handle = *encrypted
            .handles
            .first()
            .ok_or(ClientError::Fhe(FheError::EmptyInput))?;

        let pending = tx
            .contract
            .submit_mood(tx.signer.as_ref(), handle, &encrypted.input_proof)
            .await?;
        state.message = MSG_SUBMIT_SENT.to_string();
        let receipt = confirm(pending).await?;
        state.message = MSG_SUBMIT_MINED.to_string();
        Ok(receipt)
    }

    /// Asks the diary to share the current trend handle with the wallet.
    pub async fn request_trend_handle(&self, state: &mut SessionState) {
        let Some(tx) = self.tx_context() else {
            state.message = MSG_CONNECT_TO_REQUEST.to_string();
            return;
        };

        state.request_access = OperationStatus::Running;
        let result = self.send_trend_request(state, &tx).await;
        match &result {
            Ok(()) => self.refresh_stats(state).await,
            Err(err) => {
                error!("session: trend access request failed err={err}");
                state.message = if is_user_rejection(err) {
                    MSG_REQUEST_REJECTED.to_string()
                } else {
                    format!("Failed to request trend access: {}", user_message(err))
                };
            }
        }
        state.request_access = OperationStatus::settled(&result);
    }

    async fn send_trend_request(
        &self,
        state: &mut SessionState,
        tx: &TxContext,
    ) -> Result<(), ClientError> {
        let pending = tx.contract.request_trend_handle(tx.signer.as_ref()).await?;
        state.message = MSG_REQUEST_SENT.to_string();
        let receipt = confirm(pending).await?;
        state.message = MSG_REQUEST_MINED.to_string();
        info!(
            "session: trend access granted tx={} wallet={}",
            receipt.tx_hash, tx.wallet
        );

        // The refresh that follows reads the handle again.
        match tx.contract.my_trend_handle(tx.signer.address()).await {
            Ok(handle) => state.my_trend_handle = Some(handle),
            Err(err) => warn!("session: granted handle not readable yet err={err}"),
        }
        Ok(())
    }

    /// Decrypts the caller's trend handle through the FHE relayer. Does
    /// nothing when the cached average already belongs to that handle.
    pub async fn decrypt_trend(&self, state: &mut SessionState) {
        let (Some(fhe), Some(signer), Some(_), Some(contract), Some(handle)) = (
            self.collaborators.fhe.clone(),
            self.collaborators.signer.clone(),
            self.collaborators.wallet_address,
            self.deployment.address,
            state.my_trend_handle,
        ) else {
            state.message = MSG_NOTHING_TO_DECRYPT.to_string();
            return;
        };
        if handle.is_zero() {
            state.message = MSG_NOTHING_TO_DECRYPT.to_string();
            return;
        }
        if state
            .clear_trend
            .is_some_and(|cached| cached.handle == handle)
        {
            return;
        }

        state.decrypt = OperationStatus::Running;
        let result = self
            .decrypt_handle(fhe.as_ref(), signer.as_ref(), contract, handle)
            .await;
        state.decrypt = match &result {
            Ok(DecryptOutcome::Decrypted(_)) => OperationStatus::Succeeded,
            _ => OperationStatus::Failed,
        };
        match result {
            Ok(DecryptOutcome::Decrypted(value)) => {
                state.clear_trend = Some(ClearTrend { handle, value });
                state.message = MSG_DECRYPT_DONE.to_string();
            }
            Ok(DecryptOutcome::Unauthorized) => {
                state.message = MSG_DECRYPT_UNAUTHORIZED.to_string();
            }
            Ok(DecryptOutcome::Rejected(reason)) => {
                warn!("session: discarded decrypted trend handle={handle} reason={reason}");
                state.message = reason.to_string();
            }
            Err(err) => {
                error!("session: trend decryption failed handle={handle} err={err}");
                state.message = if is_user_rejection(&err) {
                    MSG_DECRYPT_REJECTED.to_string()
                } else {
                    format!("Decryption failed: {}", user_message(&err))
                };
            }
        }
    }

    async fn decrypt_handle(
        &self,
        fhe: &dyn FheClient,
        signer: &dyn WalletSigner,
        contract: Address,
        handle: Handle,
    ) -> Result<DecryptOutcome, ClientError> {
        let Some(signature) = DecryptionSignature::load_or_sign(
            fhe,
            &[contract],
            signer,
            self.collaborators.storage.as_ref(),
        )
        .await?
        else {
            return Ok(DecryptOutcome::Unauthorized);
        };

        let request = UserDecryptRequest {
            handles: vec![HandleContractPair {
                handle,
                contract_address: contract,
            }],
            signature,
        };
        let values = fhe.user_decrypt(&request).await?;
        Ok(match validate_trend_value(values.get(&handle)) {
            Ok(score) => DecryptOutcome::Decrypted(score),
            Err(reason) => DecryptOutcome::Rejected(reason),
        })
    }

    fn tx_context(&self) -> Option<TxContext> {
        if !self.is_ready_for_tx() {
            return None;
        }
        Some(TxContext {
            contract: self.contract.clone()?,
            signer: self.collaborators.signer.clone()?,
            fhe: self.collaborators.fhe.clone()?,
            wallet: self.collaborators.wallet_address?,
        })
    }
}

fn build_contract(
    collaborators: &SessionCollaborators,
    deployment: &DiaryDeployment,
) -> Option<Arc<dyn DiaryContract>> {
    let address = deployment.address.filter(|address| !address.is_zero())?;
    let provider = collaborators.provider.as_ref()?;
    Some(provider.contract(address))
}

async fn confirm(pending: Box<dyn PendingTransaction>) -> Result<TxReceipt, ClientError> {
    let tx_hash = pending.hash();
    let receipt = pending.wait().await?;
    match receipt.status {
        TxStatus::Mined => Ok(receipt),
        TxStatus::Reverted => Err(ClientError::Contract {
            reason: receipt
                .revert_reason
                .unwrap_or_else(|| format!("transaction {tx_hash} reverted")),
        }),
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
