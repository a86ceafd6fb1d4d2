use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use fhe::{open_input, sealing::seal, verify_wallet_signature, ClearValue, SealingKeypair};
use sha2::{Digest, Sha256};
use shared::{
    domain::{Address, ChainId, Handle, TxHash},
    error::{ApiError, ErrorCode},
    protocol::{
        ContractCall, DeploymentSummary, NetworkKeyResponse, SealedPlaintext, SignedTransaction,
        SubmitTransactionResponse, TxReceipt, UserDecryptHttpRequest, UserDecryptHttpResponse,
    },
};
use storage::{NewAccessGrant, NewSubmission, Storage, StoredDiary};
use tokio::sync::Mutex;
use tracing::{info, warn};

const COMPUTED_HANDLE_DOMAIN: &[u8] = b"mood-diary/computed-handle/v1";
const TX_HASH_DOMAIN: &[u8] = b"mood-diary/tx-hash/v1";

#[derive(Clone)]
pub struct DiaryContext {
    pub storage: Storage,
    pub network_key: Arc<SealingKeypair>,
    pub chain_id: ChainId,
    write_lock: Arc<Mutex<()>>,
}

impl DiaryContext {
    pub fn new(storage: Storage, network_key: SealingKeypair, chain_id: ChainId) -> Self {
        Self {
            storage,
            network_key: Arc::new(network_key),
            chain_id,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub async fn deploy(
    ctx: &DiaryContext,
    address: Address,
    chain_name: &str,
) -> Result<DeploymentSummary, ApiError> {
    if address.is_zero() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "cannot deploy a diary at the zero address",
        ));
    }
    let summary = ctx
        .storage
        .deploy_diary(address, ctx.chain_id, chain_name)
        .await
        .map_err(internal)?;
    info!(
        "diary: deployed address={} chain_id={} block={}",
        summary.address, summary.chain_id, summary.deployed_at_block
    );
    Ok(summary)
}

pub async fn deployments(ctx: &DiaryContext) -> Result<Vec<DeploymentSummary>, ApiError> {
    let diaries = ctx.storage.list_diaries().await.map_err(internal)?;
    Ok(diaries.iter().map(StoredDiary::summary).collect())
}

pub fn network_key(ctx: &DiaryContext) -> NetworkKeyResponse {
    NetworkKeyResponse {
        chain_id: ctx.chain_id,
        public_key_b64: STANDARD.encode(ctx.network_key.public_key()),
    }
}

pub async fn entry_count(ctx: &DiaryContext, diary: Address) -> Result<u64, ApiError> {
    Ok(load_diary(ctx, diary).await?.entry_count)
}

/// The current aggregate handle, or the zero handle before the first entry.
pub async fn encrypted_trend(ctx: &DiaryContext, diary: Address) -> Result<Handle, ApiError> {
    Ok(load_diary(ctx, diary)
        .await?
        .trend_handle
        .unwrap_or(Handle::ZERO))
}

/// Reverts unless `caller` was granted access to the current aggregate.
pub async fn my_trend_handle(
    ctx: &DiaryContext,
    diary: Address,
    caller: Address,
) -> Result<Handle, ApiError> {
    let record = load_diary(ctx, diary).await?;
    let Some(trend) = record.trend_handle else {
        return Err(ApiError::reverted("trend access not granted"));
    };
    if !ctx
        .storage
        .is_allowed(trend, caller)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::reverted("trend access not granted"));
    }
    Ok(trend)
}

pub async fn can_decrypt_trend(
    ctx: &DiaryContext,
    diary: Address,
    caller: Address,
) -> Result<bool, ApiError> {
    let record = load_diary(ctx, diary).await?;
    match record.trend_handle {
        Some(trend) => ctx.storage.is_allowed(trend, caller).await.map_err(internal),
        None => Ok(false),
    }
}

/// Verifies, executes and mines a signed contract call. Calls that would
/// revert are refused with [`ErrorCode::Reverted`] and leave no receipt.
pub async fn submit_transaction(
    ctx: &DiaryContext,
    signed: SignedTransaction,
) -> Result<SubmitTransactionResponse, ApiError> {
    let tx = &signed.tx;
    if tx.chain_id != ctx.chain_id {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!(
                "transaction for chain {} sent to chain {}",
                tx.chain_id, ctx.chain_id
            ),
        ));
    }

    let verifying_key = decode_b64(&signed.verifying_key_b64, "verifying key")?;
    let signature = decode_b64(&signed.signature_b64, "signature")?;
    let signing_bytes = tx.signing_bytes().map_err(|err| {
        ApiError::new(ErrorCode::Internal, format!("failed to encode transaction: {err}"))
    })?;
    verify_wallet_signature(tx.from, &verifying_key, &signing_bytes, &signature)
        .map_err(|err| ApiError::new(ErrorCode::Unauthorized, err.to_string()))?;

    let tx_hash = transaction_hash(&signing_bytes, &signature);
    let _guard = ctx.write_lock.lock().await;
    if ctx
        .storage
        .transaction_exists(tx_hash)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("transaction {tx_hash} already submitted"),
        ));
    }

    let record = load_diary(ctx, tx.to).await?;
    let receipt = match &tx.call {
        ContractCall::SubmitMood {
            handle,
            input_proof_b64,
        } => {
            let input_proof = decode_b64(input_proof_b64, "input proof")?;
            let value = open_input(&ctx.network_key, tx.to, tx.from, *handle, &input_proof)
                .map_err(|err| {
                    warn!(
                        "diary: submitMood rejected input sender={} err={}",
                        tx.from, err
                    );
                    ApiError::reverted(format!("invalid encrypted input: {err}"))
                })?;
            execute_submit_mood(ctx, &record, tx_hash, tx.from, value).await?
        }
        ContractCall::RequestTrendHandle => {
            let Some(trend_handle) = record.trend_handle else {
                return Err(ApiError::reverted("no mood entries yet"));
            };
            ctx.storage
                .record_access_grant(NewAccessGrant {
                    tx_hash,
                    diary: tx.to,
                    sender: tx.from,
                    trend_handle,
                    mined_at: Utc::now(),
                })
                .await
                .map_err(internal)?
        }
    };

    info!(
        "diary: mined call={} tx_hash={} sender={} block={}",
        tx.call.name(),
        tx_hash,
        tx.from,
        receipt.block_number
    );
    Ok(SubmitTransactionResponse { tx_hash })
}

async fn execute_submit_mood(
    ctx: &DiaryContext,
    record: &StoredDiary,
    tx_hash: TxHash,
    sender: Address,
    value: u32,
) -> Result<TxReceipt, ApiError> {
    let previous_sum = match record.sum_handle {
        Some(handle) => ctx
            .storage
            .ciphertext_value(handle)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::new(ErrorCode::Internal, format!("missing ciphertext {handle}"))
            })?,
        None => 0,
    };
    let sum_value = previous_sum.saturating_add(u64::from(value));
    let count = record.entry_count.saturating_add(1);

    ctx.storage
        .record_submission(NewSubmission {
            tx_hash,
            diary: record.address,
            sender,
            previous_sum_handle: record.sum_handle,
            sum_handle: computed_handle(tx_hash, b"sum"),
            sum_value,
            trend_handle: computed_handle(tx_hash, b"trend"),
            trend_value: sum_value / count,
            mined_at: Utc::now(),
        })
        .await
        .map_err(internal)
}

pub async fn transaction_receipt(
    ctx: &DiaryContext,
    tx_hash: TxHash,
) -> Result<TxReceipt, ApiError> {
    ctx.storage
        .load_receipt(tx_hash)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::NotFound, format!("transaction {tx_hash} not found"))
        })
}

pub async fn user_decrypt(
    ctx: &DiaryContext,
    request: UserDecryptHttpRequest,
) -> Result<UserDecryptHttpResponse, ApiError> {
    user_decrypt_at(ctx, request, Utc::now().timestamp()).await
}

/// Re-encrypts each requested plaintext to the authorization's public key
/// once the wallet signature, validity window and ACL all check out.
pub async fn user_decrypt_at(
    ctx: &DiaryContext,
    request: UserDecryptHttpRequest,
    now: i64,
) -> Result<UserDecryptHttpResponse, ApiError> {
    if request.handles.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "no handles to decrypt"));
    }

    let authorization = &request.authorization;
    let verifying_key = decode_b64(&request.verifying_key_b64, "verifying key")?;
    let signature = decode_b64(&request.signature_b64, "signature")?;
    let signing_bytes = authorization.signing_bytes().map_err(|err| {
        ApiError::new(
            ErrorCode::Internal,
            format!("failed to encode authorization: {err}"),
        )
    })?;
    verify_wallet_signature(
        authorization.user_address,
        &verifying_key,
        &signing_bytes,
        &signature,
    )
    .map_err(|err| ApiError::new(ErrorCode::Unauthorized, err.to_string()))?;
    if !authorization.is_valid_at(now) {
        return Err(ApiError::new(
            ErrorCode::Unauthorized,
            "decryption authorization is expired or not yet valid",
        ));
    }

    let recipient: [u8; 32] = decode_b64(&authorization.public_key_b64, "public key")?
        .try_into()
        .map_err(|_| ApiError::new(ErrorCode::Validation, "public key must be 32 bytes"))?;

    let user = authorization.user_address;
    let mut results = Vec::with_capacity(request.handles.len());
    for pair in &request.handles {
        if !authorization.covers(&pair.contract_address) {
            return Err(ApiError::new(
                ErrorCode::Forbidden,
                format!(
                    "contract {} is not covered by the decryption authorization",
                    pair.contract_address
                ),
            ));
        }
        let contract_allowed = ctx
            .storage
            .is_allowed(pair.handle, pair.contract_address)
            .await
            .map_err(internal)?;
        let user_allowed = ctx
            .storage
            .is_allowed(pair.handle, user)
            .await
            .map_err(internal)?;
        if !contract_allowed || !user_allowed {
            warn!(
                "relayer: decrypt refused handle={} user={}",
                pair.handle, user
            );
            return Err(ApiError::new(
                ErrorCode::Forbidden,
                format!("{user} is not allowed to decrypt {}", pair.handle),
            ));
        }

        let value = ctx
            .storage
            .ciphertext_value(pair.handle)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::new(ErrorCode::NotFound, format!("unknown handle {}", pair.handle))
            })?;
        let sealed = seal(
            &recipient,
            &ClearValue::uint(u128::from(value)).encode(),
            pair.handle.as_bytes(),
        )
        .map_err(|err| ApiError::new(ErrorCode::Internal, err.to_string()))?;
        results.push(SealedPlaintext {
            handle: pair.handle,
            ephemeral_public_key_b64: STANDARD.encode(sealed.ephemeral_public_key),
            nonce_b64: STANDARD.encode(sealed.nonce),
            ciphertext_b64: STANDARD.encode(&sealed.ciphertext),
        });
    }

    info!(
        "relayer: user decrypt user={} handles={}",
        user,
        results.len()
    );
    Ok(UserDecryptHttpResponse { results })
}

pub fn transaction_hash(signing_bytes: &[u8], signature: &[u8]) -> TxHash {
    let digest = Sha256::new()
        .chain_update(TX_HASH_DOMAIN)
        .chain_update(signing_bytes)
        .chain_update(signature)
        .finalize();
    TxHash(digest.into())
}

fn computed_handle(tx_hash: TxHash, label: &[u8]) -> Handle {
    let digest = Sha256::new()
        .chain_update(COMPUTED_HANDLE_DOMAIN)
        .chain_update(tx_hash.as_bytes())
        .chain_update(label)
        .finalize();
    Handle(digest.into())
}

async fn load_diary(ctx: &DiaryContext, diary: Address) -> Result<StoredDiary, ApiError> {
    ctx.storage
        .load_diary(diary)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("no diary deployed at {diary}")))
}

fn decode_b64(value: &str, what: &str) -> Result<Vec<u8>, ApiError> {
    STANDARD
        .decode(value)
        .map_err(|_| ApiError::new(ErrorCode::Validation, format!("invalid base64 {what}")))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
