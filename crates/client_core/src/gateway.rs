//! HTTP client for the diary node: chain reads, transaction submission and
//! the user-decrypt relayer endpoint.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Address, ChainId, Handle, TxHash},
    error::{ApiError, ErrorCode},
    protocol::{
        CanDecryptResponse, ContractCall, DeploymentSummary, EntryCountResponse, HandleResponse,
        NetworkKeyResponse, SignedTransaction, SubmitTransactionResponse, TxReceipt,
        UnsignedTransaction, UserDecryptHttpRequest, UserDecryptHttpResponse,
    },
};
use tokio::time::{sleep, Instant};
use tracing::info;
use url::Url;

use crate::{error::ClientError, DiaryContract, DiaryProvider, PendingTransaction, WalletSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOptions {
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            receipt_poll_interval: Duration::from_millis(250),
            receipt_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: String,
    chain_id: ChainId,
    options: GatewayOptions,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        chain_id: ChainId,
        options: GatewayOptions,
    ) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url)
            .map_err(|err| ClientError::Other(format!("invalid gateway url {base_url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::Other(format!(
                "gateway url must start with http:// or https://, got {base_url}"
            )));
        }
        Ok(Self {
            http: Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            chain_id,
            options,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        self.http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn network_key(&self) -> Result<NetworkKeyResponse, ClientError> {
        self.get_json("/v1/keys/network").await
    }

    pub async fn deployments(&self) -> Result<Vec<DeploymentSummary>, ClientError> {
        self.get_json("/v1/deployments").await
    }

    /// `Ok(None)` while the node has not mined `tx_hash`.
    pub async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, ClientError> {
        let response = self
            .http
            .get(format!("{}/v1/transactions/{tx_hash}", self.base_url))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    pub async fn can_decrypt(&self, diary: Address, caller: Address) -> Result<bool, ClientError> {
        let response: CanDecryptResponse = self
            .get_json(&format!("/v1/diaries/{diary}/can-decrypt?caller={caller}"))
            .await?;
        Ok(response.can_decrypt)
    }

    pub async fn user_decrypt(
        &self,
        request: &UserDecryptHttpRequest,
    ) -> Result<UserDecryptHttpResponse, ClientError> {
        self.post_json("/v1/user-decrypt", request).await
    }

    async fn submit(&self, signed: &SignedTransaction) -> Result<TxHash, ClientError> {
        let response: SubmitTransactionResponse =
            self.post_json("/v1/transactions", signed).await?;
        Ok(response.tx_hash)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        read_json(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }
}

/// Node error bodies become typed errors: reverts are contract failures,
/// everything else keeps the HTTP status as its code.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await?;
    match serde_json::from_str::<ApiError>(&body) {
        Ok(err) if err.code == ErrorCode::Reverted => Err(ClientError::Contract {
            reason: err.message,
        }),
        Ok(err) => Err(ClientError::Rpc {
            code: i64::from(status.as_u16()),
            message: err.message,
        }),
        Err(_) => Err(ClientError::Rpc {
            code: i64::from(status.as_u16()),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        }),
    }
}

impl DiaryProvider for HttpGateway {
    fn contract(&self, address: Address) -> Arc<dyn DiaryContract> {
        Arc::new(HttpDiaryContract {
            gateway: self.clone(),
            address,
        })
    }
}

struct HttpDiaryContract {
    gateway: HttpGateway,
    address: Address,
}

impl HttpDiaryContract {
    async fn send(
        &self,
        signer: &dyn WalletSigner,
        call: ContractCall,
    ) -> Result<Box<dyn PendingTransaction>, ClientError> {
        let call_name = call.name();
        let tx = UnsignedTransaction {
            chain_id: self.gateway.chain_id,
            from: signer.address(),
            to: self.address,
            nonce: rand::random(),
            call,
        };
        let signing_bytes = tx
            .signing_bytes()
            .map_err(|err| ClientError::Other(format!("failed to encode transaction: {err}")))?;
        let signature = signer
            .sign_message(&signing_bytes)
            .await
            .map_err(|err| ClientError::from(err).wrap(format!("signing {call_name}")))?;

        let signed = SignedTransaction {
            tx,
            verifying_key_b64: STANDARD.encode(signer.verifying_key()),
            signature_b64: STANDARD.encode(signature),
        };
        let tx_hash = self.gateway.submit(&signed).await?;
        info!(
            "gateway: transaction sent call={} tx={} diary={}",
            call_name, tx_hash, self.address
        );
        Ok(Box::new(HttpPendingTransaction {
            gateway: self.gateway.clone(),
            tx_hash,
        }))
    }
}

#[async_trait]
impl DiaryContract for HttpDiaryContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn entry_count(&self) -> Result<u64, ClientError> {
        let response: EntryCountResponse = self
            .gateway
            .get_json(&format!("/v1/diaries/{}/entry-count", self.address))
            .await?;
        Ok(response.entry_count)
    }

    async fn encrypted_trend(&self) -> Result<Handle, ClientError> {
        let response: HandleResponse = self
            .gateway
            .get_json(&format!("/v1/diaries/{}/encrypted-trend", self.address))
            .await?;
        Ok(response.handle)
    }

    async fn my_trend_handle(&self, caller: Address) -> Result<Handle, ClientError> {
        let response: HandleResponse = self
            .gateway
            .get_json(&format!(
                "/v1/diaries/{}/my-trend-handle?caller={caller}",
                self.address
            ))
            .await?;
        Ok(response.handle)
    }

    async fn submit_mood(
        &self,
        signer: &dyn WalletSigner,
        handle: Handle,
        input_proof: &[u8],
    ) -> Result<Box<dyn PendingTransaction>, ClientError> {
        self.send(
            signer,
            ContractCall::SubmitMood {
                handle,
                input_proof_b64: STANDARD.encode(input_proof),
            },
        )
        .await
    }

    async fn request_trend_handle(
        &self,
        signer: &dyn WalletSigner,
    ) -> Result<Box<dyn PendingTransaction>, ClientError> {
        self.send(signer, ContractCall::RequestTrendHandle).await
    }
}

struct HttpPendingTransaction {
    gateway: HttpGateway,
    tx_hash: TxHash,
}

#[async_trait]
impl PendingTransaction for HttpPendingTransaction {
    fn hash(&self) -> TxHash {
        self.tx_hash
    }

    async fn wait(self: Box<Self>) -> Result<TxReceipt, ClientError> {
        let options = self.gateway.options;
        let deadline = Instant::now() + options.receipt_timeout;
        loop {
            if let Some(receipt) = self.gateway.receipt(self.tx_hash).await? {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Transport(format!(
                    "timed out waiting for transaction {} after {:?}",
                    self.tx_hash, options.receipt_timeout
                )));
            }
            sleep(options.receipt_poll_interval).await;
        }
    }
}
