use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use fhe::{encrypt_inputs, ClearValue, FheError, SealedValue, SealingKeypair};
use shared::{domain::Handle, protocol::SealedPlaintext};
use tracing::info;

use crate::{
    error::ClientError,
    gateway::HttpGateway,
    types::{EncryptedInput, EncryptedPayload, UserDecryptRequest},
    FheClient,
};

/// FHE client backed by the diary node's relayer endpoints.
#[derive(Debug, Clone)]
pub struct HttpFheClient {
    gateway: HttpGateway,
    network_public_key: [u8; 32],
}

impl HttpFheClient {
    /// Fetches the network public key, refusing a node that serves a
    /// different chain than the gateway was configured for.
    pub async fn connect(gateway: HttpGateway) -> Result<Self, ClientError> {
        let key = gateway.network_key().await?;
        if key.chain_id != gateway.chain_id() {
            return Err(ClientError::Other(format!(
                "FHE relayer serves chain {} but the session expects chain {}",
                key.chain_id,
                gateway.chain_id()
            )));
        }
        let network_public_key = decode_array(&key.public_key_b64, "network public key")?;
        info!("fhe: network key loaded chain_id={}", key.chain_id);
        Ok(Self {
            gateway,
            network_public_key,
        })
    }
}

#[async_trait]
impl FheClient for HttpFheClient {
    async fn encrypt(&self, input: &EncryptedInput) -> Result<EncryptedPayload, ClientError> {
        let encrypted = encrypt_inputs(
            &self.network_public_key,
            input.contract(),
            input.user(),
            input.values(),
        )?;
        Ok(EncryptedPayload {
            handles: encrypted.handles,
            input_proof: encrypted.input_proof,
        })
    }

    fn generate_keypair(&self) -> SealingKeypair {
        SealingKeypair::generate()
    }

    async fn user_decrypt(
        &self,
        request: &UserDecryptRequest,
    ) -> Result<HashMap<Handle, ClearValue>, ClientError> {
        let keypair = request.signature.keypair()?;
        let response = self
            .gateway
            .user_decrypt(&request.signature.http_request(request.handles.clone()))
            .await?;

        response
            .results
            .iter()
            .map(|sealed| -> Result<(Handle, ClearValue), ClientError> {
                let plaintext = keypair.open(&sealed_value(sealed)?, sealed.handle.as_bytes())?;
                Ok((sealed.handle, ClearValue::decode(&plaintext)?))
            })
            .collect()
    }
}

fn sealed_value(sealed: &SealedPlaintext) -> Result<SealedValue, ClientError> {
    Ok(SealedValue {
        ephemeral_public_key: decode_array(&sealed.ephemeral_public_key_b64, "ephemeral key")?,
        nonce: decode_array(&sealed.nonce_b64, "nonce")?,
        ciphertext: STANDARD
            .decode(&sealed.ciphertext_b64)
            .map_err(|err| FheError::MalformedPlaintext(format!("ciphertext: {err}")))?,
    })
}

fn decode_array<const N: usize>(raw: &str, what: &str) -> Result<[u8; N], ClientError> {
    let bytes = STANDARD
        .decode(raw)
        .map_err(|err| FheError::InvalidKey(format!("{what}: {err}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ClientError::Fhe(FheError::InvalidKey(format!(
            "{what}: expected {N} bytes, got {}",
            bytes.len()
        )))
    })
}
