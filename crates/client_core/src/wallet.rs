use std::{fmt, fs, path::Path, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use fhe::LocalWallet;
use shared::domain::Address;
use tracing::info;

use crate::{error::WalletError, WalletSigner};

type ApprovalFn = dyn Fn(&[u8]) -> bool + Send + Sync;

/// Signer holding an ed25519 key on disk. An optional approval hook plays
/// the wallet prompt: declining reports a user rejection.
#[derive(Clone)]
pub struct LocalSigner {
    wallet: LocalWallet,
    approve: Option<Arc<ApprovalFn>>,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.wallet.address())
            .field("prompts", &self.approve.is_some())
            .finish()
    }
}

impl LocalSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self {
            wallet,
            approve: None,
        }
    }

    pub fn with_approval(
        mut self,
        approve: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.approve = Some(Arc::new(approve));
        self
    }

    /// Reads a hex-encoded key from `path`, creating one when the file does
    /// not exist yet.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read wallet key '{}'", path.display()))?;
            let bytes = hex::decode(raw.trim())
                .with_context(|| format!("wallet key '{}' is not hex", path.display()))?;
            let wallet = LocalWallet::from_secret_slice(&bytes)
                .with_context(|| format!("wallet key '{}' is invalid", path.display()))?;
            return Ok(Self::new(wallet));
        }

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create wallet directory '{}'", parent.display())
            })?;
        }
        let wallet = LocalWallet::generate();
        fs::write(path, hex::encode(wallet.secret_bytes().as_slice()))
            .with_context(|| format!("failed to write wallet key '{}'", path.display()))?;
        info!(
            "wallet: generated key address={} path={}",
            wallet.address(),
            path.display()
        );
        Ok(Self::new(wallet))
    }
}

#[async_trait]
impl WalletSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn verifying_key(&self) -> [u8; 32] {
        self.wallet.verifying_key()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
        if let Some(approve) = &self.approve {
            if !approve(message) {
                return Err(WalletError::rejected());
            }
        }
        Ok(self.wallet.sign(message).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe::verify_wallet_signature;

    #[tokio::test]
    async fn key_file_is_created_once_and_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keys").join("wallet.key");

        let first = LocalSigner::load_or_create(&path).expect("create");
        let second = LocalSigner::load_or_create(&path).expect("load");
        assert_eq!(first.address(), second.address());

        let signature = second.sign_message(b"hello").await.expect("sign");
        verify_wallet_signature(
            first.address(),
            &first.verifying_key(),
            b"hello",
            &signature,
        )
        .expect("valid signature");
    }

    #[tokio::test]
    async fn declined_prompt_is_a_user_rejection() {
        let signer = LocalSigner::new(LocalWallet::generate()).with_approval(|_| false);
        let err = signer.sign_message(b"tx").await.expect_err("declined");
        assert!(err.is_user_rejection());
    }

    #[test]
    fn corrupt_key_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wallet.key");
        fs::write(&path, "not hex").expect("write");
        let err = LocalSigner::load_or_create(&path).expect_err("corrupt");
        assert!(err.to_string().contains("is not hex"));
    }
}
