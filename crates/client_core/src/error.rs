use fhe::FheError;
use shared::error::{ErrorKind, ACTION_REJECTED, ACTION_REJECTED_CODE, UNEXPECTED_ERROR_MESSAGE};
use thiserror::Error;

/// Failure reported by a wallet when asked to sign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("user rejected the request (code {code})")]
    Rejected { code: i64 },
    /// Wallets that report string codes, such as `ACTION_REJECTED`.
    #[error("{message} ({code})")]
    Coded { code: String, message: String },
    #[error("{0}")]
    Failed(String),
}

impl WalletError {
    pub fn rejected() -> Self {
        WalletError::Rejected {
            code: ACTION_REJECTED_CODE,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        match self {
            WalletError::Rejected { code } => *code == ACTION_REJECTED_CODE,
            WalletError::Coded { code, .. } => code == ACTION_REJECTED,
            WalletError::Failed(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("contract call reverted: {reason}")]
    Contract { reason: String },
    #[error(transparent)]
    Fhe(#[from] FheError),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("gas estimation failed: {0}")]
    Gas(String),
    #[error("session storage failed: {0}")]
    Storage(String),
    /// Adds context while keeping the original failure, so a nested wallet
    /// rejection is still recognised.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<ClientError>,
    },
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn wrap(self, context: impl Into<String>) -> Self {
        ClientError::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// True when the user declined a wallet prompt anywhere in the error chain.
pub fn is_user_rejection(err: &ClientError) -> bool {
    match err {
        ClientError::Wallet(wallet) => wallet.is_user_rejection(),
        ClientError::Rpc { code, .. } => *code == ACTION_REJECTED_CODE,
        ClientError::Wrapped { source, .. } => is_user_rejection(source),
        _ => false,
    }
}

pub fn classify(err: &ClientError) -> ErrorKind {
    if is_user_rejection(err) {
        return ErrorKind::UserRejected;
    }
    match err {
        ClientError::Transport(_) => ErrorKind::Network,
        ClientError::Contract { .. } => ErrorKind::Contract,
        ClientError::Fhe(_) => ErrorKind::Encryption,
        ClientError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
        ClientError::Gas(_) => ErrorKind::Gas,
        ClientError::Wrapped { source, .. } => match classify(source) {
            ErrorKind::Unknown => ErrorKind::from_message(&err.to_string()),
            kind => kind,
        },
        ClientError::Wallet(_)
        | ClientError::Rpc { .. }
        | ClientError::Storage(_)
        | ClientError::Other(_) => ErrorKind::from_message(&err.to_string()),
    }
}

/// Text shown to the user for a failed operation.
pub fn user_message(err: &ClientError) -> String {
    if let Some(friendly) = classify(err).friendly_message() {
        return friendly.to_string();
    }
    let raw = err.to_string();
    if raw.trim().is_empty() {
        UNEXPECTED_ERROR_MESSAGE.to_string()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_detected_by_numeric_and_string_code() {
        assert!(is_user_rejection(&WalletError::rejected().into()));
        assert!(is_user_rejection(
            &WalletError::Coded {
                code: ACTION_REJECTED.to_string(),
                message: "user denied".to_string(),
            }
            .into()
        ));
        assert!(is_user_rejection(&ClientError::Rpc {
            code: 4001,
            message: "User rejected the request.".to_string(),
        }));
        assert!(!is_user_rejection(
            &WalletError::Failed("locked".to_string()).into()
        ));
    }

    #[test]
    fn nested_rejection_is_still_a_rejection() {
        let err = ClientError::from(WalletError::rejected())
            .wrap("signing transaction")
            .wrap("submitMood");
        assert_eq!(classify(&err), ErrorKind::UserRejected);
    }

    #[test]
    fn structural_variants_map_to_friendly_text() {
        let cases = [
            (
                ClientError::Transport("connection refused".into()),
                "Network connection error. Please check your internet connection.",
            ),
            (
                ClientError::Contract {
                    reason: "no mood entries yet".into(),
                },
                "Smart contract error. Please try again or contact support.",
            ),
            (
                ClientError::Fhe(FheError::Open),
                "FHEVM encryption error. Please refresh the page and try again.",
            ),
            (
                ClientError::InsufficientFunds("balance 0".into()),
                "Insufficient funds for transaction. Please check your wallet balance.",
            ),
            (
                ClientError::Gas("out of gas".into()),
                "Transaction gas error. Please try again with higher gas limit.",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(user_message(&err), expected, "{err:?}");
        }
    }

    #[test]
    fn untyped_errors_fall_back_to_message_patterns() {
        let err = ClientError::Rpc {
            code: -32000,
            message: "insufficient funds for gas * price + value".into(),
        };
        assert_eq!(classify(&err), ErrorKind::InsufficientFunds);

        let err = ClientError::Other("FHE public key not loaded".into());
        assert_eq!(classify(&err), ErrorKind::Encryption);
    }

    #[test]
    fn unknown_errors_keep_raw_text_or_generic_fallback() {
        assert_eq!(
            user_message(&ClientError::Other("boom".into())),
            "boom"
        );
        assert_eq!(
            user_message(&ClientError::Other(String::new())),
            UNEXPECTED_ERROR_MESSAGE
        );
    }
}
