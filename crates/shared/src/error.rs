use serde::{Deserialize, Serialize};

/// EIP-1193 "user rejected request" code reported by wallets.
pub const ACTION_REJECTED_CODE: i64 = 4001;
/// String code some wallet libraries use for the same condition.
pub const ACTION_REJECTED: &str = "ACTION_REJECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Reverted,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Reverted, reason)
    }
}

/// Closed set of failure categories surfaced to the diary user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UserRejected,
    Network,
    Contract,
    Encryption,
    InsufficientFunds,
    Gas,
    Unknown,
}

pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again.";

impl ErrorKind {
    /// Friendly replacement text, or `None` when the raw message should be shown.
    pub fn friendly_message(self) -> Option<&'static str> {
        match self {
            ErrorKind::UserRejected => Some("The request was rejected in your wallet."),
            ErrorKind::Network => {
                Some("Network connection error. Please check your internet connection.")
            }
            ErrorKind::Contract => {
                Some("Smart contract error. Please try again or contact support.")
            }
            ErrorKind::Encryption => {
                Some("FHEVM encryption error. Please refresh the page and try again.")
            }
            ErrorKind::InsufficientFunds => Some(
                "Insufficient funds for transaction. Please check your wallet balance.",
            ),
            ErrorKind::Gas => {
                Some("Transaction gas error. Please try again with higher gas limit.")
            }
            ErrorKind::Unknown => None,
        }
    }

    /// Categorizes free-form error text from a transport, contract or FHE layer.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("insufficient funds") {
            ErrorKind::InsufficientFunds
        } else if lower.contains("network") {
            ErrorKind::Network
        } else if lower.contains("contract") {
            ErrorKind::Contract
        } else if message.contains("FHE") {
            ErrorKind::Encryption
        } else if lower.contains("gas") {
            ErrorKind::Gas
        } else {
            ErrorKind::Unknown
        }
    }
}
