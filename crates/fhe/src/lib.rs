//! Development stand-in for the FHE capability used by the mood diary.
//!
//! Nothing here is homomorphic: inputs are sealed to the node's network key,
//! the node computes on plaintexts, and results are re-sealed to the
//! requesting user's keypair. The shapes (handles, input proofs, user
//! decryption authorizations) match what the diary client expects from a
//! real FHE relayer.

use shared::domain::{Address, Handle};
use thiserror::Error;

pub mod input;
pub mod plaintext;
pub mod sealing;
pub mod wallet;

pub use input::{encrypt_inputs, open_input, EncryptedInputs};
pub use plaintext::ClearValue;
pub use sealing::{SealedValue, SealingKeypair};
pub use wallet::{address_from_verifying_key, verify_wallet_signature, LocalWallet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FheError {
    #[error("invalid FHE key material: {0}")]
    InvalidKey(String),
    #[error("FHE sealing failed")]
    Seal,
    #[error("FHE ciphertext could not be authenticated")]
    Open,
    #[error("FHE encryption produced no handles")]
    EmptyInput,
    #[error("malformed FHE plaintext: {0}")]
    MalformedPlaintext(String),
    #[error("invalid FHE input proof: {0}")]
    InvalidProof(String),
    #[error("FHE input handle {handle} is not bound to contract {contract} and user {user}")]
    UnboundHandle {
        handle: Handle,
        contract: Address,
        user: Address,
    },
    #[error("FHE input value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: u128, bits: u32 },
    #[error("wallet signature verification failed")]
    BadSignature,
    #[error("signing key belongs to {actual}, not {claimed}")]
    SignerMismatch { claimed: Address, actual: Address },
}
