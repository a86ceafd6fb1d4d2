use std::fmt;

use shared::{
    domain::{Address, Handle},
    protocol::HandleContractPair,
};

use crate::signature::DecryptionSignature;

/// Builder for values to encrypt, bound to one contract and one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    contract: Address,
    user: Address,
    values: Vec<u32>,
}

impl EncryptedInput {
    pub fn new(contract: Address, user: Address) -> Self {
        Self {
            contract,
            user,
            values: Vec::new(),
        }
    }

    pub fn add32(&mut self, value: u32) -> &mut Self {
        self.values.push(value);
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn user(&self) -> Address {
        self.user
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub handles: Vec<Handle>,
    pub input_proof: Vec<u8>,
}

impl fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPayload")
            .field("handles", &self.handles)
            .field("input_proof_len", &self.input_proof.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UserDecryptRequest {
    pub handles: Vec<HandleContractPair>,
    pub signature: DecryptionSignature,
}
