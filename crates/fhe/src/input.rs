use sha2::{Digest, Sha256};
use shared::domain::{Address, Handle};

use crate::{
    plaintext::ClearValue,
    sealing::{seal, SealedValue, SealingKeypair, KEY_LEN, NONCE_LEN},
    FheError,
};

const PROOF_VERSION: u8 = 1;
const HANDLE_DOMAIN: &[u8] = b"mood-diary/input-handle/v1";

/// Output of client-side encryption: one handle per value, plus the proof
/// the contract forwards to the coprocessor to verify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInputs {
    pub handles: Vec<Handle>,
    pub input_proof: Vec<u8>,
}

/// Encrypts 32-bit values for `contract`, bound to `user` as the sender.
pub fn encrypt_inputs(
    network_public_key: &[u8; KEY_LEN],
    contract: Address,
    user: Address,
    values: &[u32],
) -> Result<EncryptedInputs, FheError> {
    if values.is_empty() {
        return Err(FheError::EmptyInput);
    }
    let count = u8::try_from(values.len()).map_err(|_| {
        FheError::InvalidProof(format!("too many inputs: {}", values.len()))
    })?;

    let mut handles = Vec::with_capacity(values.len());
    let mut input_proof = vec![PROOF_VERSION, count];
    for (index, value) in values.iter().enumerate() {
        let index = index as u8;
        let plaintext = ClearValue::uint(u128::from(*value)).encode();
        let sealed = seal(
            network_public_key,
            &plaintext,
            &binding_aad(contract, user, index),
        )?;
        handles.push(derive_handle(contract, user, index, &sealed));
        write_sealed(&mut input_proof, &sealed)?;
    }

    Ok(EncryptedInputs {
        handles,
        input_proof,
    })
}

/// Verifies that `handle` is one of the entries of `input_proof`, bound to
/// `contract` and `user`, and returns its plaintext.
pub fn open_input(
    network_keypair: &SealingKeypair,
    contract: Address,
    user: Address,
    handle: Handle,
    input_proof: &[u8],
) -> Result<u32, FheError> {
    let entries = read_proof(input_proof)?;
    let (index, sealed) = entries
        .iter()
        .enumerate()
        .find(|(index, sealed)| derive_handle(contract, user, *index as u8, sealed) == handle)
        .ok_or(FheError::UnboundHandle {
            handle,
            contract,
            user,
        })?;

    let plaintext = network_keypair.open(sealed, &binding_aad(contract, user, index as u8))?;
    match ClearValue::decode(&plaintext)? {
        ClearValue::Bool(_) => Err(FheError::MalformedPlaintext(
            "expected a 32-bit integer input, got a boolean".to_string(),
        )),
        value => {
            let wide = value.as_u128().ok_or(FheError::ValueOutOfRange {
                value: u128::MAX,
                bits: 32,
            })?;
            u32::try_from(wide).map_err(|_| FheError::ValueOutOfRange {
                value: wide,
                bits: 32,
            })
        }
    }
}

fn binding_aad(contract: Address, user: Address, index: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(Address::LEN * 2 + 1);
    aad.extend_from_slice(contract.as_bytes());
    aad.extend_from_slice(user.as_bytes());
    aad.push(index);
    aad
}

fn derive_handle(contract: Address, user: Address, index: u8, sealed: &SealedValue) -> Handle {
    let digest = Sha256::new()
        .chain_update(HANDLE_DOMAIN)
        .chain_update(contract.as_bytes())
        .chain_update(user.as_bytes())
        .chain_update([index])
        .chain_update(sealed.ephemeral_public_key)
        .chain_update(sealed.nonce)
        .chain_update(&sealed.ciphertext)
        .finalize();
    Handle(digest.into())
}

fn write_sealed(out: &mut Vec<u8>, sealed: &SealedValue) -> Result<(), FheError> {
    let len = u16::try_from(sealed.ciphertext.len())
        .map_err(|_| FheError::InvalidProof("ciphertext too long".to_string()))?;
    out.extend_from_slice(&sealed.ephemeral_public_key);
    out.extend_from_slice(&sealed.nonce);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&sealed.ciphertext);
    Ok(())
}

fn read_proof(proof: &[u8]) -> Result<Vec<SealedValue>, FheError> {
    let (header, mut rest) = proof
        .split_first_chunk::<2>()
        .ok_or_else(|| FheError::InvalidProof("truncated header".to_string()))?;
    let [version, count] = *header;
    if version != PROOF_VERSION {
        return Err(FheError::InvalidProof(format!(
            "unsupported proof version {version}"
        )));
    }

    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let (ephemeral_public_key, tail) = rest
            .split_first_chunk::<KEY_LEN>()
            .ok_or_else(|| FheError::InvalidProof("truncated ephemeral key".to_string()))?;
        let (nonce, tail) = tail
            .split_first_chunk::<NONCE_LEN>()
            .ok_or_else(|| FheError::InvalidProof("truncated nonce".to_string()))?;
        let (len, tail) = tail
            .split_first_chunk::<2>()
            .ok_or_else(|| FheError::InvalidProof("truncated length".to_string()))?;
        let len = usize::from(u16::from_be_bytes(*len));
        if tail.len() < len {
            return Err(FheError::InvalidProof("truncated ciphertext".to_string()));
        }
        let (ciphertext, tail) = tail.split_at(len);
        entries.push(SealedValue {
            ephemeral_public_key: *ephemeral_public_key,
            nonce: *nonce,
            ciphertext: ciphertext.to_vec(),
        });
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(FheError::InvalidProof("trailing bytes".to_string()));
    }
    Ok(entries)
}
