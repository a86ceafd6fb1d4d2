use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::FheError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

const SEAL_SALT: &[u8] = b"mood-diary/seal-salt";
const SEAL_INFO_PREFIX: &[u8] = b"mood-diary/seal/v1";

/// X25519 keypair that values are sealed to. Used both as the node's network
/// input key and as the per-user re-encryption key of a decryption signature.
#[derive(Clone)]
pub struct SealingKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl fmt::Debug for SealingKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealingKeypair")
            .field("public", &hex_prefix(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

impl SealingKeypair {
    pub fn generate() -> Self {
        let mut seed = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut seed);
        let keypair = Self::from_secret_bytes(seed);
        seed.zeroize();
        keypair
    }

    pub fn from_secret_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_slice(bytes: &[u8]) -> Result<Self, FheError> {
        let mut raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            FheError::InvalidKey(format!(
                "expected {KEY_LEN}-byte secret, got {}",
                bytes.len()
            ))
        })?;
        let keypair = Self::from_secret_bytes(raw);
        raw.zeroize();
        Ok(keypair)
    }

    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn open(&self, sealed: &SealedValue, aad: &[u8]) -> Result<Vec<u8>, FheError> {
        let ephemeral = PublicKey::from(sealed.ephemeral_public_key);
        let shared = self.secret.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(FheError::Open);
        }
        let key = derive_key(
            shared.as_bytes(),
            &sealed.ephemeral_public_key,
            self.public.as_bytes(),
        )?;
        ChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad,
                },
            )
            .map_err(|_| FheError::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub ephemeral_public_key: [u8; KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` so only the holder of `recipient_public_key` can open
/// it; `aad` must be presented again on open.
pub fn seal(
    recipient_public_key: &[u8; KEY_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedValue, FheError> {
    let ephemeral = SealingKeypair::generate();
    let recipient = PublicKey::from(*recipient_public_key);
    let shared = ephemeral.secret.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(FheError::InvalidKey(
            "recipient public key is a low-order point".to_string(),
        ));
    }
    let ephemeral_public_key = ephemeral.public_key();
    let key = derive_key(shared.as_bytes(), &ephemeral_public_key, recipient_public_key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| FheError::Seal)?;

    Ok(SealedValue {
        ephemeral_public_key,
        nonce,
        ciphertext,
    })
}

fn derive_key(
    shared: &[u8; KEY_LEN],
    ephemeral_public: &[u8; KEY_LEN],
    recipient_public: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, FheError> {
    let mut info = Vec::with_capacity(SEAL_INFO_PREFIX.len() + 2 * KEY_LEN);
    info.extend_from_slice(SEAL_INFO_PREFIX);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(SEAL_SALT), shared);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(&info, &mut okm[..]).map_err(|_| FheError::Seal)?;
    Ok(okm)
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
