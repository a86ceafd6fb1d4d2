use crate::FheError;

pub const ENCODED_LEN: usize = 33;

const TAG_BOOL: u8 = 0;
const TAG_UINT: u8 = 1;

/// A decrypted value. Unsigned integers are kept at full 256-bit width
/// (big-endian) so oversized results stay observable instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearValue {
    Bool(bool),
    Uint([u8; 32]),
}

impl ClearValue {
    pub fn uint(value: u128) -> Self {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        ClearValue::Uint(word)
    }

    /// The value as `u128` when it is an integer that fits.
    pub fn as_u128(&self) -> Option<u128> {
        match self {
            ClearValue::Bool(_) => None,
            ClearValue::Uint(word) => {
                if word[..16].iter().any(|byte| *byte != 0) {
                    return None;
                }
                let mut low = [0u8; 16];
                low.copy_from_slice(&word[16..]);
                Some(u128::from_be_bytes(low))
            }
        }
    }

    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut out = [0u8; ENCODED_LEN];
        match self {
            ClearValue::Bool(value) => {
                out[0] = TAG_BOOL;
                out[ENCODED_LEN - 1] = u8::from(*value);
            }
            ClearValue::Uint(word) => {
                out[0] = TAG_UINT;
                out[1..].copy_from_slice(word);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FheError> {
        if bytes.len() != ENCODED_LEN {
            return Err(FheError::MalformedPlaintext(format!(
                "expected {ENCODED_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        match bytes[0] {
            TAG_BOOL => {
                let flag = bytes[ENCODED_LEN - 1];
                let padding = &bytes[1..ENCODED_LEN - 1];
                if padding.iter().any(|byte| *byte != 0) || flag > 1 {
                    return Err(FheError::MalformedPlaintext(
                        "boolean plaintext has non-canonical encoding".to_string(),
                    ));
                }
                Ok(ClearValue::Bool(flag == 1))
            }
            TAG_UINT => {
                let mut word = [0u8; 32];
                word.copy_from_slice(&bytes[1..]);
                Ok(ClearValue::Uint(word))
            }
            tag => Err(FheError::MalformedPlaintext(format!(
                "unknown plaintext tag {tag}"
            ))),
        }
    }
}
