use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexParseError {
    #[error("hex value must start with 0x")]
    MissingPrefix,
    #[error("invalid hex digits: {0}")]
    InvalidDigits(String),
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Fixed-width byte strings rendered as `0x`-prefixed lowercase hex.
macro_rules! hex_newtype {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;
            pub const ZERO: Self = Self([0u8; $len]);

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|byte| *byte == 0)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, HexParseError> {
                let raw: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| HexParseError::WrongLength {
                            expected: $len,
                            actual: bytes.len(),
                        })?;
                Ok(Self(raw))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = HexParseError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let value = value.trim();
                let digits = value
                    .strip_prefix("0x")
                    .or_else(|| value.strip_prefix("0X"))
                    .ok_or(HexParseError::MissingPrefix)?;
                let bytes = hex::decode(digits)
                    .map_err(|err| HexParseError::InvalidDigits(err.to_string()))?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(Address, 20);
hex_newtype!(Handle, 32);
hex_newtype!(TxHash, 32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoodScoreError {
    #[error("Mood score must be between 1 and 5.")]
    OutOfRange,
    #[error("Mood score must be a whole number.")]
    NotWholeNumber,
}

/// A validated diary entry in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoodScore(u8);

impl MoodScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Validates a raw score as entered by the user. Range is checked before
    /// integrality, so `NaN` reports as not a whole number.
    pub fn from_raw(raw: f64) -> Result<Self, MoodScoreError> {
        if raw < f64::from(Self::MIN) || raw > f64::from(Self::MAX) {
            return Err(MoodScoreError::OutOfRange);
        }
        if !raw.is_finite() || raw.fract() != 0.0 {
            return Err(MoodScoreError::NotWholeNumber);
        }
        Ok(Self(raw as u8))
    }

    pub fn new(value: u8) -> Result<Self, MoodScoreError> {
        Self::from_raw(f64::from(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "Stormy",
            2 => "Cloudy",
            3 => "Calm",
            4 => "Bright",
            _ => "Radiant",
        }
    }

    pub fn tone(self) -> &'static str {
        match self.0 {
            1 => "Anxious or drained",
            2 => "Low energy",
            3 => "Balanced baseline",
            4 => "Motivated",
            _ => "Joyful & energized",
        }
    }
}

impl fmt::Display for MoodScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}
