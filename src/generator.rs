//! # Secret Material Generator
//!
//! Produces high-entropy key material for descriptors that ask for a generated
//! value. Every value comes from the operating system's CSPRNG; generation never
//! touches a remote store.
//!
//! - `hex256`: 32 random bytes, lowercase hex (64 characters). Used for token
//!   signing keys.
//! - `symmetric-fernet-equivalent`: 32 random bytes, URL-safe base64 with
//!   padding (44 characters). Accepted as a Fernet key and usable as an
//!   AES-256-GCM key once decoded.

use crate::constants::GENERATED_KEY_BYTES;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

/// Algorithms a descriptor can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretAlgorithm {
    #[serde(rename = "hex256")]
    Hex256,
    #[serde(rename = "symmetric-fernet-equivalent")]
    SymmetricKey,
}

#[derive(Debug, Error)]
#[error("unknown secret algorithm '{0}' (expected 'hex256' or 'symmetric-fernet-equivalent')")]
pub struct UnknownAlgorithm(pub String);

impl SecretAlgorithm {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretAlgorithm::Hex256 => "hex256",
            SecretAlgorithm::SymmetricKey => "symmetric-fernet-equivalent",
        }
    }
}

impl fmt::Display for SecretAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex256" => Ok(SecretAlgorithm::Hex256),
            "symmetric-fernet-equivalent" | "fernet" => Ok(SecretAlgorithm::SymmetricKey),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Generate a fresh value for `algorithm`
#[must_use]
pub fn generate(algorithm: SecretAlgorithm) -> String {
    let mut bytes = Zeroizing::new([0u8; GENERATED_KEY_BYTES]);
    OsRng.fill_bytes(bytes.as_mut_slice());

    match algorithm {
        SecretAlgorithm::Hex256 => hex::encode(bytes.as_slice()),
        SecretAlgorithm::SymmetricKey => general_purpose::URL_SAFE.encode(bytes.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_hex256_decodes_to_32_bytes() {
        let value = generate(SecretAlgorithm::Hex256);
        assert_eq!(value.len(), 64);
        assert!(value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(hex::decode(&value).unwrap().len(), 32);
    }

    #[test]
    fn test_symmetric_key_is_fernet_shaped() {
        let value = generate(SecretAlgorithm::SymmetricKey);
        assert_eq!(value.len(), 44);
        let decoded = general_purpose::URL_SAFE.decode(&value).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_no_collisions_across_ten_thousand_draws() {
        let mut seen = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            assert!(seen.insert(generate(SecretAlgorithm::Hex256)));
        }
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("hex256".parse::<SecretAlgorithm>().unwrap(), SecretAlgorithm::Hex256);
        assert_eq!(
            "fernet".parse::<SecretAlgorithm>().unwrap(),
            SecretAlgorithm::SymmetricKey
        );
        assert!("md5".parse::<SecretAlgorithm>().is_err());
    }
}
