//! Cryptographic primitives used by the pipeline
//!
//! This module provides:
//! - Ed25519 key pairs, public keys and signatures
//! - Signature verification over sign messages (`network_id || fact_hash`)
//!
//! Hashing lives on [`crate::types::Hash`].

use crate::{Error, Result};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify a signature made by this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
        verifying_key.verify(message, &dalek_sig).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// Digital signature (Ed25519)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature bytes (64 bytes)
    #[serde(with = "serde_bytes")]
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.bytes[..8]))
    }
}

/// Ed25519 key pair for signing
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.verifying_key.to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::from_bytes(self.signing_key.sign(message).to_bytes())
    }

    /// Verify a signature
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
        self.verifying_key
            .verify(message, &dalek_sig)
            .map_err(|e| Error::Other(format!("Verification failed: {}", e)))
    }
}
