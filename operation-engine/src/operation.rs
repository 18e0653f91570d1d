//! Signed operation envelope

use crate::crypto::{KeyPair, PublicKey, Signature};
use crate::error::{ProcessResult, ReasonError};
use crate::extension::Extensions;
use crate::fact::Fact;
use crate::types::{Hash, Hint, NetworkId};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Message every sign of a fact covers: `network_id || fact_hash`
pub fn sign_message(network_id: &NetworkId, fact_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(network_id.as_bytes().len() + 32);
    message.extend_from_slice(network_id.as_bytes());
    message.extend_from_slice(fact_hash.as_bytes());
    message
}

/// One signature attached to an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sign {
    signer: PublicKey,
    signature: Signature,
    signed_at: DateTime<Utc>,
}

impl Sign {
    /// Sign `fact_hash` on `network_id`
    pub fn new(keypair: &KeyPair, network_id: &NetworkId, fact_hash: &Hash) -> Self {
        Self {
            signer: keypair.public_key(),
            signature: keypair.sign(&sign_message(network_id, fact_hash)),
            signed_at: Utc::now(),
        }
    }

    /// Assemble from parts
    pub fn from_parts(signer: PublicKey, signature: Signature, signed_at: DateTime<Utc>) -> Self {
        Self {
            signer,
            signature,
            signed_at,
        }
    }

    /// Signer key
    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    /// Signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Signing time
    pub fn signed_at(&self) -> DateTime<Utc> {
        self.signed_at
    }

    /// Whether the signature covers `fact_hash` on `network_id`
    pub fn verify(&self, network_id: &NetworkId, fact_hash: &Hash) -> bool {
        self.signer
            .verify(&sign_message(network_id, fact_hash), &self.signature)
    }
}

/// Hint + fact + signs + extensions
///
/// Immutable once built; the hash covers the fact hash and the signs.
#[derive(Debug, Clone)]
pub struct Operation {
    hint: Hint,
    fact: Arc<dyn Fact>,
    signs: Vec<Sign>,
    extensions: Extensions,
    hash: Hash,
}

impl Operation {
    /// Create new operation
    pub fn new(
        hint: Hint,
        fact: Arc<dyn Fact>,
        signs: Vec<Sign>,
        extensions: Extensions,
    ) -> Result<Self> {
        let hash = Self::compute_hash(fact.hash(), &signs)?;
        Ok(Self {
            hint,
            fact,
            signs,
            extensions,
            hash,
        })
    }

    /// Operation signed by each of `keypairs`
    pub fn signed(
        hint: Hint,
        fact: Arc<dyn Fact>,
        keypairs: &[&KeyPair],
        network_id: &NetworkId,
        extensions: Extensions,
    ) -> Result<Self> {
        let fact_hash = fact.hash();
        let signs = keypairs
            .iter()
            .map(|keypair| Sign::new(keypair, network_id, &fact_hash))
            .collect();
        Self::new(hint, fact, signs, extensions)
    }

    fn compute_hash(fact_hash: Hash, signs: &[Sign]) -> Result<Hash> {
        let bytes = bincode::serialize(&(fact_hash, signs))?;
        Ok(Hash::digest(&bytes))
    }

    /// Operation type
    pub fn hint(&self) -> &Hint {
        &self.hint
    }

    /// Fact
    pub fn fact(&self) -> &dyn Fact {
        self.fact.as_ref()
    }

    /// Signs
    pub fn signs(&self) -> &[Sign] {
        &self.signs
    }

    /// Extensions
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Operation hash
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// At least one sign, no repeated signer, and every sign verifies
    pub fn verify_signs(&self, network_id: &NetworkId) -> ProcessResult<()> {
        if self.signs.is_empty() {
            return Err(ReasonError::unauthorized("operation carries no signs").into());
        }

        let fact_hash = self.fact.hash();
        let mut signers = HashSet::new();
        for sign in &self.signs {
            if !signers.insert(sign.signer) {
                return Err(ReasonError::invalid(format!(
                    "duplicated sign by {}",
                    sign.signer
                ))
                .into());
            }
            if !sign.verify(network_id, &fact_hash) {
                return Err(ReasonError::unauthorized(format!(
                    "invalid sign by {}",
                    sign.signer
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Keys with a verified sign
    pub fn verified_signers(&self, network_id: &NetworkId) -> Vec<PublicKey> {
        let fact_hash = self.fact.hash();
        let mut signers: Vec<PublicKey> = self
            .signs
            .iter()
            .filter(|sign| sign.verify(network_id, &fact_hash))
            .map(|sign| sign.signer)
            .collect();
        signers.sort();
        signers.dedup();
        signers
    }
}
