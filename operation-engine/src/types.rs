//! Core value types shared by facts, operations and states
//!
//! All types are designed for:
//! - Deterministic serialization (bincode) so fact hashes are stable
//! - Exact arithmetic (Decimal for money)
//! - Validation at construction, so a held value is always well-formed

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;

/// Block height a processing session is bound to
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Height(u64);

impl Height {
    /// Create new height
    pub const fn new(height: u64) -> Self {
        Self(height)
    }

    /// Raw height
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 digest used for fact and operation identity
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

/// Network identifier mixed into every sign message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(Vec<u8>);

impl NetworkId {
    /// Create new network ID
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self(id.into())
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Account address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Minimum address length
    pub const MIN_LEN: usize = 3;
    /// Maximum address length
    pub const MAX_LEN: usize = 100;

    /// Create new address, validating its format
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        if address.len() < Self::MIN_LEN || address.len() > Self::MAX_LEN {
            return Err(Error::Other(format!(
                "invalid address length {}: {:?}",
                address.len(),
                address
            )));
        }
        if !address.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Other(format!(
                "address must be ascii alphanumeric: {:?}",
                address
            )));
        }
        Ok(Self(address))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency identifier, e.g. `CUR`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyId(String);

impl CurrencyId {
    /// Create new currency ID (3..=10 upper-case alphanumeric chars)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid_len = (3..=10).contains(&id.len());
        let valid_chars = id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid_len || !valid_chars {
            return Err(Error::Other(format!("invalid currency id: {:?}", id)));
        }
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount of one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// Currency
    pub currency: CurrencyId,
    /// Exact value
    pub value: Decimal,
}

impl Amount {
    /// Create new amount
    pub fn new(value: Decimal, currency: CurrencyId) -> Self {
        Self { currency, value }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// Semantic version attached to a hint
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    /// Major version; hints are compatible only within one major
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Patch version
    pub patch: u16,
}

impl Version {
    /// Create new version
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Type discriminant used for dispatch, e.g. `currency-transfer-operation-v0.0.1`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hint {
    kind: Cow<'static, str>,
    version: Version,
}

impl Hint {
    /// Hint with a static type name, usable in `const` items
    pub const fn from_static(kind: &'static str, version: Version) -> Self {
        Self {
            kind: Cow::Borrowed(kind),
            version,
        }
    }

    /// Hint with an owned type name
    pub fn new(kind: impl Into<String>, version: Version) -> Self {
        Self {
            kind: Cow::Owned(kind.into()),
            version,
        }
    }

    /// Parse `kind-vMAJOR.MINOR.PATCH`
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::Other(format!("invalid hint: {:?}", s));

        let (kind, version) = s.rsplit_once("-v").ok_or_else(invalid)?;
        if kind.is_empty() {
            return Err(invalid());
        }

        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut numbers = [0u16; 3];
        for (slot, part) in numbers.iter_mut().zip(parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self::new(
            kind,
            Version::new(numbers[0], numbers[1], numbers[2]),
        ))
    }

    /// Type name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Same type and same major version
    pub fn is_compatible(&self, other: &Hint) -> bool {
        self.kind == other.kind && self.version.major == other.version.major
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.version)
    }
}

/// Proposal the current session builds a block from
///
/// Only the parts proposal-aware processors consume are carried here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Height being proposed
    pub height: Height,
    /// Live suffrage members at this height
    pub suffrage: Vec<Address>,
    /// Operation hashes included in the proposal
    pub operations: Vec<Hash>,
}

impl Proposal {
    /// Number of live suffrage members
    pub fn suffrage_size(&self) -> usize {
        self.suffrage.len()
    }
}
