//! Typed state values

use crate::crypto::PublicKey;
use crate::types::{Address, Amount, CurrencyId, Hash};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Value stored under a state key, or a delta against one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    /// Account keys
    Account(Account),
    /// Committed balance of one currency
    Balance(Amount),
    /// Balance credit, merged at commit time
    AddBalance(Amount),
    /// Balance debit, merged at commit time
    DeductBalance(Amount),
    /// Currency design and fee policy
    CurrencyDesign(CurrencyDesign),
    /// Contract account ownership and status
    ContractAccount(ContractAccountStatus),
    /// DID method registered on a contract
    DidDesign(DidDesign),
    /// DID issued for an account
    DidData(DidData),
    /// DID document
    DidDocument(DidDocument),
    /// Pending suffrage candidates
    SuffrageCandidates(Vec<Address>),
}

impl StateValue {
    /// Variant name, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Account(_) => "account",
            StateValue::Balance(_) => "balance",
            StateValue::AddBalance(_) => "add-balance",
            StateValue::DeductBalance(_) => "deduct-balance",
            StateValue::CurrencyDesign(_) => "currency-design",
            StateValue::ContractAccount(_) => "contract-account",
            StateValue::DidDesign(_) => "did-design",
            StateValue::DidData(_) => "did-data",
            StateValue::DidDocument(_) => "did-document",
            StateValue::SuffrageCandidates(_) => "suffrage-candidates",
        }
    }
}

/// One weighted key of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKey {
    /// Public key
    pub key: PublicKey,
    /// Weight (1..=100)
    pub weight: u8,
}

impl AccountKey {
    /// Create new weighted key
    pub fn new(key: PublicKey, weight: u8) -> Self {
        Self { key, weight }
    }
}

/// Weighted key set with a signing threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeys {
    keys: Vec<AccountKey>,
    threshold: u8,
}

impl AccountKeys {
    /// Highest weight or threshold
    pub const MAX_WEIGHT: u8 = 100;

    /// Create new key set
    pub fn new(keys: Vec<AccountKey>, threshold: u8) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::Other("account keys must not be empty".to_string()));
        }
        if threshold == 0 || threshold > Self::MAX_WEIGHT {
            return Err(Error::Other(format!("invalid threshold {}", threshold)));
        }

        let mut seen = HashSet::new();
        let mut total: u32 = 0;
        for key in &keys {
            if key.weight == 0 || key.weight > Self::MAX_WEIGHT {
                return Err(Error::Other(format!(
                    "invalid weight {} for key {}",
                    key.weight, key.key
                )));
            }
            if !seen.insert(key.key) {
                return Err(Error::Other(format!("duplicated account key {}", key.key)));
            }
            total += u32::from(key.weight);
        }
        if total < u32::from(threshold) {
            return Err(Error::Other(format!(
                "sum of weights {} below threshold {}",
                total, threshold
            )));
        }

        Ok(Self { keys, threshold })
    }

    /// Single key with full weight
    pub fn single(key: PublicKey) -> Self {
        Self {
            keys: vec![AccountKey::new(key, Self::MAX_WEIGHT)],
            threshold: Self::MAX_WEIGHT,
        }
    }

    /// Keys
    pub fn keys(&self) -> &[AccountKey] {
        &self.keys
    }

    /// Threshold
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Weight of a key, if it belongs to this set
    pub fn weight_of(&self, key: &PublicKey) -> Option<u8> {
        self.keys.iter().find(|k| &k.key == key).map(|k| k.weight)
    }

    /// Address derived from the key set
    pub fn address(&self) -> Result<Address> {
        let bytes = bincode::serialize(self)?;
        derive_address(&bytes)
    }

    /// Address of a contract account created by `owner` with this key set
    pub fn contract_address(&self, owner: &Address) -> Result<Address> {
        let mut bytes = bincode::serialize(self)?;
        bytes.extend_from_slice(owner.as_str().as_bytes());
        derive_address(&bytes)
    }
}

fn derive_address(bytes: &[u8]) -> Result<Address> {
    let digest = Hash::digest(bytes).to_string();
    Address::new(&digest[..40])
}

/// Account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Address
    pub address: Address,
    /// Signing keys; contract accounts have none
    pub keys: Option<AccountKeys>,
}

impl Account {
    /// Account controlled by keys
    pub fn new(address: Address, keys: AccountKeys) -> Self {
        Self {
            address,
            keys: Some(keys),
        }
    }

    /// Keyless account (contract)
    pub fn keyless(address: Address) -> Self {
        Self {
            address,
            keys: None,
        }
    }
}

/// Fee rule of a currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feeer {
    /// No fee
    Nil,
    /// Fixed amount per charge
    Fixed {
        /// Fee receiver
        receiver: Address,
        /// Fee amount
        amount: Decimal,
    },
    /// Ratio of the charged amount, clamped to `[min, max]`
    Ratio {
        /// Fee receiver
        receiver: Address,
        /// Ratio (0..=1)
        ratio: Decimal,
        /// Lower bound
        min: Decimal,
        /// Upper bound
        max: Decimal,
    },
}

/// Currency policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPolicy {
    /// Minimum amount a new account must be funded with
    pub min_balance: Decimal,
    /// Flat fee over the total charged amount
    pub feeer: Feeer,
    /// Fee charged per item, if the currency prices items individually
    pub item_feeer: Option<Feeer>,
}

impl CurrencyPolicy {
    /// Policy with a flat fee only
    pub fn new(min_balance: Decimal, feeer: Feeer) -> Self {
        Self {
            min_balance,
            feeer,
            item_feeer: None,
        }
    }

    /// Add per-item pricing
    pub fn with_item_feeer(mut self, item_feeer: Feeer) -> Self {
        self.item_feeer = Some(item_feeer);
        self
    }
}

/// Currency design
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDesign {
    /// Currency
    pub currency: CurrencyId,
    /// Account that received the initial supply
    pub genesis_account: Address,
    /// Total supply
    pub total_supply: Decimal,
    /// Policy
    pub policy: CurrencyPolicy,
}

/// Contract account ownership and status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAccountStatus {
    /// Owner
    pub owner: Address,
    /// Whether a service model is registered on the contract
    pub is_active: bool,
    /// Accounts allowed to act for the owner
    pub handlers: Vec<Address>,
}

impl ContractAccountStatus {
    /// Inactive contract owned by `owner`
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            is_active: false,
            handlers: Vec::new(),
        }
    }

    /// Owner or one of the handlers
    pub fn is_owner_or_handler(&self, address: &Address) -> bool {
        &self.owner == address || self.handlers.contains(address)
    }
}

/// DID method registered on a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDesign {
    /// DID method name, e.g. `ledger`
    pub method: String,
}

impl DidDesign {
    /// DID string for an account
    pub fn did_of(&self, address: &Address) -> String {
        format!("did:{}:{}", self.method, address)
    }
}

/// DID issued for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidData {
    /// Subject account
    pub address: Address,
    /// DID
    pub did: String,
}

/// Authentication method of a DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// Method ID, e.g. `did:ledger:abc#auth-1`
    pub id: String,
    /// Verification key
    pub public_key: PublicKey,
}

/// DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    /// DID
    pub did: String,
    /// Account controlling the document
    pub controller: Address,
    /// Deactivated documents authenticate nothing
    pub active: bool,
    /// Authentication methods
    pub authentication: Vec<VerificationMethod>,
}

impl DidDocument {
    /// Authentication method by ID
    pub fn authentication_method(&self, id: &str) -> Option<&VerificationMethod> {
        self.authentication.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn key(seed: u8) -> PublicKey {
        KeyPair::from_seed(&[seed; 32]).public_key()
    }

    #[test]
    fn test_account_keys_validation() {
        assert!(AccountKeys::new(vec![], 50).is_err());
        assert!(AccountKeys::new(vec![AccountKey::new(key(1), 40)], 50).is_err());
        assert!(AccountKeys::new(vec![AccountKey::new(key(1), 0)], 1).is_err());
        assert!(AccountKeys::new(
            vec![AccountKey::new(key(1), 50), AccountKey::new(key(1), 50)],
            100
        )
        .is_err());

        let keys = AccountKeys::new(
            vec![AccountKey::new(key(1), 50), AccountKey::new(key(2), 50)],
            100,
        )
        .unwrap();
        assert_eq!(keys.weight_of(&key(2)), Some(50));
        assert_eq!(keys.weight_of(&key(3)), None);
    }

    #[test]
    fn test_address_derivation_is_deterministic() {
        let keys = AccountKeys::single(key(1));
        let a = keys.address().unwrap();
        assert_eq!(a, AccountKeys::single(key(1)).address().unwrap());
        assert_ne!(a, AccountKeys::single(key(2)).address().unwrap());
        assert_ne!(a, keys.contract_address(&a).unwrap());
    }

    #[test]
    fn test_contract_status_handlers() {
        let owner = Address::new("owner01").unwrap();
        let handler = Address::new("handler01").unwrap();
        let mut status = ContractAccountStatus::new(owner.clone());
        assert!(status.is_owner_or_handler(&owner));
        assert!(!status.is_owner_or_handler(&handler));

        status.handlers.push(handler.clone());
        assert!(status.is_owner_or_handler(&handler));
    }
}
