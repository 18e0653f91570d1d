//! Facts and the capabilities they expose
//!
//! A fact is the hash-identified payload of an operation. The pipeline never
//! inspects concrete fact types; it asks the [`Fact`] trait object for the
//! capabilities it needs (signer, duplication keys, fee schedule, ...). Each
//! concrete fact answers those statically by overriding the default `None`.
//! Processors downcast to their own fact type with [`downcast_fact`].

use crate::config::LimitsConfig;
use crate::duplication::DuplicationKeySet;
use crate::error::{ProcessResult, ReasonError};
use crate::types::{Address, Amount, CurrencyId, Hash, Hint};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Hash-identified operation payload
pub trait Fact: Send + Sync + fmt::Debug {
    /// Fact type
    fn hint(&self) -> &Hint;

    /// Replay tag chosen by the client
    fn token(&self) -> &[u8];

    /// Content hash, computed once at construction
    fn hash(&self) -> Hash;

    /// For typed downcasts by processors
    fn as_any(&self) -> &dyn Any;

    /// Structural validation against configured limits
    fn validate(&self, limits: &LimitsConfig) -> ProcessResult<()>;

    /// Canonical signer whose account threshold authorizes the operation
    fn signer(&self) -> Option<&Address> {
        None
    }

    /// Semantic keys that may be used once per session
    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        None
    }

    /// Fee schedule
    fn fee(&self) -> Option<&dyn FeeAble> {
        None
    }

    /// Account the fact acts on behalf of
    fn fact_user(&self) -> Option<&Address> {
        None
    }

    /// Contract accounts the fact may only touch as owner or handler
    fn contract_owner_only(&self) -> Option<Vec<ContractAccess>> {
        None
    }

    /// Contract accounts that must be active
    fn active_contracts(&self) -> Option<Vec<Address>> {
        None
    }
}

/// Fee schedule of a fact
pub trait FeeAble {
    /// Account paying the fee unless an extension overrides it
    fn fee_payer(&self) -> &Address;

    /// Charged item amounts per fee currency
    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>>;
}

/// Contract status an owner-only fact requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractStatusRequirement {
    /// Any status
    Any,
    /// Active contract
    Active,
    /// Inactive contract
    Inactive,
}

impl ContractStatusRequirement {
    /// Whether `is_active` satisfies the requirement
    pub fn allows(&self, is_active: bool) -> bool {
        match self {
            ContractStatusRequirement::Any => true,
            ContractStatusRequirement::Active => is_active,
            ContractStatusRequirement::Inactive => !is_active,
        }
    }
}

/// One contract account an owner-only fact touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAccess {
    /// Contract account
    pub contract: Address,
    /// Account acting on it
    pub actor: Address,
    /// Required status
    pub status: ContractStatusRequirement,
}

impl ContractAccess {
    /// Create new access requirement
    pub fn new(contract: Address, actor: Address, status: ContractStatusRequirement) -> Self {
        Self {
            contract,
            actor,
            status,
        }
    }
}

/// Downcast a fact to its concrete type
///
/// A mismatch means an operation hint was bound to the wrong fact type, which
/// is a wiring defect rather than a bad operation.
pub fn downcast_fact<T: Fact + 'static>(fact: &dyn Fact) -> Result<&T> {
    fact.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: fact.hint().to_string(),
        })
}

/// SHA-256 over the canonical bincode encoding
pub fn fact_hash<T: Serialize>(fact: &T) -> Result<Hash> {
    Ok(Hash::digest(&bincode::serialize(fact)?))
}

/// Reject an empty replay tag
pub fn validate_token(token: &[u8]) -> ProcessResult<()> {
    if token.is_empty() {
        return Err(ReasonError::invalid("empty token").into());
    }
    Ok(())
}

/// Reject an empty item list or one above `limit`
pub fn validate_item_count(count: usize, limit: usize) -> ProcessResult<()> {
    if count == 0 {
        return Err(ReasonError::invalid("empty items").into());
    }
    if count > limit {
        return Err(
            ReasonError::limit_exceeded(format!("{} items over limit {}", count, limit)).into(),
        );
    }
    Ok(())
}

/// Amounts of one item: non-empty, within limits, strictly positive and
/// one entry per currency
pub fn validate_amounts(amounts: &[Amount], limits: &LimitsConfig) -> ProcessResult<()> {
    if amounts.is_empty() {
        return Err(ReasonError::invalid("empty amounts").into());
    }
    if amounts.len() > limits.max_amounts_per_item {
        return Err(ReasonError::limit_exceeded(format!(
            "{} amounts over limit {}",
            amounts.len(),
            limits.max_amounts_per_item
        ))
        .into());
    }

    let mut seen = BTreeSet::new();
    for amount in amounts {
        if amount.value <= Decimal::ZERO {
            return Err(ReasonError::invalid(format!("non-positive amount {}", amount)).into());
        }
        if !seen.insert(&amount.currency) {
            return Err(ReasonError::invalid(format!(
                "duplicated currency {} in item",
                amount.currency
            ))
            .into());
        }
    }
    Ok(())
}

/// Per-currency item amounts of a list of amount vectors
pub(crate) fn amounts_fee_base<'a>(
    items: impl IntoIterator<Item = &'a [Amount]>,
) -> BTreeMap<CurrencyId, Vec<Decimal>> {
    let mut base: BTreeMap<CurrencyId, Vec<Decimal>> = BTreeMap::new();
    for amounts in items {
        for amount in amounts {
            base.entry(amount.currency.clone())
                .or_default()
                .push(amount.value);
        }
    }
    base
}
