//! Account creation
//!
//! The new account's address is derived from its key set. Every funded
//! currency must meet the currency policy's minimum balance.

use super::{Bound, Processor, DEFAULT_PROCESSOR_CAPACITY};
use crate::config::LimitsConfig;
use crate::context::OpContext;
use crate::duplication::{DuplicationKeySet, DuplicationKeyType};
use crate::error::{ProcessResult, ReasonError};
use crate::fact::{self, downcast_fact, Fact, FeeAble};
use crate::operation::Operation;
use crate::pool::{ObjectPool, Reset};
use crate::state::{
    account_state_key, lookup, Account, AccountKeys, StateMergeValue, StateReader, StateValue,
};
use crate::types::{Address, Amount, CurrencyId, Hash, Height, Hint, Version};
use crate::{Error, Result};
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Create-account operation hint
pub const CREATE_ACCOUNT_HINT: Hint =
    Hint::from_static("currency-create-account-operation", Version::new(0, 0, 1));

/// Create-account fact hint
pub const CREATE_ACCOUNT_FACT_HINT: Hint = Hint::from_static(
    "currency-create-account-operation-fact",
    Version::new(0, 0, 1),
);

/// One account to create and fund
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateAccountItem {
    keys: AccountKeys,
    amounts: Vec<Amount>,
    address: Address,
}

impl CreateAccountItem {
    /// Create new item; the address is derived from `keys`
    pub fn new(keys: AccountKeys, amounts: Vec<Amount>) -> Result<Self> {
        let address = keys.address()?;
        Ok(Self {
            keys,
            amounts,
            address,
        })
    }

    /// Keys
    pub fn keys(&self) -> &AccountKeys {
        &self.keys
    }

    /// Initial amounts
    pub fn amounts(&self) -> &[Amount] {
        &self.amounts
    }

    /// Derived address
    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// Create accounts funded by the sender
#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    items: Vec<CreateAccountItem>,
    #[serde(skip)]
    hash: Hash,
}

impl CreateAccountFact {
    /// Create new fact
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        items: Vec<CreateAccountItem>,
    ) -> Result<Self> {
        let mut fact = Self {
            hint: CREATE_ACCOUNT_FACT_HINT,
            token: token.into(),
            sender,
            items,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }

    /// Sender
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Items
    pub fn items(&self) -> &[CreateAccountItem] {
        &self.items
    }
}

/// Shared validation of account-creating items
pub(crate) fn validate_new_accounts<'a>(
    sender: &Address,
    items: impl IntoIterator<Item = (&'a Address, &'a AccountKeys, &'a [Amount])>,
    limits: &LimitsConfig,
) -> ProcessResult<()> {
    let mut addresses = BTreeSet::new();
    for (address, keys, amounts) in items {
        fact::validate_amounts(amounts, limits)?;
        if keys.keys().len() > limits.max_keys {
            return Err(ReasonError::limit_exceeded(format!(
                "{} keys over limit {}",
                keys.keys().len(),
                limits.max_keys
            ))
            .into());
        }
        if address == sender {
            return Err(ReasonError::invalid(format!("{} creates itself", sender)).into());
        }
        if !addresses.insert(address) {
            return Err(ReasonError::invalid(format!("duplicated new account {}", address)).into());
        }
    }
    Ok(())
}

/// Shared admission rules of account-creating items
pub(crate) fn check_new_accounts<'a>(
    reader: &dyn StateReader,
    sender: &Address,
    items: impl IntoIterator<Item = (&'a Address, &'a [Amount])>,
) -> ProcessResult<()> {
    lookup::existing_account(reader, sender)?;

    for (address, amounts) in items {
        lookup::ensure_account_absent(reader, address)?;
        for amount in amounts {
            let design = lookup::existing_currency_design(reader, &amount.currency)?;
            if amount.value < design.policy.min_balance {
                return Err(ReasonError::invalid(format!(
                    "{} below minimum balance {} of {}",
                    amount, design.policy.min_balance, amount.currency
                ))
                .into());
            }
            lookup::existing_balance(reader, sender, &amount.currency)?;
        }
    }
    Ok(())
}

/// Credits to the new accounts followed by the sender's total debits
pub(crate) fn funding_values<'a>(
    sender: &Address,
    items: impl IntoIterator<Item = (&'a Address, &'a [Amount])>,
) -> Result<Vec<StateMergeValue>> {
    let mut values = Vec::new();
    let mut totals: BTreeMap<CurrencyId, Decimal> = BTreeMap::new();

    for (address, amounts) in items {
        for amount in amounts {
            values.push(StateMergeValue::add_balance(address, amount.clone()));
            let total = totals.entry(amount.currency.clone()).or_insert(Decimal::ZERO);
            *total = total.checked_add(amount.value).ok_or_else(|| {
                Error::Arithmetic(format!("funding total overflow in {}", amount.currency))
            })?;
        }
    }

    values.extend(
        totals
            .into_iter()
            .map(|(currency, total)| StateMergeValue::deduct_balance(sender, Amount::new(total, currency))),
    );
    Ok(values)
}

impl Fact for CreateAccountFact {
    fn hint(&self) -> &Hint {
        &self.hint
    }

    fn token(&self) -> &[u8] {
        &self.token
    }

    fn hash(&self) -> Hash {
        self.hash
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn validate(&self, limits: &LimitsConfig) -> ProcessResult<()> {
        fact::validate_token(&self.token)?;
        fact::validate_item_count(self.items.len(), limits.max_items)?;
        validate_new_accounts(
            &self.sender,
            self.items
                .iter()
                .map(|item| (&item.address, &item.keys, item.amounts.as_slice())),
            limits,
        )
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        let mut keys = DuplicationKeySet::new().with(DuplicationKeyType::Sender, self.sender.as_str());
        for item in &self.items {
            keys.insert(DuplicationKeyType::NewAccount, item.address.as_str());
        }
        Some(keys)
    }

    fn fee(&self) -> Option<&dyn FeeAble> {
        Some(self)
    }
}

impl FeeAble for CreateAccountFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        fact::amounts_fee_base(self.items.iter().map(|item| item.amounts.as_slice()))
    }
}

lazy_static! {
    static ref POOL: ObjectPool<CreateAccountProcessor> =
        ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
}

/// Create-account processor
#[derive(Debug, Default)]
pub struct CreateAccountProcessor {
    bound: Bound,
}

impl CreateAccountProcessor {
    /// Check a processor out of the pool
    pub fn new_processor(height: Height, reader: Arc<dyn StateReader>) -> Result<Box<dyn Processor>> {
        let mut processor = POOL.get();
        processor.bound.bind(height, reader);
        Ok(processor)
    }

    /// Free list of this processor type
    pub fn pool() -> &'static ObjectPool<Self> {
        &POOL
    }
}

impl Reset for CreateAccountProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for CreateAccountProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<CreateAccountFact>(op.fact())?;
        check_new_accounts(
            self.bound.reader()?,
            &fact.sender,
            fact.items
                .iter()
                .map(|item| (&item.address, item.amounts.as_slice())),
        )
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<CreateAccountFact>(op.fact())?;

        let mut values: Vec<StateMergeValue> = fact
            .items
            .iter()
            .map(|item| {
                StateMergeValue::new(
                    account_state_key(&item.address),
                    StateValue::Account(Account::new(item.address.clone(), item.keys.clone())),
                )
            })
            .collect();

        values.extend(funding_values(
            &fact.sender,
            fact.items
                .iter()
                .map(|item| (&item.address, item.amounts.as_slice())),
        )?);
        Ok(values)
    }

    fn close(self: Box<Self>) -> Result<()> {
        POOL.put(self);
        Ok(())
    }
}
