//! Contract account creation
//!
//! Contract accounts are keyless; their address derives from the item keys
//! and the owner. They start inactive until a service model is registered.

use super::create_account::{check_new_accounts, funding_values, validate_new_accounts};
use super::{Bound, Processor, DEFAULT_PROCESSOR_CAPACITY};
use crate::config::LimitsConfig;
use crate::context::OpContext;
use crate::duplication::{DuplicationKeySet, DuplicationKeyType};
use crate::error::ProcessResult;
use crate::fact::{self, downcast_fact, Fact, FeeAble};
use crate::operation::Operation;
use crate::pool::{ObjectPool, Reset};
use crate::state::{
    account_state_key, contract_account_state_key, lookup, Account, AccountKeys,
    ContractAccountStatus, StateMergeValue, StateReader, StateValue,
};
use crate::types::{Address, Amount, CurrencyId, Hash, Height, Hint, Version};
use crate::Result;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Create-contract-account operation hint
pub const CREATE_CONTRACT_ACCOUNT_HINT: Hint = Hint::from_static(
    "currency-create-contract-account-operation",
    Version::new(0, 0, 1),
);

/// Create-contract-account fact hint
pub const CREATE_CONTRACT_ACCOUNT_FACT_HINT: Hint = Hint::from_static(
    "currency-create-contract-account-operation-fact",
    Version::new(0, 0, 1),
);

/// One contract account to create and fund
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractAccountItem {
    /// Keys the address is derived from
    pub keys: AccountKeys,
    /// Initial amounts
    pub amounts: Vec<Amount>,
}

impl ContractAccountItem {
    /// Create new item
    pub fn new(keys: AccountKeys, amounts: Vec<Amount>) -> Self {
        Self { keys, amounts }
    }
}

/// Create contract accounts owned by the sender
#[derive(Debug, Clone, Serialize)]
pub struct CreateContractAccountFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    items: Vec<ContractAccountItem>,
    addresses: Vec<Address>,
    #[serde(skip)]
    hash: Hash,
}

impl CreateContractAccountFact {
    /// Create new fact; contract addresses are derived here
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        items: Vec<ContractAccountItem>,
    ) -> Result<Self> {
        let addresses = items
            .iter()
            .map(|item| item.keys.contract_address(&sender))
            .collect::<Result<Vec<_>>>()?;

        let mut fact = Self {
            hint: CREATE_CONTRACT_ACCOUNT_FACT_HINT,
            token: token.into(),
            sender,
            items,
            addresses,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }

    /// Owner
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Derived contract addresses, in item order
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    fn funded(&self) -> impl Iterator<Item = (&Address, &[Amount])> + '_ {
        self.addresses
            .iter()
            .zip(&self.items)
            .map(|(address, item)| (address, item.amounts.as_slice()))
    }
}

impl Fact for CreateContractAccountFact {
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
            self.addresses
                .iter()
                .zip(&self.items)
                .map(|(address, item)| (address, &item.keys, item.amounts.as_slice())),
            limits,
        )
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        let mut keys =
            DuplicationKeySet::new().with(DuplicationKeyType::Sender, self.sender.as_str());
        for address in &self.addresses {
            keys.insert(DuplicationKeyType::NewAccount, address.as_str());
            keys.insert(DuplicationKeyType::ContractAccount, address.as_str());
        }
        Some(keys)
    }

    fn fee(&self) -> Option<&dyn FeeAble> {
        Some(self)
    }
}

impl FeeAble for CreateContractAccountFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        fact::amounts_fee_base(self.items.iter().map(|item| item.amounts.as_slice()))
    }
}

lazy_static! {
    static ref POOL: ObjectPool<CreateContractAccountProcessor> =
        ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
}

/// Create-contract-account processor
#[derive(Debug, Default)]
pub struct CreateContractAccountProcessor {
    bound: Bound,
}

impl CreateContractAccountProcessor {
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

impl Reset for CreateContractAccountProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for CreateContractAccountProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<CreateContractAccountFact>(op.fact())?;
        let reader = self.bound.reader()?;

        lookup::ensure_not_contract(reader, &fact.sender)?;
        check_new_accounts(reader, &fact.sender, fact.funded())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<CreateContractAccountFact>(op.fact())?;

        let mut values = Vec::with_capacity(fact.addresses.len() * 4);
        for address in &fact.addresses {
            values.push(StateMergeValue::new(
                account_state_key(address),
                StateValue::Account(Account::keyless(address.clone())),
            ));
            values.push(StateMergeValue::new(
                contract_account_state_key(address),
                StateValue::ContractAccount(ContractAccountStatus::new(fact.sender.clone())),
            ));
        }
        values.extend(funding_values(&fact.sender, fact.funded())?);
        Ok(values)
    }

    fn close(self: Box<Self>) -> Result<()> {
        POOL.put(self);
        Ok(())
    }
}
