//! Withdrawal from owned contract accounts

use super::{Bound, Processor, DEFAULT_PROCESSOR_CAPACITY};
use crate::config::LimitsConfig;
use crate::context::OpContext;
use crate::duplication::{DuplicationKeySet, DuplicationKeyType};
use crate::error::{ProcessResult, ReasonError};
use crate::fact::{
    self, downcast_fact, ContractAccess, ContractStatusRequirement, Fact, FeeAble,
};
use crate::operation::Operation;
use crate::pool::{ObjectPool, Reset};
use crate::state::{lookup, StateMergeValue, StateReader};
use crate::types::{Address, Amount, CurrencyId, Hash, Height, Hint, Version};
use crate::Result;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Withdraw operation hint
pub const WITHDRAW_HINT: Hint =
    Hint::from_static("currency-withdraw-operation", Version::new(0, 0, 1));

/// Withdraw fact hint
pub const WITHDRAW_FACT_HINT: Hint =
    Hint::from_static("currency-withdraw-operation-fact", Version::new(0, 0, 1));

/// Amounts taken out of one contract account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawItem {
    /// Contract account
    pub target: Address,
    /// Amounts
    pub amounts: Vec<Amount>,
}

impl WithdrawItem {
    /// Create new item
    pub fn new(target: Address, amounts: Vec<Amount>) -> Self {
        Self { target, amounts }
    }
}

/// Move amounts from contract accounts to their owner
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    items: Vec<WithdrawItem>,
    #[serde(skip)]
    hash: Hash,
}

impl WithdrawFact {
    /// Create new fact
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        items: Vec<WithdrawItem>,
    ) -> Result<Self> {
        let mut fact = Self {
            hint: WITHDRAW_FACT_HINT,
            token: token.into(),
            sender,
            items,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }
}

impl Fact for WithdrawFact {
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

        let mut targets = BTreeSet::new();
        for item in &self.items {
            fact::validate_amounts(&item.amounts, limits)?;
            if item.target == self.sender {
                return Err(ReasonError::invalid(format!(
                    "{} withdraws from itself",
                    self.sender
                ))
                .into());
            }
            if !targets.insert(&item.target) {
                return Err(
                    ReasonError::invalid(format!("duplicated target {}", item.target)).into(),
                );
            }
        }
        Ok(())
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        Some(DuplicationKeySet::new().with(DuplicationKeyType::Sender, self.sender.as_str()))
    }

    fn fee(&self) -> Option<&dyn FeeAble> {
        Some(self)
    }

    fn contract_owner_only(&self) -> Option<Vec<ContractAccess>> {
        Some(
            self.items
                .iter()
                .map(|item| {
                    ContractAccess::new(
                        item.target.clone(),
                        self.sender.clone(),
                        ContractStatusRequirement::Any,
                    )
                })
                .collect(),
        )
    }
}

impl FeeAble for WithdrawFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        fact::amounts_fee_base(self.items.iter().map(|item| item.amounts.as_slice()))
    }
}

lazy_static! {
    static ref POOL: ObjectPool<WithdrawProcessor> = ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
}

/// Withdraw processor
#[derive(Debug, Default)]
pub struct WithdrawProcessor {
    bound: Bound,
}

impl WithdrawProcessor {
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

impl Reset for WithdrawProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for WithdrawProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<WithdrawFact>(op.fact())?;
        let reader = self.bound.reader()?;

        for item in &fact.items {
            lookup::existing_contract_status(reader, &item.target)?;
            for amount in &item.amounts {
                lookup::existing_currency_design(reader, &amount.currency)?;
                lookup::existing_balance(reader, &item.target, &amount.currency)?;
            }
        }
        Ok(())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<WithdrawFact>(op.fact())?;

        let mut values = Vec::new();
        for item in &fact.items {
            for amount in &item.amounts {
                values.push(StateMergeValue::deduct_balance(&item.target, amount.clone()));
                values.push(StateMergeValue::add_balance(&fact.sender, amount.clone()));
            }
        }
        Ok(values)
    }

    fn close(self: Box<Self>) -> Result<()> {
        POOL.put(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonKind;
    use crate::extension::Extensions;
    use crate::processors::fixtures::*;
    use crate::state::{ContractAccountStatus, StateValue};

    #[test]
    fn test_withdraw_moves_funds_to_owner() {
        let contract = address("contract01");
        let reader: Arc<dyn StateReader> = Arc::new(
            base_genesis(150)
                .contract(&contract, ContractAccountStatus::new(address("alice01")))
                .balance(&contract, amount(40))
                .into_reader(),
        );
        let processor = WithdrawProcessor::new_processor(Height::new(2), reader).unwrap();
        let fact = WithdrawFact::new(
            "w1",
            address("alice01"),
            vec![WithdrawItem::new(contract.clone(), vec![amount(25)])],
        )
        .unwrap();
        let op = Operation::signed(
            WITHDRAW_HINT,
            Arc::new(fact),
            &[&keypair(1)],
            &network(),
            Extensions::none(),
        )
        .unwrap();

        let accesses = op.fact().contract_owner_only().unwrap();
        assert_eq!(accesses[0].status, ContractStatusRequirement::Any);

        let ctx = OpContext::new();
        processor.pre_process(&ctx, &op).unwrap();
        let values = processor.process(&ctx, &op).unwrap();
        assert_eq!(values[0].key(), "contract01-CUR:balance");
        assert_eq!(values[0].value(), &StateValue::DeductBalance(amount(25)));
        assert_eq!(values[1].key(), "alice01-CUR:balance");
        processor.close().unwrap();
    }

    #[test]
    fn test_withdraw_from_plain_account_is_rejected() {
        let reader: Arc<dyn StateReader> =
            Arc::new(base_genesis(150).account(user("bob01", 2)).into_reader());
        let processor = WithdrawProcessor::new_processor(Height::new(2), reader).unwrap();
        let fact = WithdrawFact::new(
            "w2",
            address("alice01"),
            vec![WithdrawItem::new(address("bob01"), vec![amount(5)])],
        )
        .unwrap();
        let op = Operation::signed(
            WITHDRAW_HINT,
            Arc::new(fact),
            &[&keypair(1)],
            &network(),
            Extensions::none(),
        )
        .unwrap();

        assert_eq!(
            reason_kind(processor.pre_process(&OpContext::new(), &op)),
            ReasonKind::StateNotFound
        );
        processor.close().unwrap();
    }
}
