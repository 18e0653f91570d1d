//! Currency transfer

use super::{Bound, Processor, DEFAULT_PROCESSOR_CAPACITY};
use crate::config::LimitsConfig;
use crate::context::OpContext;
use crate::duplication::{DuplicationKeySet, DuplicationKeyType};
use crate::error::{ProcessResult, ReasonError};
use crate::fact::{self, downcast_fact, Fact, FeeAble};
use crate::operation::Operation;
use crate::pool::{ObjectPool, Reset};
use crate::state::{lookup, StateMergeValue, StateReader};
use crate::types::{Address, Amount, CurrencyId, Hash, Height, Hint, Version};
use crate::{Error, Result};
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Transfer operation hint
pub const TRANSFER_HINT: Hint =
    Hint::from_static("currency-transfer-operation", Version::new(0, 0, 1));

/// Transfer fact hint
pub const TRANSFER_FACT_HINT: Hint =
    Hint::from_static("currency-transfer-operation-fact", Version::new(0, 0, 1));

/// Amounts sent to one receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferItem {
    /// Receiver
    pub receiver: Address,
    /// Amounts
    pub amounts: Vec<Amount>,
}

impl TransferItem {
    /// Create new item
    pub fn new(receiver: Address, amounts: Vec<Amount>) -> Self {
        Self { receiver, amounts }
    }
}

/// Send amounts from one sender to several receivers
#[derive(Debug, Clone, Serialize)]
pub struct TransferFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    items: Vec<TransferItem>,
    #[serde(skip)]
    hash: Hash,
}

impl TransferFact {
    /// Create new fact
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        items: Vec<TransferItem>,
    ) -> Result<Self> {
        let mut fact = Self {
            hint: TRANSFER_FACT_HINT,
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
    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }
}

impl Fact for TransferFact {
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

        let mut receivers = BTreeSet::new();
        for item in &self.items {
            fact::validate_amounts(&item.amounts, limits)?;
            if item.receiver == self.sender {
                return Err(ReasonError::invalid(format!(
                    "sender {} sends to itself",
                    self.sender
                ))
                .into());
            }
            if !receivers.insert(&item.receiver) {
                return Err(
                    ReasonError::invalid(format!("duplicated receiver {}", item.receiver)).into(),
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
}

impl FeeAble for TransferFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        fact::amounts_fee_base(self.items.iter().map(|item| item.amounts.as_slice()))
    }
}

lazy_static! {
    static ref POOL: ObjectPool<TransferProcessor> = ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
}

/// Transfer processor
#[derive(Debug, Default)]
pub struct TransferProcessor {
    bound: Bound,
}

impl TransferProcessor {
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

impl Reset for TransferProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for TransferProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<TransferFact>(op.fact())?;
        let reader = self.bound.reader()?;

        lookup::existing_account(reader, &fact.sender)?;
        lookup::ensure_not_contract(reader, &fact.sender)?;

        for item in &fact.items {
            lookup::existing_account(reader, &item.receiver)?;
            for amount in &item.amounts {
                lookup::existing_currency_design(reader, &amount.currency)?;
                lookup::existing_balance(reader, &fact.sender, &amount.currency)?;
            }
        }
        Ok(())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<TransferFact>(op.fact())?;

        let mut totals: BTreeMap<&CurrencyId, Decimal> = BTreeMap::new();
        for amount in fact.items.iter().flat_map(|item| &item.amounts) {
            let total = totals.entry(&amount.currency).or_insert(Decimal::ZERO);
            *total = total.checked_add(amount.value).ok_or_else(|| {
                Error::Arithmetic(format!("transfer total overflow in {}", amount.currency))
            })?;
        }

        let mut values: Vec<StateMergeValue> = totals
            .into_iter()
            .map(|(currency, total)| {
                StateMergeValue::deduct_balance(&fact.sender, Amount::new(total, currency.clone()))
            })
            .collect();

        for item in &fact.items {
            for amount in &item.amounts {
                values.push(StateMergeValue::add_balance(&item.receiver, amount.clone()));
            }
        }
        Ok(values)
    }

    fn close(self: Box<Self>) -> Result<()> {
        POOL.put(self);
        Ok(())
    }
}
