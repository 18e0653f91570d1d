//! Deferred state mutations
//!
//! A [`StateMergeValue`] names a key, a value (or delta) and the kind of
//! merger that folds it in at commit time. Balance deltas from many operations
//! of one block fold commutatively; every other value is written once.

use super::keys::parse_balance_state_key;
use super::values::StateValue;
use super::{State, StateReader};
use crate::types::{Address, Amount, CurrencyId, Hash, Height};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Merger constructor carried by a merge value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerKind {
    /// Single write per key per block
    Set,
    /// Commutative Add/Deduct accumulation
    Balance,
}

impl MergerKind {
    /// Build the merger for `key`, given the state committed before this block
    pub fn new_merger(
        &self,
        height: Height,
        key: &str,
        existing: Option<&State>,
    ) -> Result<Box<dyn StateValueMerger>> {
        match self {
            MergerKind::Set => Ok(Box::new(SetStateValueMerger::new(height, key))),
            MergerKind::Balance => Ok(Box::new(BalanceStateValueMerger::new(
                height, key, existing,
            )?)),
        }
    }
}

/// Not-yet-committed mutation of one state key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMergeValue {
    key: String,
    value: StateValue,
    merger: MergerKind,
}

impl StateMergeValue {
    /// Value written once at commit
    pub fn new(key: impl Into<String>, value: StateValue) -> Self {
        Self {
            key: key.into(),
            value,
            merger: MergerKind::Set,
        }
    }

    /// Credit `amount` to `address`
    pub fn add_balance(address: &Address, amount: Amount) -> Self {
        Self {
            key: super::balance_state_key(address, &amount.currency),
            value: StateValue::AddBalance(amount),
            merger: MergerKind::Balance,
        }
    }

    /// Debit `amount` from `address`
    pub fn deduct_balance(address: &Address, amount: Amount) -> Self {
        Self {
            key: super::balance_state_key(address, &amount.currency),
            value: StateValue::DeductBalance(amount),
            merger: MergerKind::Balance,
        }
    }

    /// Key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value or delta
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Merger kind
    pub fn merger(&self) -> MergerKind {
        self.merger
    }
}

/// Accumulates merge values for one key and finalizes into a new state
pub trait StateValueMerger: Send {
    /// Fold in one value produced by operation `operation`
    fn merge(&mut self, value: &StateValue, operation: Hash) -> Result<()>;

    /// Final state at the merger's height
    fn close(self: Box<Self>) -> Result<State>;
}

fn push_operation(operations: &mut Vec<Hash>, operation: Hash) {
    if !operations.contains(&operation) {
        operations.push(operation);
    }
}

/// Single-write merger
#[derive(Debug)]
pub struct SetStateValueMerger {
    key: String,
    height: Height,
    value: Option<StateValue>,
    operations: Vec<Hash>,
}

impl SetStateValueMerger {
    /// Create new merger
    pub fn new(height: Height, key: &str) -> Self {
        Self {
            key: key.to_string(),
            height,
            value: None,
            operations: Vec::new(),
        }
    }
}

impl StateValueMerger for SetStateValueMerger {
    fn merge(&mut self, value: &StateValue, operation: Hash) -> Result<()> {
        match &self.value {
            Some(current) if current != value => {
                return Err(Error::InvariantViolation(format!(
                    "conflicting writes to {}",
                    self.key
                )));
            }
            Some(_) => {}
            None => self.value = Some(value.clone()),
        }
        push_operation(&mut self.operations, operation);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<State> {
        let value = self.value.ok_or_else(|| {
            Error::InvariantViolation(format!("nothing merged into {}", self.key))
        })?;
        Ok(State::new(self.key, self.height, value, self.operations))
    }
}

/// Add/Deduct accumulator for one balance key
///
/// Deltas are summed, so application order within one merge never changes
/// the result. Closing below zero is an invariant violation: the consistency
/// check should have rejected the operation long before commit.
#[derive(Debug)]
pub struct BalanceStateValueMerger {
    key: String,
    height: Height,
    currency: CurrencyId,
    committed: Decimal,
    delta: Decimal,
    operations: Vec<Hash>,
}

impl BalanceStateValueMerger {
    /// Create new merger over the committed balance (absent means zero)
    pub fn new(height: Height, key: &str, existing: Option<&State>) -> Result<Self> {
        let (_, currency) = parse_balance_state_key(key)
            .ok_or_else(|| Error::InvariantViolation(format!("not a balance key: {}", key)))?;

        let committed = match existing.map(State::value) {
            None => Decimal::ZERO,
            Some(StateValue::Balance(amount)) => amount.value,
            Some(other) => {
                return Err(Error::TypeMismatch {
                    expected: "balance",
                    found: other.kind().to_string(),
                })
            }
        };

        Ok(Self {
            key: key.to_string(),
            height,
            currency,
            committed,
            delta: Decimal::ZERO,
            operations: Vec::new(),
        })
    }

    fn checked_amount(&self, amount: &Amount) -> Result<Decimal> {
        if amount.currency != self.currency {
            return Err(Error::InvariantViolation(format!(
                "currency {} merged into {}",
                amount.currency, self.key
            )));
        }
        Ok(amount.value)
    }
}

impl StateValueMerger for BalanceStateValueMerger {
    fn merge(&mut self, value: &StateValue, operation: Hash) -> Result<()> {
        let overflow = || Error::Arithmetic(format!("balance delta overflow on {}", self.key));
        self.delta = match value {
            StateValue::AddBalance(amount) => self
                .delta
                .checked_add(self.checked_amount(amount)?)
                .ok_or_else(overflow)?,
            StateValue::DeductBalance(amount) => self
                .delta
                .checked_sub(self.checked_amount(amount)?)
                .ok_or_else(overflow)?,
            other => {
                return Err(Error::TypeMismatch {
                    expected: "balance delta",
                    found: other.kind().to_string(),
                })
            }
        };
        push_operation(&mut self.operations, operation);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<State> {
        let total = self
            .committed
            .checked_add(self.delta)
            .ok_or_else(|| Error::Arithmetic(format!("balance overflow on {}", self.key)))?;
        if total.is_sign_negative() && !total.is_zero() {
            return Err(Error::InvariantViolation(format!(
                "negative balance {} on {}",
                total, self.key
            )));
        }

        Ok(State::new(
            self.key,
            self.height,
            StateValue::Balance(Amount::new(total, self.currency)),
            self.operations,
        ))
    }
}

/// Fold merge values of several operations into final states
///
/// `batches` pairs each operation hash with the merge values it produced.
/// Output is ordered by key.
pub fn apply_merge_values(
    height: Height,
    batches: &[(Hash, Vec<StateMergeValue>)],
    reader: &dyn StateReader,
) -> Result<Vec<State>> {
    let mut mergers: BTreeMap<&str, (MergerKind, Box<dyn StateValueMerger>)> = BTreeMap::new();

    for (operation, values) in batches {
        for value in values {
            let (kind, merger) = match mergers.entry(value.key()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let existing = reader.get_state(value.key())?;
                    let merger =
                        value
                            .merger()
                            .new_merger(height, value.key(), existing.as_ref())?;
                    entry.insert((value.merger(), merger))
                }
            };
            if *kind != value.merger() {
                return Err(Error::InvariantViolation(format!(
                    "mixed merger kinds on {}",
                    value.key()
                )));
            }
            merger.merge(value.value(), *operation)?;
        }
    }

    mergers
        .into_values()
        .map(|(_, merger)| merger.close())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{balance_state_key, MemoryStateReader};

    fn cur() -> CurrencyId {
        CurrencyId::new("CUR").unwrap()
    }

    fn alice() -> Address {
        Address::new("alice01").unwrap()
    }

    #[test]
    fn test_balance_merger_accumulates() {
        let key = balance_state_key(&alice(), &cur());
        let committed = State::new(
            key.clone(),
            Height::new(1),
            StateValue::Balance(Amount::new(Decimal::from(150), cur())),
            vec![],
        );
        let mut merger =
            Box::new(BalanceStateValueMerger::new(Height::new(2), &key, Some(&committed)).unwrap());

        let op = Hash::digest(b"op");
        merger
            .merge(&StateValue::DeductBalance(Amount::new(Decimal::from(100), cur())), op)
            .unwrap();
        merger
            .merge(&StateValue::DeductBalance(Amount::new(Decimal::ONE, cur())), op)
            .unwrap();
        merger
            .merge(&StateValue::AddBalance(Amount::new(Decimal::from(5), cur())), op)
            .unwrap();

        let state = merger.close().unwrap();
        assert_eq!(state.height(), Height::new(2));
        assert_eq!(
            state.value(),
            &StateValue::Balance(Amount::new(Decimal::from(54), cur()))
        );
        assert_eq!(state.operations(), &[op]);
    }

    #[test]
    fn test_balance_merger_rejects_negative_close() {
        let key = balance_state_key(&alice(), &cur());
        let mut merger = Box::new(BalanceStateValueMerger::new(Height::new(2), &key, None).unwrap());
        merger
            .merge(
                &StateValue::DeductBalance(Amount::new(Decimal::ONE, cur())),
                Hash::digest(b"op"),
            )
            .unwrap();

        assert!(matches!(merger.close(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_balance_merger_rejects_foreign_currency() {
        let key = balance_state_key(&alice(), &cur());
        let mut merger = BalanceStateValueMerger::new(Height::new(2), &key, None).unwrap();
        let other = CurrencyId::new("PEN").unwrap();
        let result = merger.merge(
            &StateValue::AddBalance(Amount::new(Decimal::ONE, other)),
            Hash::digest(b"op"),
        );
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_set_merger_rejects_conflicting_writes() {
        let mut merger = SetStateValueMerger::new(Height::new(2), "k:suffrage");
        let a = StateValue::SuffrageCandidates(vec![alice()]);
        let b = StateValue::SuffrageCandidates(vec![]);

        merger.merge(&a, Hash::digest(b"1")).unwrap();
        merger.merge(&a, Hash::digest(b"2")).unwrap();
        assert!(matches!(
            merger.merge(&b, Hash::digest(b"3")),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_apply_merge_values_across_operations() {
        let store = MemoryStateReader::new();
        let bob = Address::new("bob01").unwrap();
        store.insert(State::new(
            balance_state_key(&alice(), &cur()),
            Height::new(1),
            StateValue::Balance(Amount::new(Decimal::from(150), cur())),
            vec![],
        ));

        let first = Hash::digest(b"first");
        let second = Hash::digest(b"second");
        let batches = vec![
            (
                first,
                vec![
                    StateMergeValue::deduct_balance(&alice(), Amount::new(Decimal::from(100), cur())),
                    StateMergeValue::add_balance(&bob, Amount::new(Decimal::from(100), cur())),
                ],
            ),
            (
                second,
                vec![StateMergeValue::add_balance(
                    &alice(),
                    Amount::new(Decimal::from(7), cur()),
                )],
            ),
        ];

        let states = apply_merge_values(Height::new(2), &batches, &store).unwrap();
        assert_eq!(states.len(), 2);

        let alice_state = states
            .iter()
            .find(|s| s.key() == balance_state_key(&alice(), &cur()))
            .unwrap();
        assert_eq!(
            alice_state.value(),
            &StateValue::Balance(Amount::new(Decimal::from(57), cur()))
        );
        assert_eq!(alice_state.operations(), &[first, second]);
    }
}
