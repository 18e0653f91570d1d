//! Ledger state as seen by the pipeline
//!
//! States are read through [`StateReader`] and never mutated here. Processors
//! emit [`StateMergeValue`]s instead; the external committer folds them into
//! new states through their [`StateValueMerger`]s.

pub mod keys;
pub mod lookup;
pub mod merge;
pub mod values;

use crate::types::{Hash, Height};
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use keys::*;
pub use merge::{
    apply_merge_values, BalanceStateValueMerger, MergerKind, SetStateValueMerger,
    StateMergeValue, StateValueMerger,
};
pub use values::*;

/// Versioned key/value record of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    key: String,
    height: Height,
    value: StateValue,
    operations: Vec<Hash>,
}

impl State {
    /// Create new state
    pub fn new(
        key: impl Into<String>,
        height: Height,
        value: StateValue,
        operations: Vec<Hash>,
    ) -> Self {
        Self {
            key: key.into(),
            height,
            value,
            operations,
        }
    }

    /// Key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Height the state was last written at
    pub fn height(&self) -> Height {
        self.height
    }

    /// Value
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Consume into the value
    pub fn into_value(self) -> StateValue {
        self.value
    }

    /// Operations that produced this state
    pub fn operations(&self) -> &[Hash] {
        &self.operations
    }
}

/// Read access to committed state
///
/// `Ok(None)` means the key does not exist. Backend failures surface as
/// [`crate::Error::Storage`] and are propagated verbatim.
pub trait StateReader: Send + Sync {
    /// Look up a state by key
    fn get_state(&self, key: &str) -> Result<Option<State>>;
}

impl<F> StateReader for F
where
    F: Fn(&str) -> Result<Option<State>> + Send + Sync,
{
    fn get_state(&self, key: &str) -> Result<Option<State>> {
        self(key)
    }
}

/// In-memory state store
///
/// Used for genesis bootstrapping, the demo binary and tests.
#[derive(Debug, Default)]
pub struct MemoryStateReader {
    states: RwLock<HashMap<String, State>>,
}

impl MemoryStateReader {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a state
    pub fn insert(&self, state: State) {
        self.states.write().insert(state.key().to_string(), state);
    }

    /// Insert or replace several states
    pub fn extend(&self, states: impl IntoIterator<Item = State>) {
        let mut guard = self.states.write();
        for state in states {
            guard.insert(state.key().to_string(), state);
        }
    }

    /// Remove a state
    pub fn remove(&self, key: &str) -> Option<State> {
        self.states.write().remove(key)
    }

    /// Number of states
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl StateReader for MemoryStateReader {
    fn get_state(&self, key: &str) -> Result<Option<State>> {
        Ok(self.states.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Amount, CurrencyId};
    use crate::Error;
    use rust_decimal::Decimal;

    #[test]
    fn test_memory_reader() {
        let store = MemoryStateReader::new();
        let address = Address::new("alice01").unwrap();
        let currency = CurrencyId::new("CUR").unwrap();
        let key = balance_state_key(&address, &currency);

        assert!(store.get_state(&key).unwrap().is_none());

        store.insert(State::new(
            key.clone(),
            Height::new(1),
            StateValue::Balance(Amount::new(Decimal::from(10), currency)),
            vec![],
        ));
        let state = store.get_state(&key).unwrap().unwrap();
        assert_eq!(state.height(), Height::new(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_closure_reader_propagates_backend_errors() {
        let reader = |_: &str| -> Result<Option<State>> { Err(Error::Storage("disk".into())) };
        let result = reader.get_state("any");
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
