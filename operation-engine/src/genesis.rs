//! Genesis state builder
//!
//! Seeds an in-memory store with accounts, balances, currencies, contracts
//! and DID records. Used by the demo binary and by tests.

use crate::state::*;
use crate::types::{Address, Amount, Height};

/// Collects initial states
#[derive(Debug, Default)]
pub struct Genesis {
    height: Height,
    states: Vec<State>,
}

impl Genesis {
    /// Empty genesis at `height`
    pub fn new(height: Height) -> Self {
        Self {
            height,
            states: Vec::new(),
        }
    }

    fn push(mut self, key: String, value: StateValue) -> Self {
        self.states
            .push(State::new(key, self.height, value, Vec::new()));
        self
    }

    /// Account
    pub fn account(self, account: Account) -> Self {
        let key = account_state_key(&account.address);
        self.push(key, StateValue::Account(account))
    }

    /// Committed balance
    pub fn balance(self, address: &Address, amount: Amount) -> Self {
        let key = balance_state_key(address, &amount.currency);
        self.push(key, StateValue::Balance(amount))
    }

    /// Currency design
    pub fn currency(self, design: CurrencyDesign) -> Self {
        let key = currency_design_state_key(&design.currency);
        self.push(key, StateValue::CurrencyDesign(design))
    }

    /// Keyless contract account with its status
    pub fn contract(self, address: &Address, status: ContractAccountStatus) -> Self {
        self.account(Account::keyless(address.clone())).push(
            contract_account_state_key(address),
            StateValue::ContractAccount(status),
        )
    }

    /// DID design of a contract
    pub fn did_design(self, contract: &Address, design: DidDesign) -> Self {
        self.push(did_design_state_key(contract), StateValue::DidDesign(design))
    }

    /// DID data and document issued on a contract
    pub fn did(self, contract: &Address, data: DidData, document: DidDocument) -> Self {
        let data_key = did_data_state_key(contract, &data.address);
        let document_key = did_document_state_key(contract, &document.did);
        self.push(data_key, StateValue::DidData(data))
            .push(document_key, StateValue::DidDocument(document))
    }

    /// Pending suffrage candidates
    pub fn suffrage_candidates(self, candidates: Vec<Address>) -> Self {
        self.push(
            SUFFRAGE_CANDIDATES_KEY.to_string(),
            StateValue::SuffrageCandidates(candidates),
        )
    }

    /// Collected states
    pub fn states(self) -> Vec<State> {
        self.states
    }

    /// Store seeded with the collected states
    pub fn into_reader(self) -> MemoryStateReader {
        let store = MemoryStateReader::new();
        store.extend(self.states);
        store
    }
}
