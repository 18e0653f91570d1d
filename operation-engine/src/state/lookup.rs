//! Typed state lookups
//!
//! `existing_*` helpers turn a missing state into a soft
//! [`ReasonKind::StateNotFound`](crate::error::ReasonKind) rejection; plain
//! helpers return `Option`. A state holding an unexpected value type is a hard
//! [`Error::TypeMismatch`].

use super::keys::*;
use super::values::*;
use super::{State, StateReader};
use crate::error::{ProcessResult, ReasonError};
use crate::types::{Address, CurrencyId};
use crate::{Error, Result};
use rust_decimal::Decimal;

fn typed<T>(
    state: Option<State>,
    expected: &'static str,
    extract: impl FnOnce(StateValue) -> std::result::Result<T, StateValue>,
) -> Result<Option<T>> {
    match state {
        None => Ok(None),
        Some(state) => extract(state.into_value())
            .map(Some)
            .map_err(|found| Error::TypeMismatch {
                expected,
                found: found.kind().to_string(),
            }),
    }
}

/// Account, if present
pub fn account(reader: &dyn StateReader, address: &Address) -> Result<Option<Account>> {
    typed(
        reader.get_state(&account_state_key(address))?,
        "account",
        |value| match value {
            StateValue::Account(account) => Ok(account),
            other => Err(other),
        },
    )
}

/// Account that must exist
pub fn existing_account(reader: &dyn StateReader, address: &Address) -> ProcessResult<Account> {
    account(reader, address)?
        .ok_or_else(|| ReasonError::not_found(format!("account {} not found", address)).into())
}

/// Reject if an account already exists at the address
pub fn ensure_account_absent(reader: &dyn StateReader, address: &Address) -> ProcessResult<()> {
    if reader.get_state(&account_state_key(address))?.is_some() {
        return Err(ReasonError::exists(format!("account {} already exists", address)).into());
    }
    Ok(())
}

/// Committed balance, if present
pub fn balance(
    reader: &dyn StateReader,
    address: &Address,
    currency: &CurrencyId,
) -> Result<Option<Decimal>> {
    balance_by_key(reader, &balance_state_key(address, currency))
}

/// Committed balance under a raw balance key, if present
pub fn balance_by_key(reader: &dyn StateReader, key: &str) -> Result<Option<Decimal>> {
    typed(reader.get_state(key)?, "balance", |value| match value {
        StateValue::Balance(amount) => Ok(amount.value),
        other => Err(other),
    })
}

/// Balance that must exist
pub fn existing_balance(
    reader: &dyn StateReader,
    address: &Address,
    currency: &CurrencyId,
) -> ProcessResult<Decimal> {
    balance(reader, address, currency)?.ok_or_else(|| {
        ReasonError::not_found(format!("balance of {} for {} not found", currency, address)).into()
    })
}

/// Currency design that must exist
pub fn existing_currency_design(
    reader: &dyn StateReader,
    currency: &CurrencyId,
) -> ProcessResult<CurrencyDesign> {
    typed(
        reader.get_state(&currency_design_state_key(currency))?,
        "currency-design",
        |value| match value {
            StateValue::CurrencyDesign(design) => Ok(design),
            other => Err(other),
        },
    )?
    .ok_or_else(|| ReasonError::not_found(format!("currency {} not found", currency)).into())
}

/// Contract account status, if the address is a contract account
pub fn contract_status(
    reader: &dyn StateReader,
    address: &Address,
) -> Result<Option<ContractAccountStatus>> {
    typed(
        reader.get_state(&contract_account_state_key(address))?,
        "contract-account",
        |value| match value {
            StateValue::ContractAccount(status) => Ok(status),
            other => Err(other),
        },
    )
}

/// Contract account status that must exist
pub fn existing_contract_status(
    reader: &dyn StateReader,
    address: &Address,
) -> ProcessResult<ContractAccountStatus> {
    contract_status(reader, address)?.ok_or_else(|| {
        ReasonError::not_found(format!("contract account {} not found", address)).into()
    })
}

/// Reject if the address is a contract account
pub fn ensure_not_contract(reader: &dyn StateReader, address: &Address) -> ProcessResult<()> {
    if contract_status(reader, address)?.is_some() {
        return Err(ReasonError::contract_status(format!(
            "{} is a contract account",
            address
        ))
        .into());
    }
    Ok(())
}

/// DID design of a contract, if registered
pub fn did_design(reader: &dyn StateReader, contract: &Address) -> Result<Option<DidDesign>> {
    typed(
        reader.get_state(&did_design_state_key(contract))?,
        "did-design",
        |value| match value {
            StateValue::DidDesign(design) => Ok(design),
            other => Err(other),
        },
    )
}

/// DID design that must exist
pub fn existing_did_design(
    reader: &dyn StateReader,
    contract: &Address,
) -> ProcessResult<DidDesign> {
    did_design(reader, contract)?.ok_or_else(|| {
        ReasonError::not_found(format!("did design of contract {} not found", contract)).into()
    })
}

/// DID data of an account, if issued
pub fn did_data(
    reader: &dyn StateReader,
    contract: &Address,
    address: &Address,
) -> Result<Option<DidData>> {
    typed(
        reader.get_state(&did_data_state_key(contract, address))?,
        "did-data",
        |value| match value {
            StateValue::DidData(data) => Ok(data),
            other => Err(other),
        },
    )
}

/// DID document that must exist
pub fn existing_did_document(
    reader: &dyn StateReader,
    contract: &Address,
    did: &str,
) -> ProcessResult<DidDocument> {
    typed(
        reader.get_state(&did_document_state_key(contract, did))?,
        "did-document",
        |value| match value {
            StateValue::DidDocument(document) => Ok(document),
            other => Err(other),
        },
    )?
    .ok_or_else(|| ReasonError::not_found(format!("did document {} not found", did)).into())
}

/// Pending suffrage candidates; absent means none
pub fn suffrage_candidates(reader: &dyn StateReader) -> Result<Vec<Address>> {
    Ok(typed(
        reader.get_state(SUFFRAGE_CANDIDATES_KEY)?,
        "suffrage-candidates",
        |value| match value {
            StateValue::SuffrageCandidates(candidates) => Ok(candidates),
            other => Err(other),
        },
    )?
    .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProcessError, ReasonKind};
    use crate::state::MemoryStateReader;
    use crate::types::{Amount, Height};

    #[test]
    fn test_missing_account_is_soft() {
        let store = MemoryStateReader::new();
        let address = Address::new("alice01").unwrap();

        match existing_account(&store, &address) {
            Err(ProcessError::Reason(reason)) => {
                assert_eq!(reason.kind(), ReasonKind::StateNotFound)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wrong_value_type_is_hard() {
        let store = MemoryStateReader::new();
        let address = Address::new("alice01").unwrap();
        let currency = CurrencyId::new("CUR").unwrap();
        store.insert(State::new(
            account_state_key(&address),
            Height::new(1),
            StateValue::Balance(Amount::new(Decimal::ONE, currency)),
            vec![],
        ));

        match existing_account(&store, &address) {
            Err(ProcessError::Fatal(Error::TypeMismatch { expected, found })) => {
                assert_eq!(expected, "account");
                assert_eq!(found, "balance");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_absent_candidates_is_empty() {
        let store = MemoryStateReader::new();
        assert!(suffrage_candidates(&store).unwrap().is_empty());
    }
}
