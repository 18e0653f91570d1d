//! State key layout
//!
//! | value               | key                               |
//! |---------------------|-----------------------------------|
//! | account             | `{address}:account`               |
//! | balance             | `{address}-{currency}:balance`    |
//! | currency design     | `{currency}:currencydesign`       |
//! | contract account    | `{address}:contractaccount`       |
//! | DID design          | `{contract}:diddesign`            |
//! | DID data            | `{contract}:{address}:diddata`    |
//! | DID document        | `{contract}:{did}:diddocument`    |
//! | suffrage candidates | `suffrage:candidates`             |

use crate::types::{Address, CurrencyId};

const ACCOUNT_SUFFIX: &str = ":account";
const BALANCE_SUFFIX: &str = ":balance";
const CURRENCY_DESIGN_SUFFIX: &str = ":currencydesign";
const CONTRACT_ACCOUNT_SUFFIX: &str = ":contractaccount";
const DID_DESIGN_SUFFIX: &str = ":diddesign";
const DID_DATA_SUFFIX: &str = ":diddata";
const DID_DOCUMENT_SUFFIX: &str = ":diddocument";

/// Key of the pending suffrage candidates list
pub const SUFFRAGE_CANDIDATES_KEY: &str = "suffrage:candidates";

/// Account state key
pub fn account_state_key(address: &Address) -> String {
    format!("{}{}", address, ACCOUNT_SUFFIX)
}

/// Balance state key
pub fn balance_state_key(address: &Address, currency: &CurrencyId) -> String {
    format!("{}-{}{}", address, currency, BALANCE_SUFFIX)
}

/// Whether the key addresses a balance
pub fn is_balance_state_key(key: &str) -> bool {
    key.ends_with(BALANCE_SUFFIX)
}

/// Split a balance key into `(address, currency)`
pub fn parse_balance_state_key(key: &str) -> Option<(Address, CurrencyId)> {
    let body = key.strip_suffix(BALANCE_SUFFIX)?;
    let (address, currency) = body.rsplit_once('-')?;
    Some((Address::new(address).ok()?, CurrencyId::new(currency).ok()?))
}

/// Currency design state key
pub fn currency_design_state_key(currency: &CurrencyId) -> String {
    format!("{}{}", currency, CURRENCY_DESIGN_SUFFIX)
}

/// Contract account status state key
pub fn contract_account_state_key(address: &Address) -> String {
    format!("{}{}", address, CONTRACT_ACCOUNT_SUFFIX)
}

/// DID design state key
pub fn did_design_state_key(contract: &Address) -> String {
    format!("{}{}", contract, DID_DESIGN_SUFFIX)
}

/// DID data state key
pub fn did_data_state_key(contract: &Address, address: &Address) -> String {
    format!("{}:{}{}", contract, address, DID_DATA_SUFFIX)
}

/// DID document state key
pub fn did_document_state_key(contract: &Address, did: &str) -> String {
    format!("{}:{}{}", contract, did, DID_DOCUMENT_SUFFIX)
}
