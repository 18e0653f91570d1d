//! Balance consistency check
//!
//! Last safety net of `process`: aggregates one operation's balance deltas
//! per key (a transfer debit and a fee debit on the same account fold
//! together) and rejects the operation if any committed balance would go
//! negative. Cross-operation consistency is the committer's concern.

use crate::error::{ProcessResult, ReasonError};
use crate::state::{is_balance_state_key, lookup, parse_balance_state_key, StateMergeValue};
use crate::state::{StateReader, StateValue};
use crate::Error;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Reject if any balance touched by `values` would end up negative
pub fn check_balances(values: &[StateMergeValue], reader: &dyn StateReader) -> ProcessResult<()> {
    let mut deltas: BTreeMap<&str, Decimal> = BTreeMap::new();

    for value in values {
        if !is_balance_state_key(value.key()) {
            continue;
        }

        let signed = match value.value() {
            StateValue::AddBalance(amount) => amount.value,
            StateValue::DeductBalance(amount) => -amount.value,
            other => {
                return Err(Error::TypeMismatch {
                    expected: "balance delta",
                    found: other.kind().to_string(),
                }
                .into())
            }
        };

        let delta = deltas.entry(value.key()).or_insert(Decimal::ZERO);
        *delta = delta.checked_add(signed).ok_or_else(|| {
            Error::Arithmetic(format!("balance delta overflow on {}", value.key()))
        })?;
    }

    for (key, delta) in deltas {
        let committed = lookup::balance_by_key(reader, key)?.unwrap_or(Decimal::ZERO);
        let resulting = committed
            .checked_add(delta)
            .ok_or_else(|| Error::Arithmetic(format!("balance overflow on {}", key)))?;

        if resulting < Decimal::ZERO {
            let (address, currency) = parse_balance_state_key(key)
                .ok_or_else(|| Error::InvariantViolation(format!("malformed balance key {}", key)))?;
            return Err(ReasonError::insufficient_balance(format!(
                "{} short of {} {}: balance {}",
                address, -resulting, currency, committed
            ))
            .into());
        }
    }

    Ok(())
}
