//! Fee resolution
//!
//! For every currency in a fact's fee base the currency design supplies the
//! policy. The payer is the fact's fee payer, overridden by the settlement
//! op-sender, overridden again by the proxy payer when both extensions are
//! attached.
//!
//! When a policy prices items individually, the flat fee over the total is
//! added on top only if the flat feeer is set.

use crate::error::{ProcessResult, ReasonError};
use crate::fact::FeeAble;
use crate::operation::Operation;
use crate::state::{lookup, CurrencyPolicy, Feeer, StateMergeValue, StateReader};
use crate::types::{Address, Amount};
use crate::{Error, Result};
use rust_decimal::Decimal;

impl Feeer {
    /// Fee charged over `amount`
    pub fn fee(&self, amount: Decimal) -> Result<Decimal> {
        match self {
            Feeer::Nil => Ok(Decimal::ZERO),
            Feeer::Fixed { amount: fee, .. } => Ok(*fee),
            Feeer::Ratio {
                ratio, min, max, ..
            } => {
                self.validate()?;
                let fee = amount
                    .checked_mul(*ratio)
                    .ok_or_else(|| Error::Arithmetic(format!("fee overflow on {}", amount)))?;
                Ok(fee.max(*min).min(*max))
            }
        }
    }

    /// Ratio feeer; rejects bounds that cannot clamp
    pub fn ratio(receiver: Address, ratio: Decimal, min: Decimal, max: Decimal) -> Result<Self> {
        let feeer = Feeer::Ratio {
            receiver,
            ratio,
            min,
            max,
        };
        feeer.validate()?;
        Ok(feeer)
    }

    /// Amounts are non-negative, a ratio lies in `0..=1` and `min <= max`
    pub fn validate(&self) -> Result<()> {
        match self {
            Feeer::Nil => Ok(()),
            Feeer::Fixed { amount, .. } => {
                if *amount < Decimal::ZERO {
                    return Err(Error::InvariantViolation(format!(
                        "negative fixed fee {}",
                        amount
                    )));
                }
                Ok(())
            }
            Feeer::Ratio {
                ratio, min, max, ..
            } => {
                if *ratio < Decimal::ZERO || *ratio > Decimal::ONE {
                    return Err(Error::InvariantViolation(format!(
                        "fee ratio {} outside 0..=1",
                        ratio
                    )));
                }
                if *min < Decimal::ZERO || min > max {
                    return Err(Error::InvariantViolation(format!(
                        "fee bounds [{}, {}] cannot clamp",
                        min, max
                    )));
                }
                Ok(())
            }
        }
    }

    /// Receiver, unless the feeer charges nothing
    pub fn receiver(&self) -> Option<&Address> {
        match self {
            Feeer::Nil => None,
            Feeer::Fixed { receiver, .. } | Feeer::Ratio { receiver, .. } => Some(receiver),
        }
    }

    /// Whether the feeer charges nothing
    pub fn is_nil(&self) -> bool {
        matches!(self, Feeer::Nil)
    }
}

impl CurrencyPolicy {
    /// Both feeers are well formed
    pub fn validate(&self) -> Result<()> {
        self.feeer.validate()?;
        if let Some(item_feeer) = &self.item_feeer {
            item_feeer.validate()?;
        }
        Ok(())
    }

    /// Receiver of collected fees: the flat feeer's, else the item feeer's
    pub fn fee_receiver(&self) -> Option<&Address> {
        self.feeer
            .receiver()
            .or_else(|| self.item_feeer.as_ref().and_then(Feeer::receiver))
    }
}

/// Fee for charged item amounts under `policy`
pub fn compute_fee(policy: &CurrencyPolicy, items: &[Decimal]) -> Result<Decimal> {
    let overflow = || Error::Arithmetic("fee total overflow".to_string());

    let total = items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(*item))
        .ok_or_else(overflow)?;

    match &policy.item_feeer {
        Some(item_feeer) => {
            let mut fee = Decimal::ZERO;
            for item in items {
                fee = fee.checked_add(item_feeer.fee(*item)?).ok_or_else(overflow)?;
            }
            if !policy.feeer.is_nil() {
                fee = fee
                    .checked_add(policy.feeer.fee(total)?)
                    .ok_or_else(overflow)?;
            }
            Ok(fee)
        }
        None => policy.feeer.fee(total),
    }
}

/// Account paying the fees of `op`
pub fn resolve_payer<'a>(op: &'a Operation, fee: &'a dyn FeeAble) -> &'a Address {
    let extensions = op.extensions();
    match (&extensions.settlement, &extensions.proxy_payer) {
        (Some(_), Some(proxy)) => &proxy.proxy_payer,
        (Some(settlement), None) => &settlement.op_sender,
        _ => fee.fee_payer(),
    }
}

/// One non-zero fee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCharge {
    /// Payer
    pub payer: Address,
    /// Receiver, if the policy names one
    pub receiver: Option<Address>,
    /// Fee
    pub amount: Amount,
}

/// Non-zero fees of `op`; empty when the fact has no fee schedule
pub fn fees(op: &Operation, reader: &dyn StateReader) -> ProcessResult<Vec<FeeCharge>> {
    let fee = match op.fact().fee() {
        Some(fee) => fee,
        None => return Ok(Vec::new()),
    };
    let payer = resolve_payer(op, fee);

    let mut charges = Vec::new();
    for (currency, items) in fee.fee_base() {
        let design = lookup::existing_currency_design(reader, &currency)?;
        design.policy.validate()?;
        let amount = compute_fee(&design.policy, &items)?;
        if amount.is_zero() {
            continue;
        }

        charges.push(FeeCharge {
            payer: payer.clone(),
            receiver: design.policy.fee_receiver().cloned(),
            amount: Amount::new(amount, currency),
        });
    }
    Ok(charges)
}

/// Every fee payer holds enough of the fee currency
pub fn check_affordable(op: &Operation, reader: &dyn StateReader) -> ProcessResult<()> {
    for charge in fees(op, reader)? {
        let balance = lookup::existing_balance(reader, &charge.payer, &charge.amount.currency)?;
        if balance < charge.amount.value {
            return Err(ReasonError::insufficient_balance(format!(
                "{} cannot pay fee {}: balance {}",
                charge.payer, charge.amount, balance
            ))
            .into());
        }
    }
    Ok(())
}

/// Fee deltas of `op`
///
/// Deduct at the payer and, when the receiver is someone else, Add at the
/// receiver. A receiver without an account rejects the operation.
pub fn fee_merge_values(
    op: &Operation,
    reader: &dyn StateReader,
) -> ProcessResult<Vec<StateMergeValue>> {
    let mut values = Vec::new();
    for charge in fees(op, reader)? {
        lookup::existing_balance(reader, &charge.payer, &charge.amount.currency)?;

        let receiver = match &charge.receiver {
            Some(receiver) => {
                lookup::existing_account(reader, receiver)?;
                Some(receiver)
            }
            None => None,
        };

        values.push(StateMergeValue::deduct_balance(
            &charge.payer,
            charge.amount.clone(),
        ));
        if let Some(receiver) = receiver.filter(|receiver| *receiver != &charge.payer) {
            values.push(StateMergeValue::add_balance(receiver, charge.amount));
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonKind;
    use crate::extension::Extensions;
    use crate::genesis::Genesis;
    use crate::processors::fixtures::*;
    use crate::processors::transfer::{TransferFact, TransferItem, TRANSFER_HINT};
    use crate::state::{balance_state_key, CurrencyDesign, StateValue};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn receiver() -> Address {
        Address::new("feecollector").unwrap()
    }

    fn fixed(amount: Decimal) -> Feeer {
        Feeer::Fixed {
            receiver: receiver(),
            amount,
        }
    }

    #[test]
    fn test_feeer_fee() {
        assert_eq!(Feeer::Nil.fee(dec!(100)).unwrap(), Decimal::ZERO);
        assert_eq!(fixed(dec!(1)).fee(dec!(100)).unwrap(), dec!(1));

        let ratio = Feeer::Ratio {
            receiver: receiver(),
            ratio: dec!(0.01),
            min: dec!(2),
            max: dec!(5),
        };
        assert_eq!(ratio.fee(dec!(300)).unwrap(), dec!(3));
        assert_eq!(ratio.fee(dec!(10)).unwrap(), dec!(2));
        assert_eq!(ratio.fee(dec!(10000)).unwrap(), dec!(5));
    }

    #[test]
    fn test_compute_fee_flat_over_total() {
        let policy = CurrencyPolicy::new(Decimal::ZERO, fixed(dec!(1)));
        assert_eq!(compute_fee(&policy, &[dec!(40), dec!(60)]).unwrap(), dec!(1));
    }

    #[test]
    fn test_compute_fee_items_plus_flat() {
        let policy =
            CurrencyPolicy::new(Decimal::ZERO, fixed(dec!(1))).with_item_feeer(fixed(dec!(0.5)));
        assert_eq!(
            compute_fee(&policy, &[dec!(40), dec!(60), dec!(1)]).unwrap(),
            dec!(2.5)
        );
    }

    #[test]
    fn test_compute_fee_items_only() {
        let policy =
            CurrencyPolicy::new(Decimal::ZERO, Feeer::Nil).with_item_feeer(fixed(dec!(0.5)));
        assert_eq!(compute_fee(&policy, &[dec!(40), dec!(60)]).unwrap(), dec!(1));
        assert_eq!(policy.fee_receiver(), Some(&receiver()));
    }

    #[test]
    fn test_ratio_bounds_validated() {
        assert!(Feeer::ratio(receiver(), dec!(0.01), dec!(2), dec!(5)).is_ok());
        assert!(matches!(
            Feeer::ratio(receiver(), dec!(0.01), dec!(5), dec!(2)),
            Err(Error::InvariantViolation(_))
        ));
        assert!(Feeer::ratio(receiver(), dec!(1.5), dec!(0), dec!(2)).is_err());

        // a committed design with inverted bounds never clamps silently
        let inverted = Feeer::Ratio {
            receiver: receiver(),
            ratio: dec!(0.01),
            min: dec!(5),
            max: dec!(2),
        };
        assert!(inverted.fee(dec!(300)).is_err());
        assert!(CurrencyPolicy::new(Decimal::ZERO, Feeer::Nil)
            .with_item_feeer(inverted)
            .validate()
            .is_err());
    }

    fn transfer_op() -> Operation {
        let fact = TransferFact::new(
            "fee",
            address("alice01"),
            vec![TransferItem::new(address("bob01"), vec![amount(10)])],
        )
        .unwrap();
        Operation::signed(
            TRANSFER_HINT,
            Arc::new(fact),
            &[&keypair(1)],
            &network(),
            Extensions::none(),
        )
        .unwrap()
    }

    fn design_paying(receiver: &str) -> CurrencyDesign {
        let mut design = currency(1);
        design.policy = CurrencyPolicy::new(
            Decimal::ZERO,
            Feeer::Fixed {
                receiver: address(receiver),
                amount: dec!(1),
            },
        );
        design
    }

    #[test]
    fn test_fee_to_payer_still_deducts() {
        let reader = Genesis::default()
            .currency(design_paying("alice01"))
            .account(user("alice01", 1))
            .balance(&address("alice01"), amount(50))
            .into_reader();

        let values = fee_merge_values(&transfer_op(), &reader).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].key(), balance_state_key(&address("alice01"), &cur()));
        assert_eq!(values[0].value(), &StateValue::DeductBalance(amount(1)));
    }

    #[test]
    fn test_receiver_without_account_rejected() {
        let reader = Genesis::default()
            .currency(design_paying("ghost01"))
            .account(user("alice01", 1))
            .balance(&address("alice01"), amount(50))
            .into_reader();

        assert_eq!(
            reason_kind(fee_merge_values(&transfer_op(), &reader)),
            ReasonKind::StateNotFound
        );
    }

    #[test]
    fn test_nil_policy_has_no_receiver() {
        let policy = CurrencyPolicy::new(Decimal::ZERO, Feeer::Nil);
        assert_eq!(compute_fee(&policy, &[dec!(40)]).unwrap(), Decimal::ZERO);
        assert_eq!(policy.fee_receiver(), None);
    }
}
