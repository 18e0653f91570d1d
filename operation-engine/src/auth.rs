//! Authorization and capability checks
//!
//! Authorization takes one of two paths:
//!
//! 1. With both a settlement and an authentication extension, the DID proof
//!    replaces the fact signer check.
//! 2. Otherwise the fact signer's account threshold must be met by the
//!    operation's signs.
//!
//! On both paths an attached settlement needs its op-sender's threshold, and
//! an attached proxy payer needs a settlement whose op-sender owns or handles
//! the proxy contract.
//!
//! Capability checks then run for each capability the fact exposes.

use crate::error::{ProcessResult, ReasonError};
use crate::extension::Extensions;
use crate::fact::{ContractAccess, Fact};
use crate::fee;
use crate::operation::Operation;
use crate::state::{lookup, Account, StateReader};
use crate::types::{Address, NetworkId};
use crate::Error;
use tracing::trace;

/// Signs of `op` meet the weighted threshold of `account`
///
/// Only keys of the account with a verified sign count, each once.
pub fn check_threshold(
    account: &Account,
    op: &Operation,
    network_id: &NetworkId,
) -> ProcessResult<()> {
    let keys = account.keys.as_ref().ok_or_else(|| {
        ReasonError::unauthorized(format!("account {} has no signing keys", account.address))
    })?;

    let weight: u32 = op
        .verified_signers(network_id)
        .iter()
        .filter_map(|signer| keys.weight_of(signer))
        .map(u32::from)
        .sum();

    if weight < u32::from(keys.threshold()) {
        return Err(ReasonError::unauthorized(format!(
            "signs of {} weigh {} below threshold {}",
            account.address,
            weight,
            keys.threshold()
        ))
        .into());
    }
    Ok(())
}

/// Authorize `op` by extension proof or by signer threshold
///
/// Extensions that move the fee elsewhere are verified on either path, so a
/// signer cannot bill an account it does not control.
pub fn authorize(
    op: &Operation,
    reader: &dyn StateReader,
    network_id: &NetworkId,
) -> ProcessResult<()> {
    match op.extensions().delegated() {
        Some((authentication, _)) => {
            authentication.verify(op, reader, network_id)?;
            trace!(op = %op.hash(), did = %authentication.did, "authorized by extension");
        }
        None => {
            let signer = op
                .fact()
                .signer()
                .ok_or_else(|| Error::MissingCapability {
                    hint: op.hint().clone(),
                    capability: "signer",
                })?;

            let account = lookup::existing_account(reader, signer)?;
            check_threshold(&account, op, network_id)?;
        }
    }

    verify_payment_extensions(op, reader, network_id)
}

/// Settlement op-sender signed the operation; proxy payer serves that sender
fn verify_payment_extensions(
    op: &Operation,
    reader: &dyn StateReader,
    network_id: &NetworkId,
) -> ProcessResult<()> {
    let extensions = op.extensions();
    match (&extensions.settlement, &extensions.proxy_payer) {
        (Some(settlement), proxy_payer) => {
            settlement.verify(op, reader, network_id)?;
            if let Some(proxy_payer) = proxy_payer {
                proxy_payer.verify(&settlement.op_sender, reader)?;
            }
        }
        (None, Some(proxy_payer)) => {
            return Err(ReasonError::invalid(format!(
                "proxy payer {} without settlement",
                proxy_payer.proxy_payer
            ))
            .into());
        }
        (None, None) => {}
    }
    Ok(())
}

/// Run every capability check the fact exposes
pub fn check_capabilities(op: &Operation, reader: &dyn StateReader) -> ProcessResult<()> {
    let fact = op.fact();

    fee::check_affordable(op, reader)?;

    if let Some(user) = fact.fact_user() {
        check_fact_user(fact, user, op.extensions(), reader)?;
    }

    if let Some(accesses) = fact.contract_owner_only() {
        for access in &accesses {
            check_contract_access(access, reader)?;
        }
    }

    if let Some(contracts) = fact.active_contracts() {
        for contract in &contracts {
            check_active_contract(contract, reader)?;
        }
    }

    Ok(())
}

fn check_fact_user(
    fact: &dyn Fact,
    user: &Address,
    extensions: &Extensions,
    reader: &dyn StateReader,
) -> ProcessResult<()> {
    lookup::existing_account(reader, user)?;
    lookup::ensure_not_contract(reader, user)?;

    match &extensions.authentication {
        Some(authentication) => {
            let document =
                lookup::existing_did_document(reader, &authentication.contract, &authentication.did)?;
            if &document.controller != user {
                return Err(ReasonError::unauthorized(format!(
                    "{} does not control {}",
                    user, authentication.did
                ))
                .into());
            }
        }
        None => {
            if fact.signer() != Some(user) {
                return Err(ReasonError::unauthorized(format!(
                    "fact user {} is not the signer",
                    user
                ))
                .into());
            }
        }
    }
    Ok(())
}

fn check_contract_access(access: &ContractAccess, reader: &dyn StateReader) -> ProcessResult<()> {
    let status = lookup::existing_contract_status(reader, &access.contract)?;
    if !status.is_owner_or_handler(&access.actor) {
        return Err(ReasonError::unauthorized(format!(
            "{} is neither owner nor handler of {}",
            access.actor, access.contract
        ))
        .into());
    }
    if !access.status.allows(status.is_active) {
        return Err(ReasonError::contract_status(format!(
            "contract {} is {}, requires {:?}",
            access.contract,
            if status.is_active { "active" } else { "inactive" },
            access.status
        ))
        .into());
    }
    Ok(())
}

fn check_active_contract(contract: &Address, reader: &dyn StateReader) -> ProcessResult<()> {
    let status = lookup::existing_contract_status(reader, contract)?;
    if !status.is_active {
        return Err(
            ReasonError::contract_status(format!("contract {} is not active", contract)).into(),
        );
    }
    Ok(())
}
