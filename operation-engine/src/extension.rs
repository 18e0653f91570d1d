//! Operation extensions
//!
//! Extensions carry authorization and payment metadata outside the fact:
//!
//! - **authentication**: a DID-linked proof replacing the fact signer's own
//!   signature check
//! - **settlement**: names the account that actually sends the operation and
//!   pays its fees
//! - **proxy payer**: a contract account paying the fees on the op-sender's
//!   behalf
//!
//! Authentication replaces the signer check only together with settlement.
//! A proxy payer is honoured only alongside a settlement.

use crate::auth::check_threshold;
use crate::crypto::Signature;
use crate::error::{ProcessResult, ReasonError};
use crate::operation::{sign_message, Operation};
use crate::state::{lookup, DidDocument, StateReader};
use crate::types::{Address, NetworkId};
use serde::{Deserialize, Serialize};

/// DID-linked authentication proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationExtension {
    /// Contract holding the DID document
    pub contract: Address,
    /// DID
    pub did: String,
    /// Authentication method used for the proof
    pub authentication_id: String,
    /// Signature by the method key over the sign message
    pub proof_data: Signature,
}

impl AuthenticationExtension {
    /// Create new authentication extension
    pub fn new(
        contract: Address,
        did: impl Into<String>,
        authentication_id: impl Into<String>,
        proof_data: Signature,
    ) -> Self {
        Self {
            contract,
            did: did.into(),
            authentication_id: authentication_id.into(),
            proof_data,
        }
    }

    /// Verify the proof; returns the authenticated document
    pub fn verify(
        &self,
        op: &Operation,
        reader: &dyn StateReader,
        network_id: &NetworkId,
    ) -> ProcessResult<DidDocument> {
        let document = lookup::existing_did_document(reader, &self.contract, &self.did)?;
        if !document.active {
            return Err(
                ReasonError::unauthorized(format!("did document {} deactivated", self.did)).into(),
            );
        }

        let method = document
            .authentication_method(&self.authentication_id)
            .ok_or_else(|| {
                ReasonError::not_found(format!(
                    "authentication {} not found in {}",
                    self.authentication_id, self.did
                ))
            })?;

        let message = sign_message(network_id, &op.fact().hash());
        if !method.public_key.verify(&message, &self.proof_data) {
            return Err(ReasonError::unauthorized(format!(
                "invalid proof for {}",
                self.authentication_id
            ))
            .into());
        }

        Ok(document)
    }
}

/// Names the account sending the operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementExtension {
    /// Op-sender
    pub op_sender: Address,
}

impl SettlementExtension {
    /// Create new settlement extension
    pub fn new(op_sender: Address) -> Self {
        Self { op_sender }
    }

    /// The op-sender account exists and the signs meet its threshold
    pub fn verify(
        &self,
        op: &Operation,
        reader: &dyn StateReader,
        network_id: &NetworkId,
    ) -> ProcessResult<()> {
        let account = lookup::existing_account(reader, &self.op_sender)?;
        check_threshold(&account, op, network_id)
    }
}

/// Contract account paying fees for the op-sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPayerExtension {
    /// Proxy payer
    pub proxy_payer: Address,
}

impl ProxyPayerExtension {
    /// Create new proxy payer extension
    pub fn new(proxy_payer: Address) -> Self {
        Self { proxy_payer }
    }

    /// The payer is an active contract the op-sender owns or handles
    pub fn verify(&self, op_sender: &Address, reader: &dyn StateReader) -> ProcessResult<()> {
        let status = lookup::existing_contract_status(reader, &self.proxy_payer)?;
        if !status.is_active {
            return Err(ReasonError::contract_status(format!(
                "proxy payer {} is not active",
                self.proxy_payer
            ))
            .into());
        }
        if !status.is_owner_or_handler(op_sender) {
            return Err(ReasonError::unauthorized(format!(
                "{} is neither owner nor handler of proxy payer {}",
                op_sender, self.proxy_payer
            ))
            .into());
        }
        Ok(())
    }
}

/// Optional extensions of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    /// Authentication
    pub authentication: Option<AuthenticationExtension>,
    /// Settlement
    pub settlement: Option<SettlementExtension>,
    /// Proxy payer
    pub proxy_payer: Option<ProxyPayerExtension>,
}

impl Extensions {
    /// No extensions
    pub fn none() -> Self {
        Self::default()
    }

    /// With authentication
    pub fn with_authentication(mut self, extension: AuthenticationExtension) -> Self {
        self.authentication = Some(extension);
        self
    }

    /// With settlement
    pub fn with_settlement(mut self, extension: SettlementExtension) -> Self {
        self.settlement = Some(extension);
        self
    }

    /// With proxy payer
    pub fn with_proxy_payer(mut self, extension: ProxyPayerExtension) -> Self {
        self.proxy_payer = Some(extension);
        self
    }

    /// Authentication and settlement, when both are attached
    pub fn delegated(&self) -> Option<(&AuthenticationExtension, &SettlementExtension)> {
        match (&self.authentication, &self.settlement) {
            (Some(authentication), Some(settlement)) => Some((authentication, settlement)),
            _ => None,
        }
    }
}
