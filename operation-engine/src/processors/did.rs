//! DID registry operations
//!
//! A contract becomes a DID registry by registering a DID method on it
//! (`did-register-model-operation`), which also activates the contract.
//! Accounts then issue themselves a DID and document on that contract and
//! may replace the document's authentication methods later.
//!
//! DID operations pay the currency's flat fee over a zero base.

use super::{Bound, Processor, DEFAULT_PROCESSOR_CAPACITY};
use crate::config::LimitsConfig;
use crate::context::OpContext;
use crate::crypto::PublicKey;
use crate::duplication::{DuplicationKeySet, DuplicationKeyType};
use crate::error::{ProcessResult, ReasonError};
use crate::fact::{
    self, downcast_fact, ContractAccess, ContractStatusRequirement, Fact, FeeAble,
};
use crate::operation::Operation;
use crate::pool::{ObjectPool, Reset};
use crate::state::{
    contract_account_state_key, did_data_state_key, did_design_state_key,
    did_document_state_key, lookup, DidData, DidDesign, DidDocument, StateMergeValue,
    StateReader, StateValue, VerificationMethod,
};
use crate::types::{Address, CurrencyId, Hash, Height, Hint, Version};
use crate::Result;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Register-model operation hint
pub const REGISTER_MODEL_HINT: Hint =
    Hint::from_static("did-register-model-operation", Version::new(0, 0, 1));

/// Create-DID operation hint
pub const CREATE_DID_HINT: Hint =
    Hint::from_static("did-create-did-operation", Version::new(0, 0, 1));

/// Update-DID-document operation hint
pub const UPDATE_DID_DOCUMENT_HINT: Hint =
    Hint::from_static("did-update-did-document-operation", Version::new(0, 0, 1));

const REGISTER_MODEL_FACT_HINT: Hint =
    Hint::from_static("did-register-model-operation-fact", Version::new(0, 0, 1));
const CREATE_DID_FACT_HINT: Hint =
    Hint::from_static("did-create-did-operation-fact", Version::new(0, 0, 1));
const UPDATE_DID_DOCUMENT_FACT_HINT: Hint = Hint::from_static(
    "did-update-did-document-operation-fact",
    Version::new(0, 0, 1),
);

/// Suffix of the method ID issued with a new document
pub const INITIAL_AUTHENTICATION_SUFFIX: &str = "#auth-key-1";

fn zero_fee_base(currency: &CurrencyId) -> BTreeMap<CurrencyId, Vec<Decimal>> {
    BTreeMap::from([(currency.clone(), vec![Decimal::ZERO])])
}

fn validate_method_name(method: &str) -> ProcessResult<()> {
    let valid = (1..=10).contains(&method.len())
        && method
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !valid {
        return Err(ReasonError::invalid(format!("invalid did method {:?}", method)).into());
    }
    Ok(())
}

fn validate_sender_contract(sender: &Address, contract: &Address) -> ProcessResult<()> {
    if sender == contract {
        return Err(ReasonError::invalid(format!("{} is both sender and contract", sender)).into());
    }
    Ok(())
}

/// Register a DID method on a contract
#[derive(Debug, Clone, Serialize)]
pub struct RegisterModelFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    contract: Address,
    method: String,
    currency: CurrencyId,
    #[serde(skip)]
    hash: Hash,
}

impl RegisterModelFact {
    /// Create new fact
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        contract: Address,
        method: impl Into<String>,
        currency: CurrencyId,
    ) -> Result<Self> {
        let mut fact = Self {
            hint: REGISTER_MODEL_FACT_HINT,
            token: token.into(),
            sender,
            contract,
            method: method.into(),
            currency,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }
}

impl Fact for RegisterModelFact {
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

    fn validate(&self, _limits: &LimitsConfig) -> ProcessResult<()> {
        fact::validate_token(&self.token)?;
        validate_sender_contract(&self.sender, &self.contract)?;
        validate_method_name(&self.method)
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        Some(
            DuplicationKeySet::new()
                .with(DuplicationKeyType::ContractAccount, self.contract.as_str()),
        )
    }

    fn fee(&self) -> Option<&dyn FeeAble> {
        Some(self)
    }

    fn contract_owner_only(&self) -> Option<Vec<ContractAccess>> {
        Some(vec![ContractAccess::new(
            self.contract.clone(),
            self.sender.clone(),
            ContractStatusRequirement::Inactive,
        )])
    }
}

impl FeeAble for RegisterModelFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        zero_fee_base(&self.currency)
    }
}

lazy_static! {
    static ref REGISTER_MODEL_POOL: ObjectPool<RegisterModelProcessor> =
        ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
    static ref CREATE_DID_POOL: ObjectPool<CreateDidProcessor> =
        ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
    static ref UPDATE_DOCUMENT_POOL: ObjectPool<UpdateDocumentProcessor> =
        ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
}

/// Register-model processor
#[derive(Debug, Default)]
pub struct RegisterModelProcessor {
    bound: Bound,
}

impl RegisterModelProcessor {
    /// Check a processor out of the pool
    pub fn new_processor(height: Height, reader: Arc<dyn StateReader>) -> Result<Box<dyn Processor>> {
        let mut processor = REGISTER_MODEL_POOL.get();
        processor.bound.bind(height, reader);
        Ok(processor)
    }

    /// Free list of this processor type
    pub fn pool() -> &'static ObjectPool<Self> {
        &REGISTER_MODEL_POOL
    }
}

impl Reset for RegisterModelProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for RegisterModelProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<RegisterModelFact>(op.fact())?;
        let reader = self.bound.reader()?;

        lookup::existing_currency_design(reader, &fact.currency)?;
        if lookup::did_design(reader, &fact.contract)?.is_some() {
            return Err(ReasonError::exists(format!(
                "did design of contract {} already registered",
                fact.contract
            ))
            .into());
        }
        Ok(())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<RegisterModelFact>(op.fact())?;
        let reader = self.bound.reader()?;

        let mut status = lookup::existing_contract_status(reader, &fact.contract)?;
        status.is_active = true;

        Ok(vec![
            StateMergeValue::new(
                did_design_state_key(&fact.contract),
                StateValue::DidDesign(DidDesign {
                    method: fact.method.clone(),
                }),
            ),
            StateMergeValue::new(
                contract_account_state_key(&fact.contract),
                StateValue::ContractAccount(status),
            ),
        ])
    }

    fn close(self: Box<Self>) -> Result<()> {
        REGISTER_MODEL_POOL.put(self);
        Ok(())
    }
}

/// Issue a DID and document for the sender
#[derive(Debug, Clone, Serialize)]
pub struct CreateDidFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    contract: Address,
    auth_key: PublicKey,
    currency: CurrencyId,
    #[serde(skip)]
    hash: Hash,
}

impl CreateDidFact {
    /// Create new fact
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        contract: Address,
        auth_key: PublicKey,
        currency: CurrencyId,
    ) -> Result<Self> {
        let mut fact = Self {
            hint: CREATE_DID_FACT_HINT,
            token: token.into(),
            sender,
            contract,
            auth_key,
            currency,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }
}

impl Fact for CreateDidFact {
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

    fn validate(&self, _limits: &LimitsConfig) -> ProcessResult<()> {
        fact::validate_token(&self.token)?;
        validate_sender_contract(&self.sender, &self.contract)
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        Some(DuplicationKeySet::new().with(
            DuplicationKeyType::DidSubject,
            format!("{}:{}", self.contract, self.sender),
        ))
    }

    fn fee(&self) -> Option<&dyn FeeAble> {
        Some(self)
    }

    fn fact_user(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn active_contracts(&self) -> Option<Vec<Address>> {
        Some(vec![self.contract.clone()])
    }
}

impl FeeAble for CreateDidFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        zero_fee_base(&self.currency)
    }
}

/// Create-DID processor
#[derive(Debug, Default)]
pub struct CreateDidProcessor {
    bound: Bound,
}

impl CreateDidProcessor {
    /// Check a processor out of the pool
    pub fn new_processor(height: Height, reader: Arc<dyn StateReader>) -> Result<Box<dyn Processor>> {
        let mut processor = CREATE_DID_POOL.get();
        processor.bound.bind(height, reader);
        Ok(processor)
    }

    /// Free list of this processor type
    pub fn pool() -> &'static ObjectPool<Self> {
        &CREATE_DID_POOL
    }
}

impl Reset for CreateDidProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for CreateDidProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<CreateDidFact>(op.fact())?;
        let reader = self.bound.reader()?;

        lookup::existing_currency_design(reader, &fact.currency)?;
        lookup::existing_did_design(reader, &fact.contract)?;
        if lookup::did_data(reader, &fact.contract, &fact.sender)?.is_some() {
            return Err(ReasonError::exists(format!(
                "{} already holds a did on {}",
                fact.sender, fact.contract
            ))
            .into());
        }
        Ok(())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<CreateDidFact>(op.fact())?;
        let design = lookup::existing_did_design(self.bound.reader()?, &fact.contract)?;

        let did = design.did_of(&fact.sender);
        let document = DidDocument {
            did: did.clone(),
            controller: fact.sender.clone(),
            active: true,
            authentication: vec![VerificationMethod {
                id: format!("{}{}", did, INITIAL_AUTHENTICATION_SUFFIX),
                public_key: fact.auth_key,
            }],
        };

        Ok(vec![
            StateMergeValue::new(
                did_data_state_key(&fact.contract, &fact.sender),
                StateValue::DidData(DidData {
                    address: fact.sender.clone(),
                    did: did.clone(),
                }),
            ),
            StateMergeValue::new(
                did_document_state_key(&fact.contract, &did),
                StateValue::DidDocument(document),
            ),
        ])
    }

    fn close(self: Box<Self>) -> Result<()> {
        CREATE_DID_POOL.put(self);
        Ok(())
    }
}

/// Replace the authentication methods of a DID document
#[derive(Debug, Clone, Serialize)]
pub struct UpdateDocumentFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    sender: Address,
    contract: Address,
    did: String,
    methods: Vec<VerificationMethod>,
    currency: CurrencyId,
    #[serde(skip)]
    hash: Hash,
}

impl UpdateDocumentFact {
    /// Create new fact
    pub fn new(
        token: impl Into<Vec<u8>>,
        sender: Address,
        contract: Address,
        did: impl Into<String>,
        methods: Vec<VerificationMethod>,
        currency: CurrencyId,
    ) -> Result<Self> {
        let mut fact = Self {
            hint: UPDATE_DID_DOCUMENT_FACT_HINT,
            token: token.into(),
            sender,
            contract,
            did: did.into(),
            methods,
            currency,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }
}

impl Fact for UpdateDocumentFact {
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
        validate_sender_contract(&self.sender, &self.contract)?;

        if self.methods.is_empty() {
            return Err(ReasonError::invalid("document without authentication").into());
        }
        if self.methods.len() > limits.max_did_methods {
            return Err(ReasonError::limit_exceeded(format!(
                "{} methods over limit {}",
                self.methods.len(),
                limits.max_did_methods
            ))
            .into());
        }

        let prefix = format!("{}#", self.did);
        let mut ids = BTreeSet::new();
        for method in &self.methods {
            if !method.id.starts_with(&prefix) {
                return Err(ReasonError::invalid(format!(
                    "method {} outside {}",
                    method.id, self.did
                ))
                .into());
            }
            if !ids.insert(method.id.as_str()) {
                return Err(
                    ReasonError::invalid(format!("duplicated method {}", method.id)).into(),
                );
            }
        }
        Ok(())
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn duplication_keys(&self) -> Option<DuplicationKeySet> {
        Some(DuplicationKeySet::new().with(
            DuplicationKeyType::DidDocument,
            format!("{}:{}", self.contract, self.did),
        ))
    }

    fn fee(&self) -> Option<&dyn FeeAble> {
        Some(self)
    }

    fn fact_user(&self) -> Option<&Address> {
        Some(&self.sender)
    }

    fn active_contracts(&self) -> Option<Vec<Address>> {
        Some(vec![self.contract.clone()])
    }
}

impl FeeAble for UpdateDocumentFact {
    fn fee_payer(&self) -> &Address {
        &self.sender
    }

    fn fee_base(&self) -> BTreeMap<CurrencyId, Vec<Decimal>> {
        zero_fee_base(&self.currency)
    }
}

/// Update-DID-document processor
#[derive(Debug, Default)]
pub struct UpdateDocumentProcessor {
    bound: Bound,
}

impl UpdateDocumentProcessor {
    /// Check a processor out of the pool
    pub fn new_processor(height: Height, reader: Arc<dyn StateReader>) -> Result<Box<dyn Processor>> {
        let mut processor = UPDATE_DOCUMENT_POOL.get();
        processor.bound.bind(height, reader);
        Ok(processor)
    }

    /// Free list of this processor type
    pub fn pool() -> &'static ObjectPool<Self> {
        &UPDATE_DOCUMENT_POOL
    }

    fn controlled_document(&self, fact: &UpdateDocumentFact) -> ProcessResult<DidDocument> {
        let document =
            lookup::existing_did_document(self.bound.reader()?, &fact.contract, &fact.did)?;
        if document.controller != fact.sender {
            return Err(ReasonError::unauthorized(format!(
                "{} does not control {}",
                fact.sender, fact.did
            ))
            .into());
        }
        if !document.active {
            return Err(
                ReasonError::unauthorized(format!("did document {} deactivated", fact.did)).into(),
            );
        }
        Ok(document)
    }
}

impl Reset for UpdateDocumentProcessor {
    fn reset(&mut self) {
        self.bound.reset();
    }
}

impl Processor for UpdateDocumentProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<UpdateDocumentFact>(op.fact())?;
        lookup::existing_currency_design(self.bound.reader()?, &fact.currency)?;
        self.controlled_document(fact).map(|_| ())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<UpdateDocumentFact>(op.fact())?;

        let mut document = self.controlled_document(fact)?;
        document.authentication = fact.methods.clone();

        Ok(vec![StateMergeValue::new(
            did_document_state_key(&fact.contract, &fact.did),
            StateValue::DidDocument(document),
        )])
    }

    fn close(self: Box<Self>) -> Result<()> {
        UPDATE_DOCUMENT_POOL.put(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonKind;
    use crate::extension::Extensions;
    use crate::genesis::Genesis;
    use crate::processors::fixtures::*;
    use crate::state::ContractAccountStatus;

    fn registry_genesis(active: bool) -> Genesis {
        let mut status = ContractAccountStatus::new(address("alice01"));
        status.is_active = active;
        let genesis = base_genesis(150)
            .account(user("bob01", 2))
            .contract(&address("registry01"), status);
        if active {
            genesis.did_design(
                &address("registry01"),
                DidDesign {
                    method: "ledger".to_string(),
                },
            )
        } else {
            genesis
        }
    }

    fn op(hint: Hint, fact: impl Fact + 'static, seed: u8) -> Operation {
        Operation::signed(hint, Arc::new(fact), &[&keypair(seed)], &network(), Extensions::none())
            .unwrap()
    }

    #[test]
    fn test_register_model_activates_contract() {
        let reader: Arc<dyn StateReader> = Arc::new(registry_genesis(false).into_reader());
        let processor = RegisterModelProcessor::new_processor(Height::new(2), reader).unwrap();
        let fact = RegisterModelFact::new(
            "rm1",
            address("alice01"),
            address("registry01"),
            "ledger",
            cur(),
        )
        .unwrap();
        let op = op(REGISTER_MODEL_HINT, fact, 1);

        let ctx = OpContext::new();
        processor.pre_process(&ctx, &op).unwrap();
        let values = processor.process(&ctx, &op).unwrap();

        match values[1].value() {
            StateValue::ContractAccount(status) => assert!(status.is_active),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            op.fact().contract_owner_only().unwrap()[0].status,
            ContractStatusRequirement::Inactive
        );
        assert_eq!(
            op.fact().fee().unwrap().fee_base()[&cur()],
            vec![Decimal::ZERO]
        );
        processor.close().unwrap();
    }

    #[test]
    fn test_invalid_method_name() {
        let fact = RegisterModelFact::new(
            "rm2",
            address("alice01"),
            address("registry01"),
            "Ledger!",
            cur(),
        )
        .unwrap();
        assert_eq!(
            reason_kind(fact.validate(&LimitsConfig::default())),
            ReasonKind::InvalidFact
        );
    }

    #[test]
    fn test_create_did_issues_document() {
        let reader: Arc<dyn StateReader> = Arc::new(registry_genesis(true).into_reader());
        let processor = CreateDidProcessor::new_processor(Height::new(2), reader).unwrap();
        let fact = CreateDidFact::new(
            "cd1",
            address("bob01"),
            address("registry01"),
            keypair(77).public_key(),
            cur(),
        )
        .unwrap();
        let op = op(CREATE_DID_HINT, fact, 2);

        let ctx = OpContext::new();
        processor.pre_process(&ctx, &op).unwrap();
        let values = processor.process(&ctx, &op).unwrap();

        assert_eq!(values[0].key(), "registry01:bob01:diddata");
        match values[1].value() {
            StateValue::DidDocument(document) => {
                assert_eq!(document.did, "did:ledger:bob01");
                assert_eq!(document.controller, address("bob01"));
                assert_eq!(
                    document.authentication[0].id,
                    "did:ledger:bob01#auth-key-1"
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            op.fact()
                .duplication_keys()
                .unwrap()
                .get(DuplicationKeyType::DidSubject),
            &["registry01:bob01".to_string()]
        );
        processor.close().unwrap();
    }

    #[test]
    fn test_create_did_without_design_is_rejected() {
        let reader: Arc<dyn StateReader> = Arc::new(registry_genesis(false).into_reader());
        let processor = CreateDidProcessor::new_processor(Height::new(2), reader).unwrap();
        let fact = CreateDidFact::new(
            "cd2",
            address("bob01"),
            address("registry01"),
            keypair(77).public_key(),
            cur(),
        )
        .unwrap();

        assert_eq!(
            reason_kind(processor.pre_process(&OpContext::new(), &op(CREATE_DID_HINT, fact, 2))),
            ReasonKind::StateNotFound
        );
        processor.close().unwrap();
    }

    #[test]
    fn test_update_document_requires_controller() {
        let did = "did:ledger:bob01";
        let document = DidDocument {
            did: did.to_string(),
            controller: address("bob01"),
            active: true,
            authentication: vec![VerificationMethod {
                id: format!("{}#auth-key-1", did),
                public_key: keypair(77).public_key(),
            }],
        };
        let reader: Arc<dyn StateReader> = Arc::new(
            registry_genesis(true)
                .did(
                    &address("registry01"),
                    DidData {
                        address: address("bob01"),
                        did: did.to_string(),
                    },
                    document,
                )
                .into_reader(),
        );
        let methods = vec![VerificationMethod {
            id: format!("{}#auth-key-2", did),
            public_key: keypair(78).public_key(),
        }];

        let processor = UpdateDocumentProcessor::new_processor(Height::new(2), reader.clone()).unwrap();
        let by_owner = UpdateDocumentFact::new(
            "ud1",
            address("bob01"),
            address("registry01"),
            did,
            methods.clone(),
            cur(),
        )
        .unwrap();
        let op_owner = op(UPDATE_DID_DOCUMENT_HINT, by_owner, 2);
        let ctx = OpContext::new();
        processor.pre_process(&ctx, &op_owner).unwrap();
        let values = processor.process(&ctx, &op_owner).unwrap();
        match values[0].value() {
            StateValue::DidDocument(updated) => assert_eq!(updated.authentication, methods),
            other => panic!("unexpected {:?}", other),
        }
        processor.close().unwrap();

        let processor = UpdateDocumentProcessor::new_processor(Height::new(2), reader).unwrap();
        let by_other = UpdateDocumentFact::new(
            "ud2",
            address("alice01"),
            address("registry01"),
            did,
            methods,
            cur(),
        )
        .unwrap();
        assert_eq!(
            reason_kind(
                processor.pre_process(&ctx, &op(UPDATE_DID_DOCUMENT_HINT, by_other, 1))
            ),
            ReasonKind::Unauthorized
        );
        processor.close().unwrap();
    }
}
