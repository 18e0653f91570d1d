//! Per-type operation processors
//!
//! Each processor is bound to one height and one state reader for one
//! operation, checked out of its type's free list by the constructor the
//! registry holds, and handed back to that list by `close`.
//!
//! | hint | processor |
//! |---|---|
//! | `currency-transfer-operation` | [`transfer::TransferProcessor`] |
//! | `currency-create-account-operation` | [`create_account::CreateAccountProcessor`] |
//! | `currency-create-contract-account-operation` | [`contract_account::CreateContractAccountProcessor`] |
//! | `currency-withdraw-operation` | [`withdraw::WithdrawProcessor`] |
//! | `did-register-model-operation` | [`did::RegisterModelProcessor`] |
//! | `did-create-did-operation` | [`did::CreateDidProcessor`] |
//! | `did-update-did-document-operation` | [`did::UpdateDocumentProcessor`] |
//! | `suffrage-candidate-operation` | [`suffrage::CandidateProcessor`] (proposal-aware) |

pub mod contract_account;
pub mod create_account;
pub mod did;
pub mod suffrage;
pub mod transfer;
pub mod withdraw;

use crate::config::PoolConfig;
use crate::context::OpContext;
use crate::error::ProcessResult;
use crate::operation::Operation;
use crate::pool::Reset;
use crate::registry::ProcessorRegistry;
use crate::state::{StateMergeValue, StateReader};
use crate::types::Height;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Idle processors kept per type until configured otherwise
pub const DEFAULT_PROCESSOR_CAPACITY: usize = 1024;

/// Type-specific rules and effects of one operation type
pub trait Processor: Send + Sync {
    /// Type-specific admission rules
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()>;

    /// Business effect of an admitted operation
    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>>;

    /// Release the processor to its pool
    fn close(self: Box<Self>) -> Result<()>;
}

/// Height and state reader a processor is bound to
#[derive(Default)]
pub struct Bound {
    height: Height,
    reader: Option<Arc<dyn StateReader>>,
}

impl Bound {
    /// Bind to a session height and reader
    pub fn bind(&mut self, height: Height, reader: Arc<dyn StateReader>) {
        self.height = height;
        self.reader = Some(reader);
    }

    /// Bound height
    pub fn height(&self) -> Height {
        self.height
    }

    /// Bound reader
    pub fn reader(&self) -> Result<&dyn StateReader> {
        self.reader
            .as_deref()
            .ok_or_else(|| Error::InvariantViolation("processor used while unbound".to_string()))
    }
}

impl Reset for Bound {
    fn reset(&mut self) {
        self.height = Height::default();
        self.reader = None;
    }
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("height", &self.height)
            .field("bound", &self.reader.is_some())
            .finish()
    }
}

/// Registry with every built-in processor
///
/// Also applies the configured per-type pool capacity.
pub fn default_registry(pool: &PoolConfig) -> Result<ProcessorRegistry> {
    let capacity = pool.processor_capacity;
    transfer::TransferProcessor::pool().set_capacity(capacity);
    create_account::CreateAccountProcessor::pool().set_capacity(capacity);
    contract_account::CreateContractAccountProcessor::pool().set_capacity(capacity);
    withdraw::WithdrawProcessor::pool().set_capacity(capacity);
    did::RegisterModelProcessor::pool().set_capacity(capacity);
    did::CreateDidProcessor::pool().set_capacity(capacity);
    did::UpdateDocumentProcessor::pool().set_capacity(capacity);
    suffrage::CandidateProcessor::pool().set_capacity(capacity);

    let mut registry = ProcessorRegistry::new();
    registry.register(
        transfer::TRANSFER_HINT,
        transfer::TransferProcessor::new_processor,
    )?;
    registry.register(
        create_account::CREATE_ACCOUNT_HINT,
        create_account::CreateAccountProcessor::new_processor,
    )?;
    registry.register(
        contract_account::CREATE_CONTRACT_ACCOUNT_HINT,
        contract_account::CreateContractAccountProcessor::new_processor,
    )?;
    registry.register(
        withdraw::WITHDRAW_HINT,
        withdraw::WithdrawProcessor::new_processor,
    )?;
    registry.register(
        did::REGISTER_MODEL_HINT,
        did::RegisterModelProcessor::new_processor,
    )?;
    registry.register(did::CREATE_DID_HINT, did::CreateDidProcessor::new_processor)?;
    registry.register(
        did::UPDATE_DID_DOCUMENT_HINT,
        did::UpdateDocumentProcessor::new_processor,
    )?;
    registry.register_with_proposal(
        suffrage::SUFFRAGE_CANDIDATE_HINT,
        suffrage::CandidateProcessor::new_processor,
    )?;

    Ok(registry)
}
