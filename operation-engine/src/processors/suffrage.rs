//! Suffrage candidacy
//!
//! Proposal-aware: the number of pending candidates may not exceed the live
//! suffrage size of the proposal being built. The consensus layer records
//! accepted candidates itself, so this processor emits no merge values.

use super::{Bound, Processor, DEFAULT_PROCESSOR_CAPACITY};
use crate::config::LimitsConfig;
use crate::context::OpContext;
use crate::crypto::PublicKey;
use crate::error::{ProcessResult, ReasonError};
use crate::fact::{self, downcast_fact, Fact};
use crate::operation::Operation;
use crate::pool::{ObjectPool, Reset};
use crate::state::{lookup, StateMergeValue, StateReader};
use crate::types::{Address, Hash, Height, Hint, Proposal, Version};
use crate::Result;
use lazy_static::lazy_static;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;

/// Suffrage candidate operation hint
pub const SUFFRAGE_CANDIDATE_HINT: Hint =
    Hint::from_static("suffrage-candidate-operation", Version::new(0, 0, 1));

const SUFFRAGE_CANDIDATE_FACT_HINT: Hint =
    Hint::from_static("suffrage-candidate-operation-fact", Version::new(0, 0, 1));

/// Apply to join the suffrage
#[derive(Debug, Clone, Serialize)]
pub struct SuffrageCandidateFact {
    hint: Hint,
    #[serde(with = "serde_bytes")]
    token: Vec<u8>,
    candidate: Address,
    public_key: PublicKey,
    #[serde(skip)]
    hash: Hash,
}

impl SuffrageCandidateFact {
    /// Create new fact
    pub fn new(token: impl Into<Vec<u8>>, candidate: Address, public_key: PublicKey) -> Result<Self> {
        let mut fact = Self {
            hint: SUFFRAGE_CANDIDATE_FACT_HINT,
            token: token.into(),
            candidate,
            public_key,
            hash: Hash::default(),
        };
        fact.hash = fact::fact_hash(&fact)?;
        Ok(fact)
    }

    /// Candidate
    pub fn candidate(&self) -> &Address {
        &self.candidate
    }
}

impl Fact for SuffrageCandidateFact {
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
        fact::validate_token(&self.token)
    }

    fn signer(&self) -> Option<&Address> {
        Some(&self.candidate)
    }
}

lazy_static! {
    static ref POOL: ObjectPool<CandidateProcessor> = ObjectPool::new(DEFAULT_PROCESSOR_CAPACITY);
}

/// Candidate-count limiter
#[derive(Debug, Default)]
pub struct CandidateProcessor {
    bound: Bound,
    suffrage: Vec<Address>,
}

impl CandidateProcessor {
    /// Check a processor out of the pool
    pub fn new_processor(
        height: Height,
        proposal: &Proposal,
        reader: Arc<dyn StateReader>,
    ) -> Result<Box<dyn Processor>> {
        let mut processor = POOL.get();
        processor.bound.bind(height, reader);
        processor.suffrage.extend_from_slice(&proposal.suffrage);
        Ok(processor)
    }

    /// Free list of this processor type
    pub fn pool() -> &'static ObjectPool<Self> {
        &POOL
    }
}

impl Reset for CandidateProcessor {
    fn reset(&mut self) {
        self.bound.reset();
        self.suffrage.clear();
    }
}

impl Processor for CandidateProcessor {
    fn pre_process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<()> {
        ctx.ensure_active()?;
        let fact = downcast_fact::<SuffrageCandidateFact>(op.fact())?;
        let candidates = lookup::suffrage_candidates(self.bound.reader()?)?;

        if self.suffrage.contains(&fact.candidate) {
            return Err(ReasonError::exists(format!(
                "{} already in suffrage",
                fact.candidate
            ))
            .into());
        }
        if candidates.contains(&fact.candidate) {
            return Err(ReasonError::exists(format!(
                "{} already a candidate",
                fact.candidate
            ))
            .into());
        }
        if candidates.len() + 1 > self.suffrage.len() {
            return Err(ReasonError::limit_exceeded(format!(
                "{} candidates would exceed suffrage size {}",
                candidates.len() + 1,
                self.suffrage.len()
            ))
            .into());
        }
        Ok(())
    }

    fn process(&self, ctx: &OpContext, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        ctx.ensure_active()?;
        downcast_fact::<SuffrageCandidateFact>(op.fact())?;
        Ok(Vec::new())
    }

    fn close(self: Box<Self>) -> Result<()> {
        POOL.put(self);
        Ok(())
    }
}
