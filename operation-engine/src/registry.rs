//! Hint-keyed processor registry
//!
//! Two tables: state-only constructors and proposal-aware constructors (for
//! operation types whose rules depend on the proposal being built). Both are
//! populated once at startup and shared read-only by every session.
//!
//! Lookup in one table tries the exact hint first, then the highest
//! registered version of the same type and major version.

use crate::operation::Operation;
use crate::processors::Processor;
use crate::state::StateReader;
use crate::types::{Height, Hint, Proposal, Version};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// State-only processor constructor
pub type NewProcessor =
    Arc<dyn Fn(Height, Arc<dyn StateReader>) -> Result<Box<dyn Processor>> + Send + Sync>;

/// Proposal-aware processor constructor
pub type NewProposalProcessor = Arc<
    dyn Fn(Height, &Proposal, Arc<dyn StateReader>) -> Result<Box<dyn Processor>> + Send + Sync,
>;

/// Dispatch strategy of a session
pub type DispatchFn = fn(
    &ProcessorRegistry,
    Height,
    Option<&Proposal>,
    Arc<dyn StateReader>,
    &Operation,
) -> Result<Box<dyn Processor>>;

/// Processor constructors by hint
#[derive(Default)]
pub struct ProcessorRegistry {
    state_only: BTreeMap<Hint, NewProcessor>,
    proposal_aware: BTreeMap<Hint, NewProposalProcessor>,
}

impl ProcessorRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state-only constructor
    pub fn register<F>(&mut self, hint: Hint, new_processor: F) -> Result<()>
    where
        F: Fn(Height, Arc<dyn StateReader>) -> Result<Box<dyn Processor>> + Send + Sync + 'static,
    {
        if self.state_only.contains_key(&hint) {
            return Err(Error::Config(format!("processor for {} already registered", hint)));
        }
        self.state_only.insert(hint, Arc::new(new_processor));
        Ok(())
    }

    /// Register a proposal-aware constructor
    pub fn register_with_proposal<F>(&mut self, hint: Hint, new_processor: F) -> Result<()>
    where
        F: Fn(Height, &Proposal, Arc<dyn StateReader>) -> Result<Box<dyn Processor>>
            + Send
            + Sync
            + 'static,
    {
        if self.proposal_aware.contains_key(&hint) {
            return Err(Error::Config(format!(
                "proposal processor for {} already registered",
                hint
            )));
        }
        self.proposal_aware.insert(hint, Arc::new(new_processor));
        Ok(())
    }

    /// State-only constructor matching `hint`
    pub fn state_only(&self, hint: &Hint) -> Option<&NewProcessor> {
        find_compatible(&self.state_only, hint)
    }

    /// Proposal-aware constructor matching `hint`
    pub fn proposal_aware(&self, hint: &Hint) -> Option<&NewProposalProcessor> {
        find_compatible(&self.proposal_aware, hint)
    }

    /// Registered hints, state-only first
    pub fn hints(&self) -> impl Iterator<Item = &Hint> + '_ {
        self.state_only.keys().chain(self.proposal_aware.keys())
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("state_only", &self.state_only.keys().collect::<Vec<_>>())
            .field(
                "proposal_aware",
                &self.proposal_aware.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn find_compatible<'a, V>(table: &'a BTreeMap<Hint, V>, hint: &Hint) -> Option<&'a V> {
    if let Some(exact) = table.get(hint) {
        return Some(exact);
    }

    let major = hint.version().major;
    let low = Hint::new(hint.kind(), Version::new(major, 0, 0));
    let high = Hint::new(hint.kind(), Version::new(major, u16::MAX, u16::MAX));
    table.range(low..=high).next_back().map(|(_, value)| value)
}

/// Default dispatch: state-only table, then proposal-aware table
///
/// A proposal-aware match in a session without a proposal, or no match at
/// all, is a hard error.
pub fn dispatch(
    registry: &ProcessorRegistry,
    height: Height,
    proposal: Option<&Proposal>,
    reader: Arc<dyn StateReader>,
    op: &Operation,
) -> Result<Box<dyn Processor>> {
    if let Some(new_processor) = registry.state_only(op.hint()) {
        return new_processor(height, reader);
    }

    if let Some(new_processor) = registry.proposal_aware(op.hint()) {
        let proposal = proposal.ok_or_else(|| {
            Error::Config(format!(
                "{} needs a proposal but the session has none",
                op.hint()
            ))
        })?;
        return new_processor(height, proposal, reader);
    }

    Err(Error::UnregisteredHint(op.hint().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_compatible_prefers_exact_then_highest() {
        let mut table = BTreeMap::new();
        table.insert(Hint::from_static("transfer", Version::new(1, 0, 0)), "1.0.0");
        table.insert(Hint::from_static("transfer", Version::new(1, 3, 0)), "1.3.0");
        table.insert(Hint::from_static("transfer", Version::new(2, 0, 0)), "2.0.0");
        table.insert(Hint::from_static("withdraw", Version::new(1, 9, 0)), "w1.9.0");

        let exact = Hint::new("transfer", Version::new(1, 0, 0));
        assert_eq!(find_compatible(&table, &exact), Some(&"1.0.0"));

        let newer_minor = Hint::new("transfer", Version::new(1, 5, 0));
        assert_eq!(find_compatible(&table, &newer_minor), Some(&"1.3.0"));

        let other_major = Hint::new("transfer", Version::new(3, 0, 0));
        assert_eq!(find_compatible(&table, &other_major), None);

        let unknown = Hint::new("mint", Version::new(1, 0, 0));
        assert_eq!(find_compatible(&table, &unknown), None);
    }
}
