//! Operation processing sessions
//!
//! An [`OperationProcessor`] is one session: one height, one optional
//! proposal, one duplication tracker. The block builder checks it out of an
//! [`OperationProcessorPool`], feeds candidate operations through
//! [`pre_process`](OperationProcessor::pre_process) and
//! [`process`](OperationProcessor::process), and ends the session with
//! [`close`](OperationProcessor::close) or [`cancel`](OperationProcessor::cancel).
//!
//! # Pipeline
//!
//! `pre_process`:
//! 1. structural fact validation and sign verification
//! 2. dispatch to the per-type processor
//! 3. authorization (signer threshold, or extension proof)
//! 4. capability checks (fee affordability, fact user, contract ownership,
//!    active contracts)
//! 5. type-specific rules
//! 6. duplication check, last, so only fully admitted operations claim keys
//!
//! `process`: type-specific effects, fee deltas, balance consistency.
//!
//! Business rejections come back as `Ok((_, Some(reason)))`; `Err` is reserved
//! for wiring defects, backend failures and cancellation.

use crate::auth;
use crate::config::{Config, LimitsConfig};
use crate::consistency;
use crate::context::OpContext;
use crate::duplication::{check_duplication, DuplicationCheckFn, DuplicationTracker};
use crate::error::{ProcessResult, ReasonError};
use crate::fee;
use crate::metrics::Metrics;
use crate::operation::Operation;
use crate::pool::{ObjectPool, PoolStats, Reset};
use crate::processors::{default_registry, Processor};
use crate::registry::{dispatch, DispatchFn, ProcessorRegistry};
use crate::state::{StateMergeValue, StateReader};
use crate::types::{Height, NetworkId, Proposal};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Immutable configuration shared by every session of a pool
pub struct ProcessorSettings {
    registry: Arc<ProcessorRegistry>,
    network_id: NetworkId,
    limits: LimitsConfig,
    metrics: Metrics,
    check_duplication: DuplicationCheckFn,
    dispatch: DispatchFn,
}

impl ProcessorSettings {
    /// Settings with the default duplication and dispatch strategies
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        network_id: NetworkId,
        limits: LimitsConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            network_id,
            limits,
            metrics,
            check_duplication,
            dispatch,
        }
    }

    /// Built-in processors, configured network, limits and fresh metrics
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = default_registry(&config.pool)?;
        Ok(Self::new(
            Arc::new(registry),
            config.network_id(),
            config.limits.clone(),
            Metrics::new()?,
        ))
    }

    /// Replace the duplication check strategy
    pub fn with_duplication_check(mut self, check: DuplicationCheckFn) -> Self {
        self.check_duplication = check;
        self
    }

    /// Replace the dispatch strategy
    pub fn with_dispatch(mut self, dispatch: DispatchFn) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Registry
    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Network ID
    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    /// Limits
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl fmt::Debug for ProcessorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorSettings")
            .field("registry", &self.registry)
            .field("network_id", &self.network_id)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct PoolShared {
    settings: Arc<ProcessorSettings>,
    free: ObjectPool<OperationProcessor>,
}

/// Pool of sessions sharing one [`ProcessorSettings`]
#[derive(Debug, Clone)]
pub struct OperationProcessorPool {
    shared: Arc<PoolShared>,
}

impl OperationProcessorPool {
    /// Create new pool keeping at most `capacity` idle sessions
    pub fn new(settings: ProcessorSettings, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                settings: Arc::new(settings),
                free: ObjectPool::new(capacity),
            }),
        }
    }

    /// Pool over [`ProcessorSettings::from_config`]
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            ProcessorSettings::from_config(config)?,
            config.pool.orchestrator_capacity,
        ))
    }

    /// Start a session at `height`
    ///
    /// Proposal-aware operation types are only available when a proposal is
    /// given.
    pub fn checkout(&self, height: Height, proposal: Option<Proposal>) -> Box<OperationProcessor> {
        let mut session = self
            .shared
            .free
            .get_or_else(|| OperationProcessor::from_template(&self.shared));

        session.height = height;
        session.proposal = proposal.map(Arc::new);
        session
            .duplicated
            .get_or_insert_with(DuplicationTracker::new);
        session
            .closers
            .get_or_insert_with(|| Mutex::new(Vec::new()));

        debug!(height = %height, with_proposal = session.proposal.is_some(), "session checked out");
        session
    }

    /// Shared settings
    pub fn settings(&self) -> &ProcessorSettings {
        &self.shared.settings
    }

    /// Session pool counters
    pub fn stats(&self) -> PoolStats {
        self.shared.free.stats()
    }
}

/// One processing session
pub struct OperationProcessor {
    settings: Arc<ProcessorSettings>,
    pool: Weak<PoolShared>,
    height: Height,
    proposal: Option<Arc<Proposal>>,
    duplicated: Option<DuplicationTracker>,
    closers: Option<Mutex<Vec<Box<dyn Processor>>>>,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
}

impl OperationProcessor {
    fn from_template(shared: &Arc<PoolShared>) -> Self {
        Self {
            settings: Arc::clone(&shared.settings),
            pool: Arc::downgrade(shared),
            height: Height::default(),
            proposal: None,
            duplicated: None,
            closers: None,
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Session height
    pub fn height(&self) -> Height {
        self.height
    }

    /// Session proposal
    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_deref()
    }

    /// Keys claimed so far in this session
    pub fn duplication_key_count(&self) -> usize {
        self.duplicated.as_ref().map_or(0, DuplicationTracker::len)
    }

    /// Processors awaiting release at session end
    pub fn tracked_processors(&self) -> usize {
        self.closers.as_ref().map_or(0, |closers| closers.lock().len())
    }

    /// Admit or reject `op` for this session
    pub fn pre_process(
        &self,
        ctx: OpContext,
        op: &Operation,
        reader: &Arc<dyn StateReader>,
    ) -> Result<(OpContext, Option<ReasonError>)> {
        ctx.ensure_active()?;
        self.settings.metrics.record_preprocess();

        match self.run_pre_process(&ctx, op, reader) {
            Ok(()) => {
                debug!(op = %op.hash(), hint = %op.hint(), "operation admitted");
                Ok((ctx, None))
            }
            Err(err) => {
                let reason = err.split()?;
                self.record_rejection(op, &reason, "pre_process");
                Ok((ctx, Some(reason)))
            }
        }
    }

    /// Effects of an admitted `op`; empty when rejected
    pub fn process(
        &self,
        ctx: &OpContext,
        op: &Operation,
        reader: &Arc<dyn StateReader>,
    ) -> Result<(Vec<StateMergeValue>, Option<ReasonError>)> {
        ctx.ensure_active()?;
        self.settings.metrics.record_process();

        match self.run_process(ctx, op, reader) {
            Ok(values) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(op = %op.hash(), values = values.len(), "operation processed");
                Ok((values, None))
            }
            Err(err) => {
                let reason = err.split()?;
                self.record_rejection(op, &reason, "process");
                Ok((Vec::new(), Some(reason)))
            }
        }
    }

    /// End the session successfully
    pub fn close(self: Box<Self>) -> Result<()> {
        self.finish(false)
    }

    /// Abort the session
    pub fn cancel(self: Box<Self>) -> Result<()> {
        self.finish(true)
    }

    fn run_pre_process(
        &self,
        ctx: &OpContext,
        op: &Operation,
        reader: &Arc<dyn StateReader>,
    ) -> ProcessResult<()> {
        op.fact().validate(&self.settings.limits)?;
        op.verify_signs(&self.settings.network_id)?;

        let processor = self.dispatch(op, reader)?;
        let result = self.admit(processor.as_ref(), ctx, op, reader.as_ref());
        self.track(processor)?;
        result
    }

    fn admit(
        &self,
        processor: &dyn Processor,
        ctx: &OpContext,
        op: &Operation,
        reader: &dyn StateReader,
    ) -> ProcessResult<()> {
        auth::authorize(op, reader, &self.settings.network_id)?;
        auth::check_capabilities(op, reader)?;
        ctx.ensure_active()?;

        processor.pre_process(ctx, op)?;
        ctx.ensure_active()?;

        (self.settings.check_duplication)(self.tracker()?, op)
    }

    fn run_process(
        &self,
        ctx: &OpContext,
        op: &Operation,
        reader: &Arc<dyn StateReader>,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let processor = self.dispatch(op, reader)?;
        let result = Self::effects(processor.as_ref(), ctx, op, reader.as_ref());
        self.track(processor)?;
        result
    }

    fn effects(
        processor: &dyn Processor,
        ctx: &OpContext,
        op: &Operation,
        reader: &dyn StateReader,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let mut values = processor.process(ctx, op)?;
        values.extend(fee::fee_merge_values(op, reader)?);
        ctx.ensure_active()?;

        consistency::check_balances(&values, reader)?;
        Ok(values)
    }

    fn dispatch(&self, op: &Operation, reader: &Arc<dyn StateReader>) -> Result<Box<dyn Processor>> {
        (self.settings.dispatch)(
            &self.settings.registry,
            self.height,
            self.proposal.as_deref(),
            Arc::clone(reader),
            op,
        )
    }

    fn tracker(&self) -> Result<&DuplicationTracker> {
        self.duplicated
            .as_ref()
            .ok_or_else(|| Error::InvariantViolation("session used after close".to_string()))
    }

    fn track(&self, processor: Box<dyn Processor>) -> Result<()> {
        let closers = self
            .closers
            .as_ref()
            .ok_or_else(|| Error::InvariantViolation("session used after close".to_string()))?;
        closers.lock().push(processor);
        Ok(())
    }

    fn record_rejection(&self, op: &Operation, reason: &ReasonError, stage: &'static str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.settings.metrics.record_rejection(reason.kind());
        debug!(op = %op.hash(), hint = %op.hint(), stage, %reason, "operation rejected");
    }

    fn finish(mut self: Box<Self>, cancelled: bool) -> Result<()> {
        let processors = self
            .closers
            .take()
            .map(Mutex::into_inner)
            .unwrap_or_default();
        let released = processors.len();
        for processor in processors {
            if let Err(err) = processor.close() {
                warn!(height = %self.height, error = %err, "failed to close processor");
            }
        }

        info!(
            height = %self.height,
            accepted = self.accepted.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            claimed_keys = self.duplication_key_count(),
            released,
            cancelled,
            "session ended"
        );
        self.settings.metrics.record_session_end(cancelled);

        if let Some(shared) = self.pool.upgrade() {
            shared.free.put(self);
        }
        Ok(())
    }
}

impl Reset for OperationProcessor {
    fn reset(&mut self) {
        self.height = Height::default();
        self.proposal = None;
        self.duplicated = None;
        self.closers = None;
        *self.accepted.get_mut() = 0;
        *self.rejected.get_mut() = 0;
    }
}

impl fmt::Debug for OperationProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationProcessor")
            .field("height", &self.height)
            .field("proposal", &self.proposal.is_some())
            .field("duplication_keys", &self.duplication_key_count())
            .field("tracked_processors", &self.tracked_processors())
            .finish()
    }
}
