//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for the processing pipeline.
//!
//! # Metrics
//!
//! - `opengine_preprocess_total` - Operations pre-processed
//! - `opengine_process_total` - Operations processed
//! - `opengine_rejected_total{reason}` - Soft rejections by reason kind
//! - `opengine_sessions_closed_total` - Sessions ended with close
//! - `opengine_sessions_cancelled_total` - Sessions ended with cancel

use crate::error::ReasonKind;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
///
/// Each collector owns its registry, so several engines (or tests) can live in
/// one process without colliding in the global default registry.
#[derive(Clone)]
pub struct Metrics {
    /// Operations pre-processed
    pub preprocess_total: IntCounter,

    /// Operations processed
    pub process_total: IntCounter,

    /// Soft rejections by reason kind
    pub rejected_total: IntCounterVec,

    /// Sessions closed
    pub sessions_closed: IntCounter,

    /// Sessions cancelled
    pub sessions_cancelled: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let preprocess_total =
            IntCounter::new("opengine_preprocess_total", "Operations pre-processed")?;
        registry.register(Box::new(preprocess_total.clone()))?;

        let process_total = IntCounter::new("opengine_process_total", "Operations processed")?;
        registry.register(Box::new(process_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("opengine_rejected_total", "Soft rejections by reason kind"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let sessions_closed =
            IntCounter::new("opengine_sessions_closed_total", "Sessions ended with close")?;
        registry.register(Box::new(sessions_closed.clone()))?;

        let sessions_cancelled = IntCounter::new(
            "opengine_sessions_cancelled_total",
            "Sessions ended with cancel",
        )?;
        registry.register(Box::new(sessions_cancelled.clone()))?;

        Ok(Self {
            preprocess_total,
            process_total,
            rejected_total,
            sessions_closed,
            sessions_cancelled,
            registry,
        })
    }

    /// Record a pre-processed operation
    pub fn record_preprocess(&self) {
        self.preprocess_total.inc();
    }

    /// Record a processed operation
    pub fn record_process(&self) {
        self.process_total.inc();
    }

    /// Record a soft rejection
    pub fn record_rejection(&self, kind: ReasonKind) {
        self.rejected_total.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record session end
    pub fn record_session_end(&self, cancelled: bool) {
        if cancelled {
            self.sessions_cancelled.inc();
        } else {
            self.sessions_closed.inc();
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("preprocess_total", &self.preprocess_total.get())
            .field("process_total", &self.process_total.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.preprocess_total.get(), 0);
        assert_eq!(metrics.sessions_closed.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_preprocess();
        assert_eq!(a.preprocess_total.get(), 1);
        assert_eq!(b.preprocess_total.get(), 0);
    }

    #[test]
    fn test_record_rejection() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection(ReasonKind::Duplicated);
        metrics.record_rejection(ReasonKind::Duplicated);
        metrics.record_rejection(ReasonKind::InsufficientBalance);

        assert_eq!(
            metrics
                .rejected_total
                .with_label_values(&["duplicated"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .rejected_total
                .with_label_values(&["insufficient_balance"])
                .get(),
            1
        );
    }

    #[test]
    fn test_record_session_end() {
        let metrics = Metrics::new().unwrap();
        metrics.record_session_end(false);
        metrics.record_session_end(true);
        metrics.record_session_end(true);
        assert_eq!(metrics.sessions_closed.get(), 1);
        assert_eq!(metrics.sessions_cancelled.get(), 2);
    }
}
