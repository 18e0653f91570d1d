//! Operation Engine
//!
//! Operation processing and state-merge engine for a currency and DID
//! registry ledger.
//!
//! # Architecture
//!
//! - **Sessions**: an [`OperationProcessor`] is bound to one block height and
//!   admits or rejects candidate operations against a read-only state view
//! - **Per-type processors**: one pooled processor per operation type, found
//!   through the [`ProcessorRegistry`] by hint
//! - **Merge values**: accepted operations produce [`StateMergeValue`]s that
//!   are folded into new states by pluggable mergers
//!
//! # Invariants
//!
//! - A semantic key (sender, new account, contract, DID) is claimed at most
//!   once per session
//! - Balances never go negative, after effects and fees alike
//! - Business rejections never abort a session; only wiring defects,
//!   storage failures and cancellation do

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod auth;
pub mod config;
pub mod consistency;
pub mod context;
pub mod crypto;
pub mod duplication;
pub mod error;
pub mod extension;
pub mod fact;
pub mod fee;
pub mod genesis;
pub mod metrics;
pub mod operation;
pub mod pool;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod state;
pub mod types;

// Re-exports
pub use config::Config;
pub use context::OpContext;
pub use crypto::{KeyPair, PublicKey, Signature};
pub use error::{Error, ProcessError, ProcessResult, ReasonError, ReasonKind, Result};
pub use extension::Extensions;
pub use fact::Fact;
pub use genesis::Genesis;
pub use metrics::Metrics;
pub use operation::{Operation, Sign};
pub use processor::{OperationProcessor, OperationProcessorPool, ProcessorSettings};
pub use processors::{default_registry, Processor};
pub use registry::ProcessorRegistry;
pub use state::{MemoryStateReader, State, StateMergeValue, StateReader, StateValue};
pub use types::{Address, Amount, CurrencyId, Hash, Height, Hint, NetworkId, Proposal, Version};
