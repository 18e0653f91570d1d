//! Per-session duplication tracking
//!
//! Every accepted operation claims its semantic keys (sender, new account,
//! DID subject, ...) for the rest of the session. A second operation claiming
//! any of them is rejected with [`ReasonKind::Duplicated`](crate::error::ReasonKind).
//!
//! Check-and-mark runs under one exclusive lock so concurrent pre-processing
//! of independent operations cannot both claim the same key.

use crate::error::{ProcessResult, ReasonError};
use crate::operation::Operation;
use crate::types::Hint;
use crate::Error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Hint kinds whose uniqueness the consensus layer enforces itself
pub const EXEMPT_HINT_KINDS: [&str; 4] = [
    "suffrage-join-operation",
    "suffrage-disjoin-operation",
    "suffrage-candidate-operation",
    "network-policy-operation",
];

/// Whether operations of this hint skip duplication tracking
pub fn is_exempt(hint: &Hint) -> bool {
    EXEMPT_HINT_KINDS.contains(&hint.kind())
}

/// Namespace of a duplication key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DuplicationKeyType {
    /// Sending account
    Sender,
    /// Account created by the operation
    NewAccount,
    /// Contract account created or reconfigured by the operation
    ContractAccount,
    /// Currency registered or changed by the operation
    Currency,
    /// Account receiving a DID on a contract
    DidSubject,
    /// DID document changed by the operation
    DidDocument,
}

impl fmt::Display for DuplicationKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuplicationKeyType::Sender => "sender",
            DuplicationKeyType::NewAccount => "new-account",
            DuplicationKeyType::ContractAccount => "contract-account",
            DuplicationKeyType::Currency => "currency",
            DuplicationKeyType::DidSubject => "did-subject",
            DuplicationKeyType::DidDocument => "did-document",
        };
        f.write_str(name)
    }
}

/// Semantic keys an operation claims
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicationKeySet(BTreeMap<DuplicationKeyType, Vec<String>>);

impl DuplicationKeySet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key
    pub fn insert(&mut self, key_type: DuplicationKeyType, key: impl Into<String>) {
        self.0.entry(key_type).or_default().push(key.into());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, key_type: DuplicationKeyType, key: impl Into<String>) -> Self {
        self.insert(key_type, key);
        self
    }

    /// Keys of one type
    pub fn get(&self, key_type: DuplicationKeyType) -> &[String] {
        self.0.get(&key_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All `(type, key)` pairs in type order
    pub fn iter(&self) -> impl Iterator<Item = (DuplicationKeyType, &str)> + '_ {
        self.0
            .iter()
            .flat_map(|(key_type, keys)| keys.iter().map(move |key| (*key_type, key.as_str())))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Whether there are no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keys claimed by operations accepted so far in one session
#[derive(Debug, Default)]
pub struct DuplicationTracker {
    claimed: Mutex<HashMap<DuplicationKeyType, HashSet<String>>>,
}

impl DuplicationTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every key of `keys`, or none of them
    pub fn check_and_mark(&self, keys: &DuplicationKeySet) -> ProcessResult<()> {
        let mut claimed = self.claimed.lock();

        let mut pending: HashMap<DuplicationKeyType, HashSet<&str>> = HashMap::new();
        for (key_type, key) in keys.iter() {
            if !pending.entry(key_type).or_default().insert(key) {
                return Err(ReasonError::duplicated(format!(
                    "{} {} repeated within operation",
                    key_type, key
                ))
                .into());
            }
            if claimed
                .get(&key_type)
                .map_or(false, |set| set.contains(key))
            {
                return Err(ReasonError::duplicated(format!(
                    "{} {} already used in this block",
                    key_type, key
                ))
                .into());
            }
        }

        for (key_type, pending_keys) in pending {
            claimed
                .entry(key_type)
                .or_default()
                .extend(pending_keys.into_iter().map(str::to_string));
        }
        Ok(())
    }

    /// Number of claimed keys
    pub fn len(&self) -> usize {
        self.claimed.lock().values().map(HashSet::len).sum()
    }

    /// Whether no key is claimed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every claim
    pub fn clear(&self) {
        self.claimed.lock().clear();
    }
}

/// Duplication check strategy of a session
pub type DuplicationCheckFn = fn(&DuplicationTracker, &Operation) -> ProcessResult<()>;

/// Default duplication check
///
/// Facts of exempt hints are skipped. Any other fact must expose its keys; a
/// fact that does not is a wiring defect.
pub fn check_duplication(tracker: &DuplicationTracker, op: &Operation) -> ProcessResult<()> {
    if is_exempt(op.hint()) {
        return Ok(());
    }

    let keys = op
        .fact()
        .duplication_keys()
        .ok_or_else(|| Error::MissingCapability {
            hint: op.hint().clone(),
            capability: "duplication keys",
        })?;

    tracker.check_and_mark(&keys)
}
