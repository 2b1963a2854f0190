//! Append-only record of step outcomes, keyed by network and step.

mod file;
mod memory;

pub use file::FileLedger;
pub use memory::MemoryLedger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::FailureReason, error::LedgerError, registry::ResolvedAddress, step::StepId};

/// Default ledger location, relative to the migration file.
pub const DEFAULT_LEDGER_PATH: &str = ".chainmig/ledger.jsonl";

/// Persisted outcome of one step attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Success { deployment: ResolvedAddress },
    Failed { reason: FailureReason },
}

/// One line of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub network_id: u64,
    pub step_id: StepId,
    pub outcome: EntryOutcome,
    /// Fingerprint of the resolved call that produced this outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        network_id: u64,
        step_id: StepId,
        outcome: EntryOutcome,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            network_id,
            step_id,
            outcome,
            fingerprint,
            recorded_at: Utc::now(),
        }
    }
}

/// Durable storage behind the artifact registry.
///
/// `append` must be atomic: once it returns, the entry survives a crash, and
/// a crash during the call must leave earlier entries readable.
pub trait LedgerStore {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// All entries for `network_id`, in append order.
    fn read_all(&self, network_id: u64) -> Result<Vec<LedgerEntry>, LedgerError>;
}
