//! Per-network index of completed steps, backed by a ledger store.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{FailureReason, LedgerError},
    ledger::{EntryOutcome, LedgerEntry, LedgerStore},
    report::StepOutcome,
    step::StepId,
};

/// Where a successful step left its contract.
///
/// For setup calls the address is the contract that was called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub contract: String,
    pub network_id: u64,
    pub address: Address,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Latest known state of one step on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRecord {
    Success {
        deployment: ResolvedAddress,
        fingerprint: Option<String>,
        recorded_at: DateTime<Utc>,
    },
    Failed {
        reason: FailureReason,
        attempts: usize,
        recorded_at: DateTime<Utc>,
    },
}

/// Tracks which steps have succeeded on which network.
///
/// A success is final: recording the same address again is a no-op, while a
/// different address or a later failure is a [`LedgerError::Conflict`].
#[derive(Debug)]
pub struct ArtifactRegistry<S> {
    store: S,
    records: BTreeMap<(u64, StepId), StepRecord>,
}

impl<S: LedgerStore> ArtifactRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            records: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuild the in-memory index for `network_id` from the store.
    pub fn load(&mut self, network_id: u64) -> Result<(), LedgerError> {
        self.records.retain(|(network, _), _| *network != network_id);

        let entries = self.store.read_all(network_id)?;
        let count = entries.len();
        for entry in entries {
            self.apply(entry);
        }

        tracing::debug!(network_id, entries = count, "Registry loaded from ledger");
        Ok(())
    }

    fn apply(&mut self, entry: LedgerEntry) {
        let key = (entry.network_id, entry.step_id);
        match entry.outcome {
            EntryOutcome::Success { deployment } => {
                // The first success wins; later ones can only come from a
                // hand-edited ledger.
                if let Some(StepRecord::Success { .. }) = self.records.get(&key) {
                    tracing::warn!(step = %key.1, network_id = key.0, "Ignoring duplicate success in ledger");
                    return;
                }
                self.records.insert(
                    key,
                    StepRecord::Success {
                        deployment,
                        fingerprint: entry.fingerprint,
                        recorded_at: entry.recorded_at,
                    },
                );
            }
            EntryOutcome::Failed { reason } => {
                let attempts = match self.records.get(&key) {
                    Some(StepRecord::Success { .. }) => return,
                    Some(StepRecord::Failed { attempts, .. }) => attempts + 1,
                    None => 1,
                };
                self.records.insert(
                    key,
                    StepRecord::Failed {
                        reason,
                        attempts,
                        recorded_at: entry.recorded_at,
                    },
                );
            }
        }
    }

    pub fn is_satisfied(&self, step: &StepId, network_id: u64) -> bool {
        self.lookup(step, network_id).is_some()
    }

    pub fn lookup(&self, step: &StepId, network_id: u64) -> Option<&ResolvedAddress> {
        match self.records.get(&(network_id, step.clone())) {
            Some(StepRecord::Success { deployment, .. }) => Some(deployment),
            _ => None,
        }
    }

    /// Fingerprint stored with the success of `step`, if any.
    pub fn fingerprint(&self, step: &StepId, network_id: u64) -> Option<&str> {
        match self.records.get(&(network_id, step.clone())) {
            Some(StepRecord::Success { fingerprint, .. }) => fingerprint.as_deref(),
            _ => None,
        }
    }

    pub fn record_of(&self, step: &StepId, network_id: u64) -> Option<&StepRecord> {
        self.records.get(&(network_id, step.clone()))
    }

    /// Every known record on `network_id`, ordered by step id.
    pub fn records(&self, network_id: u64) -> impl Iterator<Item = (&StepId, &StepRecord)> {
        self.records
            .iter()
            .filter(move |((network, _), _)| *network == network_id)
            .map(|((_, step), record)| (step, record))
    }

    /// Persist the outcome of a step.
    ///
    /// `Skipped` is never persisted. Resolution failures are the caller's to
    /// filter out; everything else handed in here is appended.
    pub fn record(
        &mut self,
        step: &StepId,
        network_id: u64,
        outcome: &StepOutcome,
        fingerprint: Option<String>,
    ) -> Result<(), LedgerError> {
        let entry_outcome = match outcome {
            StepOutcome::Skipped => return Ok(()),
            StepOutcome::Success(deployment) => {
                if let Some(existing) = self.lookup(step, network_id) {
                    if existing.address == deployment.address {
                        tracing::debug!(step = %step, network_id, "Success already recorded");
                        return Ok(());
                    }
                    return Err(LedgerError::Conflict {
                        step: step.clone(),
                        network_id,
                        detail: format!(
                            "already deployed at {}, refusing to record {}",
                            existing.address, deployment.address
                        ),
                    });
                }
                EntryOutcome::Success {
                    deployment: deployment.clone(),
                }
            }
            StepOutcome::Failed(reason) => {
                if let Some(existing) = self.lookup(step, network_id) {
                    return Err(LedgerError::Conflict {
                        step: step.clone(),
                        network_id,
                        detail: format!(
                            "already deployed at {}, refusing to record failure: {}",
                            existing.address, reason
                        ),
                    });
                }
                EntryOutcome::Failed {
                    reason: reason.clone(),
                }
            }
        };

        let entry = LedgerEntry::new(network_id, step.clone(), entry_outcome, fingerprint);
        self.store.append(&entry)?;
        self.apply(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn deployment(network_id: u64, byte: u8) -> ResolvedAddress {
        ResolvedAddress {
            contract: "DinngoToken".to_string(),
            network_id,
            address: Address::repeat_byte(byte),
            tx_hash: B256::repeat_byte(byte),
            block_number: 7,
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        let token = StepId::from("token");

        assert!(!registry.is_satisfied(&token, 3));
        registry
            .record(&token, 3, &StepOutcome::Success(deployment(3, 1)), None)
            .expect("Failed to record");

        assert!(registry.is_satisfied(&token, 3));
        assert!(!registry.is_satisfied(&token, 5));
        assert_eq!(
            registry.lookup(&token, 3).map(|d| d.address),
            Some(Address::repeat_byte(1))
        );
    }

    #[test]
    fn test_identical_success_is_a_noop() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        let token = StepId::from("token");
        let outcome = StepOutcome::Success(deployment(3, 1));

        registry.record(&token, 3, &outcome, None).expect("Failed to record");
        registry.record(&token, 3, &outcome, None).expect("Failed to record twice");

        assert_eq!(registry.store().entries().len(), 1);
    }

    #[test]
    fn test_divergent_success_conflicts() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        let token = StepId::from("token");

        registry
            .record(&token, 3, &StepOutcome::Success(deployment(3, 1)), None)
            .expect("Failed to record");
        let result = registry.record(&token, 3, &StepOutcome::Success(deployment(3, 2)), None);

        assert!(matches!(result, Err(LedgerError::Conflict { .. })));
        assert_eq!(
            registry.lookup(&token, 3).map(|d| d.address),
            Some(Address::repeat_byte(1))
        );
    }

    #[test]
    fn test_failure_after_success_conflicts() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        let token = StepId::from("token");

        registry
            .record(&token, 3, &StepOutcome::Success(deployment(3, 1)), None)
            .expect("Failed to record");
        let result = registry.record(
            &token,
            3,
            &StepOutcome::Failed(FailureReason::Timeout("0x01".into())),
            None,
        );
        assert!(matches!(result, Err(LedgerError::Conflict { .. })));
    }

    #[test]
    fn test_success_supersedes_failures() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        let token = StepId::from("token");
        let failure = StepOutcome::Failed(FailureReason::Rejected("underpriced".into()));

        registry.record(&token, 3, &failure, None).expect("Failed to record");
        registry.record(&token, 3, &failure, None).expect("Failed to record");
        assert!(matches!(
            registry.record_of(&token, 3),
            Some(StepRecord::Failed { attempts: 2, .. })
        ));

        registry
            .record(&token, 3, &StepOutcome::Success(deployment(3, 1)), Some("abc".into()))
            .expect("Failed to record");
        assert!(registry.is_satisfied(&token, 3));
        assert_eq!(registry.fingerprint(&token, 3), Some("abc"));
    }

    #[test]
    fn test_skipped_is_not_persisted() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        registry
            .record(&"token".into(), 3, &StepOutcome::Skipped, None)
            .expect("Failed to record");
        assert!(registry.store().entries().is_empty());
    }

    #[test]
    fn test_load_rebuilds_index() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        let token = StepId::from("token");
        registry
            .record(&token, 3, &StepOutcome::Success(deployment(3, 1)), None)
            .expect("Failed to record");

        let mut reloaded =
            ArtifactRegistry::new(MemoryLedger::seeded(registry.store().entries().to_vec()));
        assert!(!reloaded.is_satisfied(&token, 3));
        reloaded.load(3).expect("Failed to load");
        assert!(reloaded.is_satisfied(&token, 3));
        assert_eq!(reloaded.records(3).count(), 1);
        assert_eq!(reloaded.records(5).count(), 0);
    }
}
