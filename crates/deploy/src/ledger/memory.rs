//! In-memory ledger.

use super::{LedgerEntry, LedgerStore};
use crate::error::LedgerError;

/// Ledger kept in memory. Used for rehearsals, where nothing must persist.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    entries: Vec<LedgerEntry>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a copy of existing entries.
    pub fn seeded(entries: Vec<LedgerEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn read_all(&self, network_id: u64) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.network_id == network_id)
            .cloned()
            .collect())
    }
}
