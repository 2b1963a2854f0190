//! JSON-lines ledger on disk.

use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;

use super::{LedgerEntry, LedgerStore, MemoryLedger};
use crate::error::LedgerError;

/// Ledger stored as one JSON object per line.
///
/// The file is held under an exclusive advisory lock while the handle lives,
/// so only one orchestrator writes to a workspace at a time. Each append is a
/// single write of a complete line followed by `sync_data`. A line left
/// incomplete by a crash is cut off when the ledger is next opened.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    file: File,
}

impl FileLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| LedgerError::Locked(path.clone()))?;

        let mut ledger = Self { path, file };
        ledger.truncate_torn_tail()?;

        tracing::debug!(path = %ledger.path.display(), "Ledger opened");
        Ok(ledger)
    }

    /// Read every complete entry at `path` without taking ownership of it.
    ///
    /// Nothing is created or truncated, and a missing file reads as empty. A
    /// shared lock is held while reading, so this fails while a run has the
    /// ledger open.
    pub fn snapshot(path: impl AsRef<Path>) -> Result<MemoryLedger, LedgerError> {
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No ledger yet, reading as empty");
                return Ok(MemoryLedger::new());
            }
            Err(e) => return Err(e.into()),
        };

        file.try_lock_shared()
            .map_err(|_| LedgerError::Locked(path.to_path_buf()))?;

        let mut contents = Vec::new();
        (&file).read_to_end(&mut contents)?;
        let complete = complete_len(&contents);
        if complete < contents.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - complete,
                "Ledger ends with an incomplete entry, ignoring it"
            );
        }

        Ok(MemoryLedger::seeded(parse_entries(&contents[..complete], None)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_contents(&self) -> Result<Vec<u8>, LedgerError> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    /// Drop any bytes after the last newline. Those can only come from an
    /// append interrupted before `sync_data` returned, and may end inside a
    /// multibyte character.
    fn truncate_torn_tail(&mut self) -> Result<(), LedgerError> {
        let contents = self.read_contents()?;
        let complete = complete_len(&contents);

        if complete < contents.len() {
            tracing::warn!(
                path = %self.path.display(),
                dropped_bytes = contents.len() - complete,
                "Ledger ends with an incomplete entry, discarding it"
            );
            self.file.set_len(complete as u64)?;
            self.file.sync_data()?;
        }

        Ok(())
    }
}

/// Length of the prefix made of newline-terminated lines.
fn complete_len(contents: &[u8]) -> usize {
    contents
        .iter()
        .rposition(|&byte| byte == b'\n')
        .map_or(0, |i| i + 1)
}

/// Decode newline-separated entries, keeping those for `network_id` (all when `None`).
fn parse_entries(
    contents: &[u8],
    network_id: Option<u64>,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut entries = Vec::new();

    for (index, line) in contents.split(|&byte| byte == b'\n').enumerate() {
        if line.trim_ascii().is_empty() {
            continue;
        }

        let entry: LedgerEntry =
            serde_json::from_slice(line).map_err(|source| LedgerError::Corrupt {
                line: index + 1,
                source,
            })?;

        if network_id.is_none_or(|id| entry.network_id == id) {
            entries.push(entry);
        }
    }

    Ok(entries)
}

impl LedgerStore for FileLedger {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        self.file.write_all(&line)?;
        self.file.sync_data()?;

        tracing::trace!(
            step = %entry.step_id,
            network_id = entry.network_id,
            "Ledger entry appended"
        );
        Ok(())
    }

    fn read_all(&self, network_id: u64) -> Result<Vec<LedgerEntry>, LedgerError> {
        let contents = self.read_contents()?;
        parse_entries(&contents[..complete_len(&contents)], Some(network_id))
    }
}
