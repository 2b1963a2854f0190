//! Error taxonomy for migration runs.

use std::path::PathBuf;

use alloy_core::primitives::B256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::step::StepId;

/// Why a single step did not succeed.
///
/// Every variant halts the run. Only the execution-layer variants
/// (`Timeout`, `Rejected`, `RevertedByContract`) are persisted to the ledger,
/// since the others fail before any transaction is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// A literal argument, parameter, artifact or gas budget is unusable.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A referenced step has no recorded success on this network.
    #[error("unresolved dependency: step `{0}` has no recorded success")]
    UnresolvedDependency(StepId),
    /// The ledger disagrees with the outcome being recorded.
    #[error("ledger conflict: {0}")]
    LedgerConflict(String),
    /// The transaction was not confirmed in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The node refused the transaction or could not be reached.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The transaction was mined with a failed status.
    #[error("reverted by contract: {0}")]
    RevertedByContract(String),
}

impl FailureReason {
    /// Whether the failure happened after a transaction was handed to the node.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Rejected(_) | Self::RevertedByContract(_)
        )
    }
}

/// Problems with the step list itself, detected before anything executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("cyclic dependency between steps: {}", join_ids(.0))]
    CyclicDependency(Vec<StepId>),
    #[error("duplicate step id `{0}`")]
    DuplicateStep(StepId),
    #[error("step `{step}` depends on unknown step `{dependency}`")]
    UnknownStep { step: StepId, dependency: StepId },
    #[error("step `{step}` is malformed: {detail}")]
    MalformedStep { step: StepId, detail: String },
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ledger persistence and consistency errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("step `{step}` on network {network_id}: {detail}")]
    Conflict {
        step: StepId,
        network_id: u64,
        detail: String,
    },
    #[error("ledger {} is locked by another process", .0.display())]
    Locked(PathBuf),
    #[error("corrupt ledger entry at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("ledger i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a network client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("receipt for transaction {0} has no contract address")]
    MissingContractAddress(B256),
}

/// Errors that abort a run before or outside of step execution.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to query network: {0}")]
    Client(#[from] ClientError),
    #[error("network id mismatch: profile expects {expected}, node reports {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },
}
