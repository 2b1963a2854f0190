//! Content hash of a step's resolved inputs, used to spot drift on skipped steps.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    config::OptimizerConfig,
    params::{ConcreteArg, ResolvedCall},
    step::{Step, StepKind},
};

/// Inputs that, when changed, make a recorded deployment stale.
///
/// Gas settings are excluded: a different budget does not change what ends up
/// on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFingerprint<'a> {
    pub kind: StepKind,
    pub contract: &'a str,
    pub method: Option<&'a str>,
    pub target: Option<String>,
    pub args: &'a [ConcreteArg],
    pub optimizer: OptimizerConfig,
}

impl<'a> StepFingerprint<'a> {
    pub fn new(step: &'a Step, call: &'a ResolvedCall, optimizer: OptimizerConfig) -> Self {
        Self {
            kind: step.kind,
            contract: &step.contract,
            method: step.method.as_deref(),
            target: call.target.map(|address| address.to_string()),
            args: &call.args,
            optimizer,
        }
    }

    /// SHA-256 of the JSON encoding, hex encoded.
    ///
    /// Field order is fixed by the struct, so equal inputs always hash equally.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;

        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(hex::encode(hasher.finalize()))
    }
}
