//! Step definitions loaded from the migration file.

use std::collections::BTreeSet;

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

/// Unique identifier of a migration step.
///
/// Ids are compared as plain strings; declaration order (not id order) breaks
/// ties when the plan is ordered.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Deref, Display, From,
)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What a step does on the network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    /// Submit a contract-creation transaction.
    #[serde(alias = "deploy")]
    DeployContract,
    /// Call a method on a contract deployed by an earlier step.
    #[serde(alias = "invoke")]
    InvokeSetup,
}

/// An unsigned integer as written in the migration file.
///
/// TOML integers are limited to `i64`, so large values (wei amounts, caps) are
/// written as decimal or `0x` hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberLiteral {
    Int(u64),
    Text(String),
}

impl From<u64> for NumberLiteral {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

/// A constructor or call argument.
///
/// Literals are validated by the parameter set, `param` values are looked up
/// by name and `ref` values are replaced by the address recorded for the
/// referenced step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    Address(String),
    Uint(NumberLiteral),
    Bool(bool),
    String(String),
    Param(String),
    Ref(StepId),
}

impl ArgValue {
    pub fn address(address: impl Into<String>) -> Self {
        Self::Address(address.into())
    }

    pub fn uint(value: u64) -> Self {
        Self::Uint(NumberLiteral::Int(value))
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    pub fn reference(step: impl Into<StepId>) -> Self {
        Self::Ref(step.into())
    }
}

/// A single migration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub kind: StepKind,
    /// Name of the compiled artifact. For setup calls this is the ABI owner.
    pub contract: String,
    /// Step whose recorded address receives the setup call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<StepId>,
    /// Method invoked by a setup call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<ArgValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<StepId>,
    /// Gas budget for this step, overriding the network profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
}

impl Step {
    /// Create a contract deployment step.
    pub fn deploy(id: impl Into<StepId>, contract: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::DeployContract,
            contract: contract.into(),
            target: None,
            method: None,
            args: Vec::new(),
            depends_on: BTreeSet::new(),
            gas: None,
        }
    }

    /// Create a setup call against the contract deployed by `target`.
    pub fn invoke(
        id: impl Into<StepId>,
        contract: impl Into<String>,
        target: impl Into<StepId>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::InvokeSetup,
            contract: contract.into(),
            target: Some(target.into()),
            method: Some(method.into()),
            args: Vec::new(),
            depends_on: BTreeSet::new(),
            gas: None,
        }
    }

    pub fn arg(mut self, value: ArgValue) -> Self {
        self.args.push(value);
        self
    }

    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.depends_on.insert(step.into());
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    /// Steps whose addresses this step reads directly: the setup target and
    /// every `ref` argument.
    pub fn references(&self) -> impl Iterator<Item = &StepId> {
        self.target.iter().chain(self.args.iter().filter_map(|arg| match arg {
            ArgValue::Ref(id) => Some(id),
            _ => None,
        }))
    }
}
