//! Named parameters and argument resolution.

use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
};

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    config::NetworkProfile,
    error::FailureReason,
    ledger::LedgerStore,
    registry::ArtifactRegistry,
    step::{ArgValue, NumberLiteral, Step, StepId, StepKind},
};

/// The `[parameters]` table of the migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// Named values referenced by `{ param = "..." }` arguments.
    #[serde(default)]
    pub values: BTreeMap<String, ArgValue>,
    /// Names of values that must be non-zero unsigned integers.
    #[serde(default)]
    pub positive: BTreeSet<String>,
}

/// A fully resolved, validated argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcreteArg {
    Address(Address),
    Uint(U256),
    Bool(bool),
    String(String),
}

/// Gas settings for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GasParams {
    pub gas: u64,
    pub gas_price: u128,
}

/// Everything a step needs to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCall {
    /// Address receiving a setup call. `None` for deployments.
    pub target: Option<Address>,
    pub args: Vec<ConcreteArg>,
    pub gas: GasParams,
}

/// Resolves step arguments against named parameters and recorded addresses.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    values: BTreeMap<String, ArgValue>,
    positive: BTreeSet<String>,
}

impl ParameterSet {
    pub fn new(config: ParameterConfig) -> Self {
        Self {
            values: config.values,
            positive: config.positive,
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn require_positive(mut self, name: impl Into<String>) -> Self {
        self.positive.insert(name.into());
        self
    }

    /// Check every literal parameter up front, without touching the ledger.
    pub fn validate(&self) -> Result<(), FailureReason> {
        for name in &self.positive {
            if !self.values.contains_key(name) {
                return Err(FailureReason::InvalidParameter(format!(
                    "`{name}` is declared positive but has no value"
                )));
            }
        }

        for (name, value) in &self.values {
            match value {
                ArgValue::Ref(_) => {}
                ArgValue::Param(_) => {
                    return Err(FailureReason::InvalidParameter(format!(
                        "parameter `{name}` refers to another parameter"
                    )));
                }
                literal => {
                    let arg = resolve_literal(literal).map_err(|e| named(name, e))?;
                    self.check_positive(name, &arg)?;
                }
            }
        }
        Ok(())
    }

    /// Turn `step` into a concrete call for `network_id`.
    ///
    /// Fails with [`FailureReason::UnresolvedDependency`] when a referenced step
    /// has no recorded success, and with [`FailureReason::InvalidParameter`] for
    /// malformed literals, unknown parameter names or a bad gas budget.
    pub fn resolve<S: LedgerStore>(
        &self,
        step: &Step,
        registry: &ArtifactRegistry<S>,
        network: &NetworkProfile,
        network_id: u64,
    ) -> Result<ResolvedCall, FailureReason> {
        let target = match (step.kind, &step.target) {
            (StepKind::InvokeSetup, Some(target)) => {
                Some(lookup_address(target, registry, network_id)?)
            }
            (StepKind::InvokeSetup, None) => {
                return Err(FailureReason::InvalidParameter(format!(
                    "setup step `{}` has no target",
                    step.id
                )));
            }
            (StepKind::DeployContract, _) => None,
        };

        let args = step
            .args
            .iter()
            .enumerate()
            .map(|(index, value)| {
                self.resolve_value(value, registry, network_id)
                    .map_err(|e| match e {
                        FailureReason::InvalidParameter(detail) => FailureReason::InvalidParameter(
                            format!("argument {index} of `{}`: {detail}", step.id),
                        ),
                        other => other,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let gas = resolve_gas(step, network)?;

        Ok(ResolvedCall { target, args, gas })
    }

    fn resolve_value<S: LedgerStore>(
        &self,
        value: &ArgValue,
        registry: &ArtifactRegistry<S>,
        network_id: u64,
    ) -> Result<ConcreteArg, FailureReason> {
        match value {
            ArgValue::Ref(step) => lookup_address(step, registry, network_id).map(ConcreteArg::Address),
            ArgValue::Param(name) => {
                let value = self.values.get(name).ok_or_else(|| {
                    FailureReason::InvalidParameter(format!("unknown parameter `{name}`"))
                })?;
                let arg = match value {
                    ArgValue::Ref(step) => {
                        lookup_address(step, registry, network_id).map(ConcreteArg::Address)?
                    }
                    ArgValue::Param(_) => {
                        return Err(FailureReason::InvalidParameter(format!(
                            "parameter `{name}` refers to another parameter"
                        )));
                    }
                    literal => resolve_literal(literal).map_err(|e| named(name, e))?,
                };
                self.check_positive(name, &arg)?;
                Ok(arg)
            }
            literal => resolve_literal(literal),
        }
    }

    fn check_positive(&self, name: &str, arg: &ConcreteArg) -> Result<(), FailureReason> {
        if !self.positive.contains(name) {
            return Ok(());
        }
        match arg {
            ConcreteArg::Uint(value) if !value.is_zero() => Ok(()),
            _ => Err(FailureReason::InvalidParameter(format!(
                "parameter `{name}` must be a positive integer"
            ))),
        }
    }
}

fn named(name: &str, reason: FailureReason) -> FailureReason {
    match reason {
        FailureReason::InvalidParameter(detail) => {
            FailureReason::InvalidParameter(format!("parameter `{name}`: {detail}"))
        }
        other => other,
    }
}

fn lookup_address<S: LedgerStore>(
    step: &StepId,
    registry: &ArtifactRegistry<S>,
    network_id: u64,
) -> Result<Address, FailureReason> {
    registry
        .lookup(step, network_id)
        .map(|deployment| deployment.address)
        .ok_or_else(|| FailureReason::UnresolvedDependency(step.clone()))
}

fn resolve_literal(value: &ArgValue) -> Result<ConcreteArg, FailureReason> {
    match value {
        ArgValue::Address(text) => parse_address(text).map(ConcreteArg::Address),
        ArgValue::Uint(number) => parse_uint(number).map(ConcreteArg::Uint),
        ArgValue::Bool(flag) => Ok(ConcreteArg::Bool(*flag)),
        ArgValue::String(text) => Ok(ConcreteArg::String(text.clone())),
        ArgValue::Param(_) | ArgValue::Ref(_) => Err(FailureReason::InvalidParameter(
            "expected a literal value".to_string(),
        )),
    }
}

/// Parse a 0x-prefixed, 40 hex digit, non-zero address.
pub fn parse_address(text: &str) -> Result<Address, FailureReason> {
    let invalid = |why: &str| FailureReason::InvalidParameter(format!("address `{text}` {why}"));

    if !text.starts_with("0x") || text.len() != 42 {
        return Err(invalid("must be 0x-prefixed with 40 hex characters"));
    }
    let address = Address::from_str(text).map_err(|_| invalid("contains non-hex characters"))?;
    if address.is_zero() {
        return Err(invalid("is the zero address"));
    }
    Ok(address)
}

fn parse_uint(number: &NumberLiteral) -> Result<U256, FailureReason> {
    match number {
        NumberLiteral::Int(value) => Ok(U256::from(*value)),
        NumberLiteral::Text(text) => U256::from_str(text.trim()).map_err(|_| {
            FailureReason::InvalidParameter(format!("`{text}` is not an unsigned 256-bit integer"))
        }),
    }
}

fn resolve_gas(step: &Step, network: &NetworkProfile) -> Result<GasParams, FailureReason> {
    let limit = network.gas_limit();
    let gas = step.gas.unwrap_or(limit);

    if gas == 0 {
        return Err(FailureReason::InvalidParameter(format!(
            "gas budget of `{}` must be positive",
            step.id
        )));
    }
    if gas > limit {
        return Err(FailureReason::InvalidParameter(format!(
            "gas budget {gas} of `{}` exceeds the network limit {limit}",
            step.id
        )));
    }

    Ok(GasParams {
        gas,
        gas_price: network.gas_price(),
    })
}
