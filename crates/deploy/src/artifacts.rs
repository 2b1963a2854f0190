//! Compiled contract artifacts and ABI encoding.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    json_abi::{JsonAbi, Param},
    primitives::{Bytes, U256},
};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::params::ConcreteArg;

/// A compiled contract as written by the solidity toolchain
/// (`build/contracts/<Name>.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn deploy_data(&self, args: &[ConcreteArg]) -> Result<Bytes, String> {
        if self.bytecode.is_empty() {
            return Err(format!(
                "{} has no creation bytecode (abstract contract or interface?)",
                self.contract_name
            ));
        }

        let inputs = self
            .abi
            .constructor()
            .map(|constructor| constructor.inputs.as_slice())
            .unwrap_or_default();
        let values = typed_values(inputs, args)
            .map_err(|e| format!("constructor of {}: {e}", self.contract_name))?;

        let mut data = self.bytecode.to_vec();
        data.extend(DynSolValue::Tuple(values).abi_encode_params());
        Ok(data.into())
    }

    /// Selector and ABI-encoded arguments for `method`.
    ///
    /// Overloads are tried in ABI order; the first whose inputs accept `args`
    /// is used.
    pub fn call_data(&self, method: &str, args: &[ConcreteArg]) -> Result<Bytes, String> {
        let overloads = self
            .abi
            .function(method)
            .ok_or_else(|| format!("{} has no method `{method}`", self.contract_name))?;

        let mut last_error = None;
        for function in overloads {
            match typed_values(&function.inputs, args) {
                Ok(values) => {
                    let mut data = function.selector().to_vec();
                    data.extend(DynSolValue::Tuple(values).abi_encode_params());
                    tracing::trace!(signature = %function.signature(), "Encoded setup call");
                    return Ok(data.into());
                }
                Err(e) => last_error = Some(format!("{}: {e}", function.signature())),
            }
        }

        Err(last_error.unwrap_or_else(|| format!("no overload of `{method}` matches")))
    }
}

/// Match resolved arguments against ABI inputs.
fn typed_values(inputs: &[Param], args: &[ConcreteArg]) -> Result<Vec<DynSolValue>, String> {
    if inputs.len() != args.len() {
        return Err(format!(
            "expected {} arguments, got {}",
            inputs.len(),
            args.len()
        ));
    }

    inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (input, arg))| {
            let ty = DynSolType::parse(&input.ty)
                .map_err(|e| format!("argument {index}: unsupported type `{}`: {e}", input.ty))?;
            to_sol_value(arg, &ty).map_err(|e| format!("argument {index} ({}): {e}", input.name))
        })
        .collect()
}

fn to_sol_value(arg: &ConcreteArg, ty: &DynSolType) -> Result<DynSolValue, String> {
    match (arg, ty) {
        (ConcreteArg::Address(address), DynSolType::Address) => Ok(DynSolValue::Address(*address)),
        (ConcreteArg::Uint(value), DynSolType::Uint(bits)) => {
            if *bits < 256 && *value >= (U256::from(1) << *bits) {
                return Err(format!("{value} does not fit in uint{bits}"));
            }
            Ok(DynSolValue::Uint(*value, *bits))
        }
        (ConcreteArg::Bool(flag), DynSolType::Bool) => Ok(DynSolValue::Bool(*flag)),
        (ConcreteArg::String(text), DynSolType::String) => Ok(DynSolValue::String(text.clone())),
        (arg, ty) => Err(format!("cannot pass {arg:?} as {}", ty.sol_type_name())),
    }
}

/// Loads artifacts by contract name from a build directory, caching them.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    cache: HashMap<String, ContractArtifact>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register an artifact without going through the filesystem.
    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.cache.insert(artifact.contract_name.clone(), artifact);
    }

    pub fn load(&mut self, name: &str) -> Result<&ContractArtifact> {
        if !self.cache.contains_key(name) {
            let path = self.dir.join(format!("{name}.json"));
            let artifact = ContractArtifact::load_from_file(&path)?;
            if artifact.contract_name != name {
                anyhow::bail!(
                    "Artifact {} declares contract {}, expected {}",
                    path.display(),
                    artifact.contract_name,
                    name
                );
            }
            tracing::debug!(contract = name, path = %path.display(), "Artifact loaded");
            self.cache.insert(name.to_string(), artifact);
        }

        self.cache
            .get(name)
            .with_context(|| format!("Artifact {name} missing from cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::Address;
    use tempdir::TempDir;

    const TOKEN_ARTIFACT: &str = r#"{
        "contractName": "DinngoToken",
        "abi": [
            { "type": "constructor", "inputs": [], "stateMutability": "nonpayable" },
            {
                "type": "function",
                "name": "addToWhitelist",
                "inputs": [{ "name": "_address", "type": "address" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            }
        ],
        "bytecode": "0x6080604052"
    }"#;

    const CROWDSALE_ARTIFACT: &str = r#"{
        "contractName": "DinngoCrowdsale",
        "abi": [
            {
                "type": "constructor",
                "inputs": [
                    { "name": "_token", "type": "address" },
                    { "name": "_rate", "type": "uint256" },
                    { "name": "_tokenWallet", "type": "address" },
                    { "name": "_fundsWallet", "type": "address" }
                ],
                "stateMutability": "nonpayable"
            }
        ],
        "bytecode": "0x60806040"
    }"#;

    fn crowdsale_args() -> Vec<ConcreteArg> {
        vec![
            ConcreteArg::Address(Address::repeat_byte(0x11)),
            ConcreteArg::Uint(U256::from(2125)),
            ConcreteArg::Address(Address::repeat_byte(0x22)),
            ConcreteArg::Address(Address::repeat_byte(0x33)),
        ]
    }

    #[test]
    fn test_deploy_data_appends_constructor_args() {
        let artifact: ContractArtifact =
            serde_json::from_str(CROWDSALE_ARTIFACT).expect("Failed to parse artifact");
        let data = artifact
            .deploy_data(&crowdsale_args())
            .expect("Failed to encode constructor");

        assert_eq!(&data[..4], &[0x60, 0x80, 0x60, 0x40]);
        assert_eq!(data.len(), 4 + 4 * 32);
        assert_eq!(&data[4 + 12..4 + 32], Address::repeat_byte(0x11).as_slice());
        assert_eq!(data[4 + 64 - 2..4 + 64], [0x08, 0x4d]);
    }

    #[test]
    fn test_deploy_data_checks_arity_and_types() {
        let artifact: ContractArtifact =
            serde_json::from_str(CROWDSALE_ARTIFACT).expect("Failed to parse artifact");

        let mut short = crowdsale_args();
        short.pop();
        assert!(artifact.deploy_data(&short).is_err());

        let mut swapped = crowdsale_args();
        swapped.swap(0, 1);
        assert!(artifact.deploy_data(&swapped).is_err());
    }

    #[test]
    fn test_call_data_uses_selector() {
        let artifact: ContractArtifact =
            serde_json::from_str(TOKEN_ARTIFACT).expect("Failed to parse artifact");
        let data = artifact
            .call_data(
                "addToWhitelist",
                &[ConcreteArg::Address(Address::repeat_byte(0x44))],
            )
            .expect("Failed to encode call");

        let selector = alloy_core::primitives::keccak256("addToWhitelist(address)");
        assert_eq!(&data[..4], &selector[..4]);
        assert_eq!(data.len(), 4 + 32);
        assert!(artifact.call_data("pause", &[]).is_err());
    }

    #[test]
    fn test_uint_width_is_enforced() {
        let ty = DynSolType::Uint(8);
        assert!(to_sol_value(&ConcreteArg::Uint(U256::from(255)), &ty).is_ok());
        assert!(to_sol_value(&ConcreteArg::Uint(U256::from(256)), &ty).is_err());
    }

    #[test]
    fn test_store_loads_from_build_dir() {
        let temp_dir = TempDir::new("chainmig-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("DinngoToken.json"), TOKEN_ARTIFACT)
            .expect("Failed to write artifact");

        let mut store = ArtifactStore::new(temp_dir.path());
        let artifact = store.load("DinngoToken").expect("Failed to load artifact");
        assert_eq!(artifact.contract_name, "DinngoToken");
        assert!(store.load("DinngoCompany").is_err());
    }
}
