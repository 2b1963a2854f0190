//! `deployments.json` export for downstream tooling.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    ledger::LedgerStore,
    registry::{ArtifactRegistry, StepRecord},
    step::StepId,
};

/// One exported deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEntry {
    pub contract: String,
    pub address: Address,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Deployments keyed by network id, then step id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentsFile {
    pub networks: BTreeMap<String, BTreeMap<StepId, DeploymentEntry>>,
}

impl DeploymentsFile {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployments from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse deployments file {}", path.display()))
    }

    /// Replace the section of `network_id` with every success in `registry`.
    pub fn set_network<S: LedgerStore>(&mut self, registry: &ArtifactRegistry<S>, network_id: u64) {
        let deployments = registry
            .records(network_id)
            .filter_map(|(step, record)| match record {
                StepRecord::Success { deployment, .. } => Some((
                    step.clone(),
                    DeploymentEntry {
                        contract: deployment.contract.clone(),
                        address: deployment.address,
                        tx_hash: deployment.tx_hash,
                        block_number: deployment.block_number,
                    },
                )),
                StepRecord::Failed { .. } => None,
            })
            .collect();

        self.networks.insert(network_id.to_string(), deployments);
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize deployments")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write deployments to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployments exported");
        Ok(())
    }
}

/// Write the successes of `network_id` into `path`, keeping other networks
/// already present in the file.
pub fn export_deployments<S: LedgerStore>(
    path: &Path,
    registry: &ArtifactRegistry<S>,
    network_id: u64,
) -> Result<DeploymentsFile> {
    let mut file = if path.exists() {
        DeploymentsFile::load_from_file(path)?
    } else {
        DeploymentsFile::default()
    };

    file.set_network(registry, network_id);
    file.save_to_file(path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::FailureReason, ledger::MemoryLedger, registry::ResolvedAddress,
        report::StepOutcome,
    };
    use tempdir::TempDir;

    fn registry() -> ArtifactRegistry<MemoryLedger> {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        for (network_id, byte) in [(3, 0x11), (5, 0x22)] {
            registry
                .record(
                    &"token".into(),
                    network_id,
                    &StepOutcome::Success(ResolvedAddress {
                        contract: "DinngoToken".to_string(),
                        network_id,
                        address: Address::repeat_byte(byte),
                        tx_hash: B256::repeat_byte(byte),
                        block_number: 1,
                    }),
                    None,
                )
                .expect("Failed to record");
        }
        registry
            .record(
                &"crowdsale".into(),
                3,
                &StepOutcome::Failed(FailureReason::Rejected("underpriced".into())),
                None,
            )
            .expect("Failed to record");
        registry
    }

    #[test]
    fn test_export_skips_failures() {
        let temp_dir = TempDir::new("chainmig-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployments.json");

        let mut registry = registry();
        registry.load(3).expect("Failed to load");
        let file = export_deployments(&path, &registry, 3).expect("Failed to export");

        let network = &file.networks["3"];
        assert_eq!(network.len(), 1);
        assert_eq!(
            network[&StepId::from("token")].address,
            Address::repeat_byte(0x11)
        );
    }

    #[test]
    fn test_export_merges_networks() {
        let temp_dir = TempDir::new("chainmig-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("out").join("deployments.json");
        let registry = registry();

        export_deployments(&path, &registry, 3).expect("Failed to export");
        export_deployments(&path, &registry, 5).expect("Failed to export");

        let file = DeploymentsFile::load_from_file(&path).expect("Failed to load");
        assert_eq!(file.networks.len(), 2);
        assert_eq!(
            file.networks["5"][&StepId::from("token")].address,
            Address::repeat_byte(0x22)
        );
    }
}
