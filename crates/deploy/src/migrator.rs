//! Entry point tying the migration file, the ledger and the network together.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::{
    artifacts::ArtifactStore,
    client::{JsonRpcClient, NetworkClient, ScriptedClient},
    config::{MigrationConfig, NetworkId, NetworkProfile},
    deployments::{DeploymentsFile, export_deployments},
    ledger::{DEFAULT_LEDGER_PATH, FileLedger, LedgerStore, MemoryLedger},
    orchestrator::Orchestrator,
    params::ParameterSet,
    plan::Plan,
    registry::ArtifactRegistry,
    report::{RunReport, render_status},
};

/// A loaded migration file and the workspace paths derived from it.
#[derive(Debug, Clone)]
pub struct Migrator {
    config: MigrationConfig,
    build_dir: PathBuf,
    ledger_path: PathBuf,
}

impl Migrator {
    /// Load the migration file at `path`.
    ///
    /// The build directory and the ledger resolve relative to the directory
    /// holding the migration file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = MigrationConfig::load_from_file(path)?;

        let root = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        };

        Ok(Self::new(config, &root))
    }

    pub fn new(config: MigrationConfig, root: &Path) -> Self {
        Self {
            build_dir: root.join(&config.build_dir),
            ledger_path: root.join(DEFAULT_LEDGER_PATH),
            config,
        }
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
        self.build_dir = build_dir.into();
        self
    }

    pub fn with_ledger_path(mut self, ledger_path: impl Into<PathBuf>) -> Self {
        self.ledger_path = ledger_path.into();
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Validate and order the steps without touching the network.
    pub fn plan(&self) -> Result<Plan> {
        let plan = Plan::new(self.config.steps.clone()).context("Invalid migration plan")?;

        if let Err(reason) = self.parameters().validate() {
            tracing::warn!(%reason, "Parameter set is invalid, affected steps will fail");
        }
        Ok(plan)
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new(self.config.parameters.clone())
    }

    fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.build_dir)
    }

    /// Run every pending step on `network`, recording outcomes in the ledger.
    ///
    /// Setting `cancel` to `true` stops the run before the next step.
    pub async fn migrate(&self, network: &str, cancel: watch::Receiver<bool>) -> Result<RunReport> {
        let profile = self.config.network(network)?;
        let client = JsonRpcClient::new(profile.rpc_url()?, profile.from)?;
        let ledger = FileLedger::open(&self.ledger_path)?;

        tracing::info!(
            network,
            rpc_url = %profile.rpc_url()?,
            ledger = %self.ledger_path.display(),
            build_dir = %self.build_dir.display(),
            "Migrating"
        );

        let mut orchestrator = Orchestrator::new(client, ledger, self.artifacts(), self.parameters())
            .with_optimizer(self.config.solc.optimizer)
            .with_cancellation(cancel);

        orchestrator
            .run(self.config.steps.clone(), &profile)
            .await
            .with_context(|| format!("Migration on network `{network}` aborted"))
    }

    /// Run the migration against an in-process network seeded with the
    /// current ledger. Nothing is submitted and nothing is persisted.
    pub async fn rehearse(&self, network: &str) -> Result<RunReport> {
        let profile = self.config.network(network)?;
        let network_id = self.network_id(&profile).await?;

        let ledger = FileLedger::snapshot(&self.ledger_path)?;
        tracing::info!(
            network,
            network_id,
            recorded = ledger.read_all(network_id)?.len(),
            "Rehearsing migration"
        );

        let mut orchestrator = Orchestrator::new(
            ScriptedClient::new(network_id),
            ledger,
            self.artifacts(),
            self.parameters(),
        )
        .with_optimizer(self.config.solc.optimizer);

        // The scripted client reports the id it was built with.
        let mut profile = profile;
        profile.network_id = NetworkId::Id(network_id);

        orchestrator
            .run(self.config.steps.clone(), &profile)
            .await
            .context("Rehearsal aborted")
    }

    /// Ledger state of every step on `network`, as a table.
    pub async fn status(&self, network: &str) -> Result<String> {
        let profile = self.config.network(network)?;
        let network_id = self.network_id(&profile).await?;
        let registry = self.registry(network_id)?;

        Ok(render_status(&self.config.steps, &registry, network_id))
    }

    /// Write the deployments of `network` into `out`.
    pub async fn export(&self, network: &str, out: &Path) -> Result<DeploymentsFile> {
        let profile = self.config.network(network)?;
        let network_id = self.network_id(&profile).await?;
        let registry = self.registry(network_id)?;

        export_deployments(out, &registry, network_id)
    }

    /// Read-only view of the ledger for `network_id`.
    fn registry(&self, network_id: u64) -> Result<ArtifactRegistry<MemoryLedger>> {
        let mut registry = ArtifactRegistry::new(FileLedger::snapshot(&self.ledger_path)?);
        registry.load(network_id)?;
        Ok(registry)
    }

    /// The profile's network id, asking the node when the profile accepts any.
    async fn network_id(&self, profile: &NetworkProfile) -> Result<u64> {
        match profile.network_id {
            NetworkId::Id(id) => Ok(id),
            NetworkId::Any => {
                let client = JsonRpcClient::new(profile.rpc_url()?, profile.from)?;
                client
                    .network_id()
                    .await
                    .with_context(|| format!("Failed to query network id from {}", profile.host))
            }
        }
    }
}
