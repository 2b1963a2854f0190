//! chainmig-deploy - Deterministic, idempotent contract migrations.
//!
//! Steps are declared in a migration file, ordered by their dependencies and
//! executed one at a time against a network. Outcomes are appended to a
//! durable ledger, so re-running a migration only executes what is missing.

pub mod artifacts;
pub mod client;
pub mod config;
pub mod deployments;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod ledger;
pub mod orchestrator;
pub mod params;
pub mod plan;
pub mod registry;
pub mod report;
pub mod step;

mod migrator;
pub use migrator::Migrator;

pub use artifacts::{ArtifactStore, ContractArtifact};
pub use client::{Fault, JsonRpcClient, NetworkClient, Receipt, ScriptedClient, Submission};
pub use config::{
    MIGRATIONS_FILENAME, MigrationConfig, NetworkId, NetworkProfile, OptimizerConfig, SolcConfig,
};
pub use deployments::{DeploymentEntry, DeploymentsFile, export_deployments};
pub use error::{ClientError, FailureReason, LedgerError, OrchestratorError, PlanError};
pub use executor::StepExecutor;
pub use ledger::{DEFAULT_LEDGER_PATH, FileLedger, LedgerEntry, LedgerStore, MemoryLedger};
pub use orchestrator::Orchestrator;
pub use params::{ConcreteArg, GasParams, ParameterConfig, ParameterSet, ResolvedCall};
pub use plan::Plan;
pub use registry::{ArtifactRegistry, ResolvedAddress, StepRecord};
pub use report::{RunReport, StepOutcome, StepReport, StepStatus};
pub use step::{ArgValue, NumberLiteral, Step, StepId, StepKind};
