//! Sequential, resumable execution of a migration plan.

use tokio::sync::watch;

use crate::{
    artifacts::ArtifactStore,
    client::NetworkClient,
    config::{NetworkId, NetworkProfile, OptimizerConfig},
    error::{FailureReason, LedgerError, OrchestratorError},
    executor::StepExecutor,
    fingerprint::StepFingerprint,
    ledger::LedgerStore,
    params::{ParameterSet, ResolvedCall},
    plan::Plan,
    registry::ArtifactRegistry,
    report::{RunReport, StepOutcome, StepStatus},
    step::Step,
};

/// Runs steps in dependency order against one network.
///
/// Steps already recorded as successful are skipped, so a run can be repeated
/// or resumed after a crash without redeploying anything. The run halts at the
/// first failure.
pub struct Orchestrator<C, S> {
    executor: StepExecutor<C>,
    registry: ArtifactRegistry<S>,
    parameters: ParameterSet,
    optimizer: OptimizerConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: NetworkClient, S: LedgerStore> Orchestrator<C, S> {
    pub fn new(client: C, store: S, artifacts: ArtifactStore, parameters: ParameterSet) -> Self {
        Self {
            executor: StepExecutor::new(client, artifacts),
            registry: ArtifactRegistry::new(store),
            parameters,
            optimizer: OptimizerConfig::default(),
            cancel: None,
        }
    }

    /// Stop before the next step once `cancel` turns `true`.
    ///
    /// A step already submitted always runs to its outcome and is recorded.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn registry(&self) -> &ArtifactRegistry<S> {
        &self.registry
    }

    pub fn client(&self) -> &C {
        self.executor.client()
    }

    /// The network id to record under: the profile's when fixed, the node's
    /// otherwise. A fixed id must match what the node reports.
    pub async fn network_id(&self, network: &NetworkProfile) -> Result<u64, OrchestratorError> {
        let actual = self.executor.client().network_id().await?;
        match network.network_id {
            NetworkId::Id(expected) if expected != actual => {
                Err(OrchestratorError::NetworkMismatch { expected, actual })
            }
            _ => Ok(actual),
        }
    }

    /// Run `steps` against `network`.
    ///
    /// Plan errors are returned before anything is submitted. Step failures do
    /// not make this return `Err`; they are reported in the [`RunReport`].
    pub async fn run(
        &mut self,
        steps: Vec<Step>,
        network: &NetworkProfile,
    ) -> Result<RunReport, OrchestratorError> {
        let plan = Plan::new(steps)?;
        let network_id = self.network_id(network).await?;
        self.registry.load(network_id)?;

        tracing::info!(
            network_id,
            steps = plan.len(),
            "Starting migration run"
        );

        let mut report = RunReport::pending(network_id, plan.steps());

        for step in plan.steps() {
            if self.is_cancelled() {
                tracing::warn!(next_step = %step.id, "Run cancelled, remaining steps left pending");
                report.cancelled = true;
                break;
            }

            if let Some(deployment) = self.registry.lookup(&step.id, network_id).cloned() {
                self.warn_on_drift(step, network, network_id);
                tracing::info!(step = %step.id, address = %deployment.address, "Step already deployed, skipping");
                report.set_status(&step.id, StepStatus::Skipped { deployment });
                continue;
            }

            let call = match self.parameters.resolve(step, &self.registry, network, network_id) {
                Ok(call) => call,
                Err(reason) => {
                    // Nothing was submitted, so nothing is persisted.
                    halt(&mut report, step, reason);
                    break;
                }
            };
            let fingerprint = self.fingerprint(step, &call);

            tracing::info!(step = %step.id, contract = %step.contract, "Running step");
            let outcome = self.executor.execute(step, &call, network_id, network).await;

            if let StepOutcome::Failed(reason) = &outcome {
                if !reason.is_execution_failure() {
                    // Rejected before submission: the ledger only holds what
                    // reached the network.
                    halt(&mut report, step, reason.clone());
                    break;
                }
            }

            match self.registry.record(&step.id, network_id, &outcome, fingerprint) {
                Ok(()) => {}
                Err(LedgerError::Conflict { detail, .. }) => {
                    halt(&mut report, step, FailureReason::LedgerConflict(detail));
                    break;
                }
                Err(e) => {
                    if let StepOutcome::Success(deployment) = &outcome {
                        tracing::error!(
                            step = %step.id,
                            address = %deployment.address,
                            tx_hash = %deployment.tx_hash,
                            error = %e,
                            "Step succeeded on chain but could not be recorded"
                        );
                    }
                    return Err(e.into());
                }
            }

            match outcome {
                StepOutcome::Success(deployment) => {
                    report.set_status(&step.id, StepStatus::Success { deployment });
                }
                StepOutcome::Failed(reason) => {
                    halt(&mut report, step, reason);
                    break;
                }
                StepOutcome::Skipped => {}
            }
        }

        tracing::info!(
            network_id,
            success = report.is_success(),
            cancelled = report.cancelled,
            "Migration run finished"
        );
        Ok(report)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    fn fingerprint(&self, step: &Step, call: &ResolvedCall) -> Option<String> {
        match StepFingerprint::new(step, call, self.optimizer).compute_hash() {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(step = %step.id, error = %e, "Failed to fingerprint step");
                None
            }
        }
    }

    /// Warn when a skipped step would now be deployed with different inputs.
    fn warn_on_drift(&self, step: &Step, network: &NetworkProfile, network_id: u64) {
        let Some(recorded) = self.registry.fingerprint(&step.id, network_id) else {
            return;
        };
        let Ok(call) = self.parameters.resolve(step, &self.registry, network, network_id) else {
            tracing::debug!(step = %step.id, "Cannot resolve skipped step, drift not checked");
            return;
        };

        if let Some(current) = self.fingerprint(step, &call) {
            if current != recorded {
                tracing::warn!(
                    step = %step.id,
                    recorded = %recorded,
                    current = %current,
                    "Configuration changed since this step was deployed; the recorded deployment is kept"
                );
            }
        }
    }
}

fn halt(report: &mut RunReport, step: &Step, reason: FailureReason) {
    tracing::error!(step = %step.id, reason = %reason, "Step failed, halting run");
    report.set_status(
        &step.id,
        StepStatus::Failed {
            reason: reason.clone(),
        },
    );
    report.first_failure = Some((step.id.clone(), reason));
}
