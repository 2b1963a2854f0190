//! Execution of a single step against the network.

use alloy_core::primitives::{B256, Bytes};

use crate::{
    artifacts::ArtifactStore,
    client::{NetworkClient, Receipt},
    config::NetworkProfile,
    error::{ClientError, FailureReason},
    params::ResolvedCall,
    registry::ResolvedAddress,
    report::StepOutcome,
    step::{Step, StepKind},
};

/// Turns a resolved call into a transaction and waits for its receipt.
///
/// A submission is never retried: once a transaction has been handed to the
/// node, any failure is reported as-is.
#[derive(Debug)]
pub struct StepExecutor<C> {
    client: C,
    artifacts: ArtifactStore,
}

impl<C: NetworkClient> StepExecutor<C> {
    pub fn new(client: C, artifacts: ArtifactStore) -> Self {
        Self { client, artifacts }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Execute `step` with its resolved `call`.
    ///
    /// Returns `Success` or `Failed`, never `Skipped`.
    pub async fn execute(
        &mut self,
        step: &Step,
        call: &ResolvedCall,
        network_id: u64,
        network: &NetworkProfile,
    ) -> StepOutcome {
        match self.try_execute(step, call, network_id, network).await {
            Ok(deployment) => StepOutcome::Success(deployment),
            Err(reason) => StepOutcome::Failed(reason),
        }
    }

    async fn try_execute(
        &mut self,
        step: &Step,
        call: &ResolvedCall,
        network_id: u64,
        network: &NetworkProfile,
    ) -> Result<ResolvedAddress, FailureReason> {
        let artifact = self
            .artifacts
            .load(&step.contract)
            .map_err(|e| FailureReason::InvalidParameter(format!("{e:#}")))?;

        let (data, target) = match step.kind {
            StepKind::DeployContract => (artifact.deploy_data(&call.args), None),
            StepKind::InvokeSetup => {
                let method = step.method.as_deref().unwrap_or_default();
                let target = call.target.ok_or_else(|| {
                    FailureReason::InvalidParameter(format!("setup step `{}` has no target", step.id))
                })?;
                (artifact.call_data(method, &call.args), Some(target))
            }
        };
        let data: Bytes = data.map_err(FailureReason::InvalidParameter)?;

        tracing::info!(
            step = %step.id,
            kind = %step.kind,
            contract = %step.contract,
            gas = call.gas.gas,
            "Submitting transaction"
        );

        let submitted = match target {
            None => self.client.deploy_contract(data, call.gas).await,
            Some(target) => self.client.call_method(target, data, call.gas).await,
        };
        let tx_hash = submitted.map_err(|e| FailureReason::Rejected(e.to_string()))?;

        let receipt = self.confirm(tx_hash, network).await?;
        if !receipt.status {
            return Err(FailureReason::RevertedByContract(format!(
                "transaction {tx_hash} reverted in block {}",
                receipt.block_number
            )));
        }

        let address = match target {
            Some(target) => target,
            None => receipt
                .contract_address
                .ok_or_else(|| FailureReason::Rejected(ClientError::MissingContractAddress(tx_hash).to_string()))?,
        };

        tracing::info!(
            step = %step.id,
            address = %address,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            "Step confirmed"
        );

        Ok(ResolvedAddress {
            contract: step.contract.clone(),
            network_id,
            address,
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        })
    }

    async fn confirm(&self, tx_hash: B256, network: &NetworkProfile) -> Result<Receipt, FailureReason> {
        let timeout = network.confirmation_timeout();

        match tokio::time::timeout(
            timeout,
            self.client.await_confirmation(tx_hash, network.confirmations),
        )
        .await
        {
            Ok(Ok(receipt)) => Ok(receipt),
            // Submitted but unconfirmed: the transaction may still be mined.
            Ok(Err(e)) => Err(FailureReason::Timeout(format!(
                "failed to confirm {tx_hash}: {e}"
            ))),
            Err(_) => Err(FailureReason::Timeout(format!(
                "transaction {tx_hash} after {}s",
                timeout.as_secs()
            ))),
        }
    }
}
