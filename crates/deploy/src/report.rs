//! Run outcomes and their tabular rendering.

use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::{
    error::FailureReason,
    ledger::LedgerStore,
    registry::{ArtifactRegistry, ResolvedAddress, StepRecord},
    step::{Step, StepId, StepKind},
};

/// Terminal outcome of one step in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success(ResolvedAddress),
    Failed(FailureReason),
    /// Already satisfied on this network; nothing was submitted.
    Skipped,
}

/// Where a step ended up in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::Display)]
#[serde(tag = "status", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    /// Not attempted: the run halted or was cancelled first.
    Pending,
    Skipped { deployment: ResolvedAddress },
    Success { deployment: ResolvedAddress },
    Failed { reason: FailureReason },
}

impl StepStatus {
    pub fn deployment(&self) -> Option<&ResolvedAddress> {
        match self {
            Self::Skipped { deployment } | Self::Success { deployment } => Some(deployment),
            Self::Pending | Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub id: StepId,
    pub kind: StepKind,
    pub contract: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Summary of one orchestrator run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub network_id: u64,
    pub steps: Vec<StepReport>,
    /// The step that halted the run.
    pub first_failure: Option<(StepId, FailureReason)>,
    pub cancelled: bool,
}

impl RunReport {
    /// A report with every step of the plan still pending.
    pub fn pending(network_id: u64, steps: &[Step]) -> Self {
        Self {
            network_id,
            steps: steps
                .iter()
                .map(|step| StepReport {
                    id: step.id.clone(),
                    kind: step.kind,
                    contract: step.contract.clone(),
                    status: StepStatus::Pending,
                })
                .collect(),
            first_failure: None,
            cancelled: false,
        }
    }

    /// Every step skipped or succeeded, and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        self.first_failure.is_none() && !self.cancelled
    }

    pub fn status(&self, id: &StepId) -> Option<&StepStatus> {
        self.steps
            .iter()
            .find(|report| &report.id == id)
            .map(|report| &report.status)
    }

    pub(crate) fn set_status(&mut self, id: &StepId, status: StepStatus) {
        if let Some(report) = self.steps.iter_mut().find(|report| &report.id == id) {
            report.status = status;
        }
    }

    pub fn count(&self, predicate: impl Fn(&StepStatus) -> bool) -> usize {
        self.steps.iter().filter(|report| predicate(&report.status)).count()
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Step", "Kind", "Contract", "Status", "Address / Reason"]);

        for report in &self.steps {
            let detail = match &report.status {
                StepStatus::Pending => String::new(),
                StepStatus::Skipped { deployment } | StepStatus::Success { deployment } => {
                    deployment.address.to_string()
                }
                StepStatus::Failed { reason } => reason.to_string(),
            };
            table.add_row(vec![
                report.id.to_string(),
                report.kind.to_string(),
                report.contract.clone(),
                report.status.to_string(),
                detail,
            ]);
        }

        table.to_string()
    }
}

/// Ledger state of every planned step, plus recorded steps outside the plan.
pub fn render_status<S: LedgerStore>(
    steps: &[Step],
    registry: &ArtifactRegistry<S>,
    network_id: u64,
) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Step",
        "Contract",
        "State",
        "Address",
        "Block",
        "Recorded at",
        "Detail",
    ]);

    let mut rows: Vec<(StepId, Option<&StepRecord>)> = steps
        .iter()
        .map(|step| (step.id.clone(), registry.record_of(&step.id, network_id)))
        .collect();
    for (id, record) in registry.records(network_id) {
        if !steps.iter().any(|step| &step.id == id) {
            rows.push((id.clone(), Some(record)));
        }
    }

    for (id, record) in rows {
        let row = match record {
            None => vec![id.to_string(), String::new(), "pending".to_string()],
            Some(StepRecord::Success {
                deployment,
                recorded_at,
                ..
            }) => vec![
                id.to_string(),
                deployment.contract.clone(),
                "deployed".to_string(),
                deployment.address.to_string(),
                deployment.block_number.to_string(),
                recorded_at.to_rfc3339(),
            ],
            Some(StepRecord::Failed {
                reason,
                attempts,
                recorded_at,
            }) => vec![
                id.to_string(),
                String::new(),
                format!("failed ({attempts}x)"),
                String::new(),
                String::new(),
                recorded_at.to_rfc3339(),
                reason.to_string(),
            ],
        };
        table.add_row(row);
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use alloy_core::primitives::{Address, B256};

    fn deployment() -> ResolvedAddress {
        ResolvedAddress {
            contract: "DinngoToken".to_string(),
            network_id: 3,
            address: Address::repeat_byte(0xab),
            tx_hash: B256::repeat_byte(1),
            block_number: 12,
        }
    }

    fn steps() -> Vec<Step> {
        vec![
            Step::deploy("token", "DinngoToken"),
            Step::deploy("crowdsale", "DinngoCrowdsale"),
        ]
    }

    #[test]
    fn test_pending_report() {
        let report = RunReport::pending(3, &steps());
        assert!(report.is_success());
        assert_eq!(report.count(|status| *status == StepStatus::Pending), 2);
    }

    #[test]
    fn test_render_lists_every_step() {
        let mut report = RunReport::pending(3, &steps());
        report.set_status(
            &"token".into(),
            StepStatus::Success {
                deployment: deployment(),
            },
        );
        report.set_status(
            &"crowdsale".into(),
            StepStatus::Failed {
                reason: FailureReason::Rejected("out of gas".into()),
            },
        );

        let rendered = report.render();
        assert!(rendered.contains("token"));
        assert!(rendered.contains(&Address::repeat_byte(0xab).to_string()));
        assert!(rendered.contains("rejected: out of gas"));
    }

    #[test]
    fn test_status_includes_unplanned_records() {
        let mut registry = ArtifactRegistry::new(MemoryLedger::new());
        registry
            .record(&"legacy".into(), 3, &StepOutcome::Success(deployment()), None)
            .expect("Failed to record");

        let rendered = render_status(&steps(), &registry, 3);
        assert!(rendered.contains("legacy"));
        assert!(rendered.contains("deployed"));
        assert!(rendered.contains("pending"));
    }
}
