use std::sync::Arc;

use tracing::{debug, warn};

use reqflow_core::error::{Result, WorkflowError};
use reqflow_core::traits::RecordStore;
use reqflow_core::types::{
    DocumentId, OverallStatus, ProcurementVariant, Stage, StepStatus, WorkflowInstance,
};

/// Reconciles local progress with the server-authoritative record.
///
/// The sole boundary to the system of record; server state always wins on
/// conflict. Reconciliation is idempotent: two calls with no intervening
/// mutation produce identical instances.
pub struct StatusSynchronizer {
    store: Arc<dyn RecordStore>,
}

impl StatusSynchronizer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Build the local view of a document's workflow from the server.
    pub async fn reconcile(&self, document_id: &DocumentId) -> Result<WorkflowInstance> {
        let document = self.store.fetch_document(document_id).await?;

        if let Some(snapshot) = self.store.fetch_workflow(document_id).await? {
            let current = Stage::from_number(snapshot.current_step).ok_or_else(|| {
                WorkflowError::StateConflict(format!(
                    "server snapshot for {} names stage {}, outside the pipeline",
                    document_id, snapshot.current_step
                ))
            })?;
            debug!(document_id = %document_id, current = %current, "Adopting authoritative snapshot");
            return Ok(Self::adopt(
                document_id.clone(),
                document.variant,
                current,
                snapshot.step_status,
            ));
        }

        // No workflow record. A document that carries its own pipeline
        // position gets an equivalent derived state instead of an error.
        if let Some(n) = document.current_step.filter(|n| *n > 1) {
            let current = Stage::from_number(n).ok_or_else(|| {
                WorkflowError::StateConflict(format!(
                    "document {} claims stage {}, outside the pipeline",
                    document_id, n
                ))
            })?;
            warn!(document_id = %document_id, current = %current, "No workflow snapshot; deriving state from document");
            return Ok(Self::adopt(
                document_id.clone(),
                document.variant,
                current,
                StepStatus::NotStarted,
            ));
        }

        // Fresh document: stage 1 is a precondition of the document
        // existing, not an executable action.
        debug!(document_id = %document_id, "Initializing new workflow instance");
        let mut instance = WorkflowInstance::new(document_id.clone(), document.variant);
        instance.step_mut(Stage::Validation).status = StepStatus::Completed;
        instance.current_step = Stage::BudgetCheck;
        Ok(instance)
    }

    /// Shape an instance around a server-reported position: everything
    /// before it completed, the position as reported, everything after
    /// untouched.
    fn adopt(
        document_id: DocumentId,
        variant: ProcurementVariant,
        current: Stage,
        current_status: StepStatus,
    ) -> WorkflowInstance {
        let mut instance = WorkflowInstance::new(document_id, variant);
        for stage in Stage::ALL {
            if stage.number() < current.number() {
                instance.step_mut(stage).status = StepStatus::Completed;
            }
        }
        instance.step_mut(current).status = current_status;
        instance.current_step = current;
        instance.overall_status = match current_status {
            StepStatus::WaitingApproval if current.is_final_gate() => {
                OverallStatus::AwaitingFinalApproval
            }
            StepStatus::WaitingApproval => OverallStatus::NeedsApproval,
            StepStatus::Completed if current.is_payment() => OverallStatus::Completed,
            StepStatus::Error => OverallStatus::Error,
            _ => OverallStatus::InProgress,
        };
        instance
    }
}
