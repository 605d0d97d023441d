//! Workflow orchestrator: the single entry point for driving a
//! requisition through the nine-stage pipeline.
//!
//! All mutation of a `WorkflowInstance` is routed through the methods
//! here; callers hold snapshots, never live references. Distinct documents
//! are independent; within one document step execution is strictly
//! sequential, with the instance map lock never held across an executor
//! await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use reqflow_core::config::EngineConfig;
use reqflow_core::error::{Result, WorkflowError};
use reqflow_core::event::EventBus;
use reqflow_core::traits::{RecordStore, StepAgent};
use reqflow_core::types::{
    ApprovalAction, Decision, DocumentId, OverallStatus, RunMode, Stage, StepStatus,
    WorkflowEvent, WorkflowInstance,
};

use crate::executor::AgentExecutor;
use crate::gate::{self, NextAction, Outcome};
use crate::sync::StatusSynchronizer;

pub struct WorkflowOrchestrator {
    executor: AgentExecutor,
    sync: StatusSynchronizer,
    event_bus: Arc<EventBus>,
    instances: Mutex<HashMap<DocumentId, WorkflowInstance>>,
    /// Monotonic source for stale-response tokens. Every mutating entry
    /// point stamps the instance; a response carrying an older stamp is
    /// discarded instead of applied.
    generation: AtomicU64,
}

impl WorkflowOrchestrator {
    pub fn new(
        agent: Arc<dyn StepAgent>,
        store: Arc<dyn RecordStore>,
        event_bus: Arc<EventBus>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            executor: AgentExecutor::new(agent).with_timeout(config.step_timeout_secs),
            sync: StatusSynchronizer::new(store),
            event_bus,
            instances: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Execute the pipeline from `start_step` until completion, a pause
    /// point, or an error. Returns the instance snapshot at the stop point.
    pub async fn run(
        &self,
        document_id: &DocumentId,
        start_step: Stage,
        run_mode: RunMode,
    ) -> Result<WorkflowInstance> {
        let token = {
            let mut instances = self.instances.lock().await;
            if !instances.contains_key(document_id) {
                // Fetch with the map unlocked so a slow record store for
                // one document cannot stall calls for every other document.
                drop(instances);
                let fetched = self.sync.reconcile(document_id).await?;
                instances = self.instances.lock().await;
                // Another caller may have populated the entry meanwhile.
                instances.entry(document_id.clone()).or_insert(fetched);
            }
            let instance = instances
                .get_mut(document_id)
                .ok_or_else(|| WorkflowError::NotFound(document_id.to_string()))?;

            gate::ensure_runnable(instance, start_step)?;
            if instance.in_flight.is_some() {
                return Err(WorkflowError::Validation(format!(
                    "a step is already executing for {}",
                    document_id
                )));
            }
            instance.run_mode = run_mode;
            let token = self.next_generation();
            instance.generation = token;
            token
        };

        info!(document_id = %document_id, start = %start_step, mode = ?run_mode, "Run requested");
        self.event_bus.publish(WorkflowEvent::RunStarted {
            document_id: document_id.clone(),
            start_step,
        });

        self.run_loop(document_id, start_step, token).await
    }

    /// Apply a human decision to the paused step, auto-chaining into the
    /// next execution when the decision allows it.
    pub async fn submit(
        &self,
        document_id: &DocumentId,
        action: ApprovalAction,
    ) -> Result<WorkflowInstance> {
        let (next, token) = {
            let mut instances = self.instances.lock().await;
            let instance = instances
                .get_mut(document_id)
                .ok_or_else(|| WorkflowError::NotFound(format!("workflow for {}", document_id)))?;

            let next = gate::decide(instance, &action)?;
            info!(document_id = %document_id, target = %action.target_step, decision = ?action.decision, "Decision accepted");
            self.event_bus.publish(WorkflowEvent::ApprovalResolved {
                document_id: document_id.clone(),
                stage: action.target_step,
                decision: action.decision,
            });

            match next {
                NextAction::ContinueFrom(next_stage) => {
                    instance.step_mut(action.target_step).status = StepStatus::Completed;
                    instance.current_step = next_stage;
                    instance.overall_status = OverallStatus::InProgress;
                }
                NextAction::RunPayment => {
                    instance.step_mut(Stage::FinalApproval).status = StepStatus::Completed;
                    instance.current_step = Stage::PaymentRelease;
                    instance.overall_status = OverallStatus::InProgress;
                }
                NextAction::Rejected => {
                    instance.step_mut(action.target_step).status = StepStatus::Error;
                    instance.overall_status = OverallStatus::Rejected;
                    self.event_bus.publish(WorkflowEvent::RunHalted {
                        document_id: document_id.clone(),
                        status: OverallStatus::Rejected,
                    });
                    return Ok(instance.clone());
                }
                NextAction::Held => {
                    // Hold leaves everything as it stands, safely repeatable.
                    return Ok(instance.clone());
                }
            }

            let token = self.next_generation();
            instance.generation = token;
            (next, token)
        };

        // Approval yielded a continuation: the orchestrator, not the
        // caller, owns sequencing from here.
        let resume_from = match next {
            NextAction::ContinueFrom(stage) => stage,
            NextAction::RunPayment => Stage::PaymentRelease,
            _ => unreachable!("terminal decisions returned above"),
        };
        self.run_loop(document_id, resume_from, token).await
    }

    pub async fn approve(&self, document_id: &DocumentId, target: Stage) -> Result<WorkflowInstance> {
        self.submit(document_id, ApprovalAction { target_step: target, decision: Decision::Approve })
            .await
    }

    pub async fn reject(&self, document_id: &DocumentId, target: Stage) -> Result<WorkflowInstance> {
        self.submit(document_id, ApprovalAction { target_step: target, decision: Decision::Reject })
            .await
    }

    pub async fn hold(&self, document_id: &DocumentId, target: Stage) -> Result<WorkflowInstance> {
        self.submit(document_id, ApprovalAction { target_step: target, decision: Decision::Hold })
            .await
    }

    /// Force adoption of the server record, replacing the local instance.
    /// Any in-flight execution is superseded via the generation stamp.
    pub async fn reconcile(&self, document_id: &DocumentId) -> Result<WorkflowInstance> {
        let mut instance = self.sync.reconcile(document_id).await?;
        instance.generation = self.next_generation();
        let snapshot = instance.clone();
        self.instances
            .lock()
            .await
            .insert(document_id.clone(), instance);
        Ok(snapshot)
    }

    /// Discard the local instance. A late executor response for it is
    /// dropped, never applied to whatever replaces it.
    pub async fn reset(&self, document_id: &DocumentId) {
        self.next_generation();
        self.instances.lock().await.remove(document_id);
    }

    /// Read-only snapshot of the current local state.
    pub async fn snapshot(&self, document_id: &DocumentId) -> Result<WorkflowInstance> {
        self.instances
            .lock()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow for {}", document_id)))
    }

    /// The sequential execution loop. `token` is the generation stamped at
    /// entry; if the instance has been reset or superseded while a call
    /// was outstanding, the stale response is discarded.
    async fn run_loop(
        &self,
        document_id: &DocumentId,
        start: Stage,
        token: u64,
    ) -> Result<WorkflowInstance> {
        let mut stage = start;

        loop {
            let variant = {
                let mut instances = self.instances.lock().await;
                let instance = self.live_instance(&mut instances, document_id, token)?;
                instance.overall_status = OverallStatus::InProgress;
                instance.step_mut(stage).status = StepStatus::InProgress;
                instance.in_flight = Some(token);
                instance.variant
            };

            self.event_bus.publish(WorkflowEvent::StepStarted {
                document_id: document_id.clone(),
                stage,
            });

            // Suspension point: the lock is released while the external
            // check runs.
            let executed = self.executor.execute(stage, document_id, variant).await;

            let mut instances = self.instances.lock().await;
            let instance = self.live_instance(&mut instances, document_id, token)?;
            // This response is live; the flight it belonged to is over.
            instance.in_flight = None;

            let result = match executed {
                Ok(result) => result,
                Err(e) => {
                    warn!(document_id = %document_id, stage = %stage, error = %e, "Step failed, halting instance");
                    let step = instance.step_mut(stage);
                    step.status = StepStatus::Error;
                    step.agent_notes.push(e.to_string());
                    instance.overall_status = OverallStatus::Error;
                    self.event_bus.publish(WorkflowEvent::RunFailed {
                        document_id: document_id.clone(),
                        stage,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };

            instance.step_mut(stage).absorb(&result);

            match gate::classify(stage, &result) {
                Outcome::AutoContinue => {
                    instance.step_mut(stage).status = StepStatus::Completed;
                    self.event_bus.publish(WorkflowEvent::StepCompleted {
                        document_id: document_id.clone(),
                        stage,
                        flagged: result.flagged,
                    });

                    // Only stages with a successor classify as AutoContinue.
                    let next = match stage.next() {
                        Some(next) => next,
                        None => {
                            return Err(WorkflowError::StateConflict(format!(
                                "stage {stage} has no successor"
                            )))
                        }
                    };
                    instance.current_step = next;

                    if instance.run_mode == RunMode::Step {
                        debug!(document_id = %document_id, next = %next, "Step mode: stopping after one step");
                        self.event_bus.publish(WorkflowEvent::RunHalted {
                            document_id: document_id.clone(),
                            status: OverallStatus::InProgress,
                        });
                        return Ok(instance.clone());
                    }
                    stage = next;
                }
                Outcome::PauseForApproval => {
                    instance.step_mut(stage).status = StepStatus::WaitingApproval;
                    instance.overall_status = OverallStatus::NeedsApproval;
                    info!(document_id = %document_id, stage = %stage, reason = ?result.flag_reason, "Step flagged, pausing for approval");
                    self.event_bus.publish(WorkflowEvent::ApprovalRequested {
                        document_id: document_id.clone(),
                        stage,
                        reason: result.flag_reason.clone(),
                    });
                    return Ok(instance.clone());
                }
                Outcome::MandatoryPause => {
                    instance.step_mut(stage).status = StepStatus::WaitingApproval;
                    instance.overall_status = OverallStatus::AwaitingFinalApproval;
                    info!(document_id = %document_id, "Final gate reached, awaiting human decision");
                    self.event_bus.publish(WorkflowEvent::ApprovalRequested {
                        document_id: document_id.clone(),
                        stage,
                        reason: result.flag_reason.clone(),
                    });
                    return Ok(instance.clone());
                }
                Outcome::Terminal { failed: true } => {
                    instance.step_mut(stage).status = StepStatus::Error;
                    instance.overall_status = OverallStatus::Error;
                    warn!(document_id = %document_id, stage = %stage, "Check reported an error, halting instance");
                    self.event_bus.publish(WorkflowEvent::RunFailed {
                        document_id: document_id.clone(),
                        stage,
                        error: "check reported an error result".into(),
                    });
                    return Ok(instance.clone());
                }
                Outcome::Terminal { failed: false } => {
                    instance.step_mut(stage).status = StepStatus::Completed;
                    instance.overall_status = OverallStatus::Completed;
                    info!(document_id = %document_id, "Payment released, workflow complete");
                    self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
                        document_id: document_id.clone(),
                    });
                    return Ok(instance.clone());
                }
            }
        }
    }

    /// Fetch the live instance for `token`, or report that the response
    /// belongs to a superseded execution.
    fn live_instance<'a>(
        &self,
        instances: &'a mut HashMap<DocumentId, WorkflowInstance>,
        document_id: &DocumentId,
        token: u64,
    ) -> Result<&'a mut WorkflowInstance> {
        let instance = instances.get_mut(document_id).ok_or_else(|| {
            WorkflowError::StateConflict(format!(
                "instance for {} was reset while a step was in flight",
                document_id
            ))
        })?;
        if instance.generation != token {
            return Err(WorkflowError::StateConflict(format!(
                "execution for {} was superseded; discarding stale response",
                document_id
            )));
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedAgent, StaticStore};
    use reqflow_core::types::{ProcurementVariant, StepResult};

    fn orchestrator(agent: ScriptedAgent) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            Arc::new(agent),
            Arc::new(StaticStore::fresh(ProcurementVariant::Goods)),
            Arc::new(EventBus::default()),
            &EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn step_mode_stops_after_each_step() {
        let orch = orchestrator(ScriptedAgent::all_clean());
        let doc = DocumentId::from("req-step");

        let inst = orch.run(&doc, Stage::BudgetCheck, RunMode::Step).await.unwrap();
        assert_eq!(inst.current_step, Stage::SupplierVetting);
        assert_eq!(inst.overall_status, OverallStatus::InProgress);
        assert_eq!(inst.step(Stage::BudgetCheck).status, StepStatus::Completed);
        assert_eq!(inst.step(Stage::SupplierVetting).status, StepStatus::NotStarted);

        // The caller drives the next advance.
        let inst = orch.run(&doc, Stage::SupplierVetting, RunMode::Step).await.unwrap();
        assert_eq!(inst.current_step, Stage::FraudScreen);
    }

    #[tokio::test]
    async fn rerun_of_completed_step_is_rejected() {
        let orch = orchestrator(ScriptedAgent::all_clean());
        let doc = DocumentId::from("req-rerun");

        orch.run(&doc, Stage::BudgetCheck, RunMode::Step).await.unwrap();
        let err = orch.run(&doc, Stage::BudgetCheck, RunMode::Step).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn check_error_result_halts_with_history() {
        let agent = ScriptedAgent::all_clean()
            .with_result(Stage::SupplierVetting, StepResult::error("vendor registry down"));
        let orch = orchestrator(agent);
        let doc = DocumentId::from("req-err");

        let inst = orch.run(&doc, Stage::BudgetCheck, RunMode::All).await.unwrap();
        assert_eq!(inst.overall_status, OverallStatus::Error);
        assert_eq!(inst.step(Stage::SupplierVetting).status, StepStatus::Error);
        // Prior history is retained for diagnostics.
        assert_eq!(inst.step(Stage::BudgetCheck).status, StepStatus::Completed);

        // Terminal: further runs are validation errors.
        let err = orch.run(&doc, Stage::SupplierVetting, RunMode::All).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn snapshot_of_unknown_document_is_not_found() {
        let orch = orchestrator(ScriptedAgent::all_clean());
        let err = orch.snapshot(&DocumentId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn hold_outside_final_gate_is_rejected() {
        let agent = ScriptedAgent::all_clean()
            .with_result(Stage::BudgetCheck, StepResult::flagged("over threshold"));
        let orch = orchestrator(agent);
        let doc = DocumentId::from("req-hold");

        orch.run(&doc, Stage::BudgetCheck, RunMode::All).await.unwrap();
        let err = orch.hold(&doc, Stage::BudgetCheck).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        // State is untouched by the rejected decision.
        let inst = orch.snapshot(&doc).await.unwrap();
        assert_eq!(inst.overall_status, OverallStatus::NeedsApproval);
        assert_eq!(inst.step(Stage::BudgetCheck).status, StepStatus::WaitingApproval);
    }
}
