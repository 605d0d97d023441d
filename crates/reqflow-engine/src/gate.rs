//! Approval gate: pure decision logic, no I/O.
//!
//! Classifies step outcomes, validates human decisions, and enforces the
//! ordering invariant: no step may start while an earlier step is waiting
//! on a decision.

use reqflow_core::error::{Result, WorkflowError};
use reqflow_core::types::{
    ApprovalAction, Decision, Stage, StepResult, StepResultStatus, StepStatus, WorkflowInstance,
};

/// Classification of a step's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Continue to the next stage (subject to run mode).
    AutoContinue,
    /// A flagged check: pause for a human decision.
    PauseForApproval,
    /// The final gate: pause on every run, flagged or not.
    MandatoryPause,
    /// End of the line, successfully (stage 9) or not (check error).
    Terminal { failed: bool },
}

/// What the orchestrator should do after a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Approval on stages 2–7: mark completed and resume from this stage.
    ContinueFrom(Stage),
    /// Approval on stage 8: run payment release.
    RunPayment,
    /// Rejection: terminal, nothing further executes.
    Rejected,
    /// Hold at stage 8: state unchanged, resumable later.
    Held,
}

/// Classify the result of one executed stage.
pub fn classify(stage: Stage, result: &StepResult) -> Outcome {
    if result.status == StepResultStatus::Error {
        return Outcome::Terminal { failed: true };
    }
    if stage.is_payment() {
        return Outcome::Terminal { failed: false };
    }
    if stage.is_final_gate() {
        return Outcome::MandatoryPause;
    }
    // A flag from any HITL-eligible stage is a fresh pause, even when the
    // stage sits behind an earlier approval. Stage 1 never flags.
    if stage.hitl_eligible() && result.flagged {
        return Outcome::PauseForApproval;
    }
    Outcome::AutoContinue
}

/// Validate a human decision against the instance and say what follows.
pub fn decide(instance: &WorkflowInstance, action: &ApprovalAction) -> Result<NextAction> {
    let target = action.target_step;

    if instance.current_step != target {
        return Err(WorkflowError::Validation(format!(
            "decision targets {} but the active stage is {}",
            target, instance.current_step
        )));
    }
    if instance.step(target).status != StepStatus::WaitingApproval {
        return Err(WorkflowError::Validation(format!(
            "{} is not waiting for approval",
            target
        )));
    }

    match action.decision {
        Decision::Approve if target.is_final_gate() => Ok(NextAction::RunPayment),
        Decision::Approve => match target.next() {
            Some(next) if target.hitl_eligible() => Ok(NextAction::ContinueFrom(next)),
            _ => Err(WorkflowError::Validation(format!(
                "{} cannot be approved",
                target
            ))),
        },
        Decision::Reject => Ok(NextAction::Rejected),
        Decision::Hold if target.is_final_gate() => Ok(NextAction::Held),
        Decision::Hold => Err(WorkflowError::Validation(format!(
            "hold is only permitted at {}, not {}",
            Stage::FinalApproval,
            target
        ))),
    }
}

/// Check whether executing from `start` is currently legal.
///
/// Checked before every execution request rather than relying on the
/// sequential call order, because step mode allows a caller to request an
/// out-of-order re-run.
pub fn ensure_runnable(instance: &WorkflowInstance, start: Stage) -> Result<()> {
    if instance.overall_status.is_terminal() {
        return Err(WorkflowError::Validation(format!(
            "workflow for {} is {:?} and cannot run",
            instance.document_id, instance.overall_status
        )));
    }

    // Ordering invariant: a waiting step blocks everything at or after it.
    if let Some(waiting) = instance.waiting_step() {
        if waiting.number() <= start.number() {
            return Err(WorkflowError::Validation(format!(
                "{} is waiting for approval; cannot run {}",
                waiting, start
            )));
        }
    }

    if start.is_payment() {
        return Err(WorkflowError::Validation(
            "payment release runs only via approval at the final gate".into(),
        ));
    }

    if start.number() < instance.current_step.number() {
        return Err(WorkflowError::Validation(format!(
            "{} is already completed and is never re-executed",
            start
        )));
    }
    if start.number() > instance.current_step.number() {
        return Err(WorkflowError::Validation(format!(
            "cannot skip ahead to {}; the active stage is {}",
            start, instance.current_step
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqflow_core::types::{DocumentId, ProcurementVariant, RunMode};

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new(DocumentId::from("req-1"), ProcurementVariant::Goods)
    }

    fn waiting_at(stage: Stage) -> WorkflowInstance {
        let mut inst = instance();
        for s in Stage::ALL {
            if s.number() < stage.number() {
                inst.step_mut(s).status = StepStatus::Completed;
            }
        }
        inst.step_mut(stage).status = StepStatus::WaitingApproval;
        inst.current_step = stage;
        inst.run_mode = RunMode::All;
        inst
    }

    #[test]
    fn stage_one_always_auto_continues() {
        // Even a flagged result at stage 1 does not pause (it never flags
        // in practice; hitl_eligible is false so the flag is inert).
        let mut flagged = StepResult::flagged("should not matter");
        assert_eq!(classify(Stage::Validation, &flagged), Outcome::AutoContinue);
        flagged.flagged = false;
        assert_eq!(classify(Stage::Validation, &flagged), Outcome::AutoContinue);
    }

    #[test]
    fn flagged_middle_stages_pause() {
        for n in 2..=7 {
            let stage = Stage::from_number(n).unwrap();
            assert_eq!(
                classify(stage, &StepResult::flagged("mismatch")),
                Outcome::PauseForApproval
            );
            assert_eq!(classify(stage, &StepResult::success()), Outcome::AutoContinue);
        }
    }

    #[test]
    fn final_gate_always_pauses() {
        assert_eq!(
            classify(Stage::FinalApproval, &StepResult::success()),
            Outcome::MandatoryPause
        );
        assert_eq!(
            classify(Stage::FinalApproval, &StepResult::flagged("late flag")),
            Outcome::MandatoryPause
        );
    }

    #[test]
    fn payment_is_terminal_on_success() {
        assert_eq!(
            classify(Stage::PaymentRelease, &StepResult::success()),
            Outcome::Terminal { failed: false }
        );
    }

    #[test]
    fn check_error_is_terminal_at_any_stage() {
        for stage in Stage::ALL {
            assert_eq!(
                classify(stage, &StepResult::error("boom")),
                Outcome::Terminal { failed: true }
            );
        }
    }

    #[test]
    fn approve_middle_stage_continues() {
        let inst = waiting_at(Stage::FraudScreen);
        let action = ApprovalAction { target_step: Stage::FraudScreen, decision: Decision::Approve };
        assert_eq!(
            decide(&inst, &action).unwrap(),
            NextAction::ContinueFrom(Stage::ComplianceReview)
        );
    }

    #[test]
    fn approve_final_gate_runs_payment() {
        let inst = waiting_at(Stage::FinalApproval);
        let action = ApprovalAction { target_step: Stage::FinalApproval, decision: Decision::Approve };
        assert_eq!(decide(&inst, &action).unwrap(), NextAction::RunPayment);
    }

    #[test]
    fn reject_is_terminal_anywhere() {
        for stage in [Stage::BudgetCheck, Stage::TaxReview, Stage::FinalApproval] {
            let inst = waiting_at(stage);
            let action = ApprovalAction { target_step: stage, decision: Decision::Reject };
            assert_eq!(decide(&inst, &action).unwrap(), NextAction::Rejected);
        }
    }

    #[test]
    fn hold_only_at_final_gate() {
        let inst = waiting_at(Stage::FinalApproval);
        let action = ApprovalAction { target_step: Stage::FinalApproval, decision: Decision::Hold };
        assert_eq!(decide(&inst, &action).unwrap(), NextAction::Held);

        let inst = waiting_at(Stage::FraudScreen);
        let action = ApprovalAction { target_step: Stage::FraudScreen, decision: Decision::Hold };
        assert!(matches!(decide(&inst, &action), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn decision_for_non_waiting_step_is_rejected() {
        let inst = instance();
        let action = ApprovalAction { target_step: Stage::Validation, decision: Decision::Approve };
        assert!(matches!(decide(&inst, &action), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn decision_must_target_active_stage() {
        let inst = waiting_at(Stage::FraudScreen);
        let action = ApprovalAction { target_step: Stage::BudgetCheck, decision: Decision::Approve };
        assert!(matches!(decide(&inst, &action), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn waiting_step_blocks_later_runs() {
        let inst = waiting_at(Stage::FraudScreen);
        let err = ensure_runnable(&inst, Stage::ComplianceReview).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        // The waiting step itself needs a decision, not a run
        assert!(ensure_runnable(&inst, Stage::FraudScreen).is_err());
    }

    #[test]
    fn completed_steps_never_rerun() {
        let mut inst = instance();
        inst.step_mut(Stage::Validation).status = StepStatus::Completed;
        inst.step_mut(Stage::BudgetCheck).status = StepStatus::Completed;
        inst.current_step = Stage::SupplierVetting;
        assert!(ensure_runnable(&inst, Stage::BudgetCheck).is_err());
        assert!(ensure_runnable(&inst, Stage::SupplierVetting).is_ok());
    }

    #[test]
    fn cannot_skip_ahead_or_run_payment_directly() {
        let inst = instance();
        assert!(ensure_runnable(&inst, Stage::TaxReview).is_err());
        let inst = waiting_at(Stage::FinalApproval);
        assert!(ensure_runnable(&inst, Stage::PaymentRelease).is_err());
    }

    #[test]
    fn terminal_workflows_never_run() {
        use reqflow_core::types::OverallStatus;
        for status in [OverallStatus::Completed, OverallStatus::Rejected, OverallStatus::Error] {
            let mut inst = instance();
            inst.overall_status = status;
            assert!(ensure_runnable(&inst, Stage::Validation).is_err());
        }
    }
}
