use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of the purchase requisition that owns a workflow.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the requisition procures goods or services.
///
/// The variant changes which external check serves stages 4 and 5;
/// the contract shape is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcurementVariant {
    Goods,
    Services,
}

/// One of the nine fixed pipeline positions.
///
/// Stage identity, HITL eligibility, and the mandatory final gate are
/// modeled here rather than as scattered numeric literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    BudgetCheck,
    SupplierVetting,
    FraudScreen,
    ComplianceReview,
    ThreeWayMatch,
    TaxReview,
    FinalApproval,
    PaymentRelease,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 9] = [
        Stage::Validation,
        Stage::BudgetCheck,
        Stage::SupplierVetting,
        Stage::FraudScreen,
        Stage::ComplianceReview,
        Stage::ThreeWayMatch,
        Stage::TaxReview,
        Stage::FinalApproval,
        Stage::PaymentRelease,
    ];

    /// 1-based pipeline position.
    pub fn number(&self) -> u8 {
        match self {
            Stage::Validation => 1,
            Stage::BudgetCheck => 2,
            Stage::SupplierVetting => 3,
            Stage::FraudScreen => 4,
            Stage::ComplianceReview => 5,
            Stage::ThreeWayMatch => 6,
            Stage::TaxReview => 7,
            Stage::FinalApproval => 8,
            Stage::PaymentRelease => 9,
        }
    }

    pub fn from_number(n: u8) -> Option<Stage> {
        Stage::ALL.get(n.checked_sub(1)? as usize).copied()
    }

    /// Human-readable stage name.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Validation => "Initial Validation",
            Stage::BudgetCheck => "Budget Check",
            Stage::SupplierVetting => "Supplier Vetting",
            Stage::FraudScreen => "Fraud Screening",
            Stage::ComplianceReview => "Compliance Review",
            Stage::ThreeWayMatch => "Three-Way Match",
            Stage::TaxReview => "Tax & Totals Review",
            Stage::FinalApproval => "Final Approval",
            Stage::PaymentRelease => "Payment Release",
        }
    }

    /// Name of the external agent invoked for this stage.
    /// Stages 4 and 5 dispatch to a variant-specific check.
    pub fn agent(&self, variant: ProcurementVariant) -> &'static str {
        match (self, variant) {
            (Stage::Validation, _) => "intake-validator",
            (Stage::BudgetCheck, _) => "budget-checker",
            (Stage::SupplierVetting, _) => "supplier-vetting",
            (Stage::FraudScreen, ProcurementVariant::Goods) => "goods-fraud-screen",
            (Stage::FraudScreen, ProcurementVariant::Services) => "services-fraud-screen",
            (Stage::ComplianceReview, ProcurementVariant::Goods) => "trade-compliance",
            (Stage::ComplianceReview, ProcurementVariant::Services) => "labor-compliance",
            (Stage::ThreeWayMatch, _) => "three-way-match",
            (Stage::TaxReview, _) => "tax-review",
            (Stage::FinalApproval, _) => "final-approval",
            (Stage::PaymentRelease, _) => "payment-release",
        }
    }

    /// Stages 2–7 may pause for a human decision when the check flags.
    pub fn hitl_eligible(&self) -> bool {
        (2..=7).contains(&self.number())
    }

    /// Stage 8 requires a human decision on every run, flagged or not.
    pub fn is_final_gate(&self) -> bool {
        matches!(self, Stage::FinalApproval)
    }

    /// Stage 9 runs only as a consequence of approval at stage 8.
    pub fn is_payment(&self) -> bool {
        matches!(self, Stage::PaymentRelease)
    }

    /// The following stage, if any.
    pub fn next(&self) -> Option<Stage> {
        Stage::from_number(self.number() + 1)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.number())
    }
}

/// Status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
    WaitingApproval,
    Error,
}

/// Status of the workflow as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    NotStarted,
    InProgress,
    NeedsApproval,
    AwaitingFinalApproval,
    Completed,
    Rejected,
    Error,
}

impl OverallStatus {
    /// Rejected and Error admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OverallStatus::Completed | OverallStatus::Rejected | OverallStatus::Error
        )
    }
}

/// Governs auto-advance behavior between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Advance through consecutive clean steps automatically.
    All,
    /// Stop after each step; the caller drives advancement.
    Step,
}

/// Reported outcome of one external check invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResultStatus {
    Success,
    Error,
}

/// Structured response from the external check for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepResultStatus,
    #[serde(default)]
    pub agent_notes: Vec<String>,
    #[serde(default)]
    pub result_data: serde_json::Value,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            status: StepResultStatus::Success,
            agent_notes: vec![],
            result_data: serde_json::Value::Null,
            flagged: false,
            flag_reason: None,
            execution_time_ms: 0,
        }
    }

    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            flagged: true,
            flag_reason: Some(reason.into()),
            ..Self::success()
        }
    }

    pub fn error(note: impl Into<String>) -> Self {
        Self {
            status: StepResultStatus::Error,
            agent_notes: vec![note.into()],
            ..Self::success()
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.agent_notes = notes;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.result_data = data;
        self
    }
}

/// Tracked state of one pipeline step within an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub stage: Stage,
    pub status: StepStatus,
    /// Human-readable findings, append-only per execution.
    #[serde(default)]
    pub agent_notes: Vec<String>,
    /// Opaque payload from the external check; the engine only reads `flagged`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<serde_json::Value>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl StepState {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: StepStatus::NotStarted,
            agent_notes: vec![],
            result_data: None,
            flagged: false,
            flag_reason: None,
            execution_time_ms: None,
        }
    }

    /// Fold an execution result into this step without deciding the
    /// resulting status; the orchestrator owns status transitions.
    pub fn absorb(&mut self, result: &StepResult) {
        self.agent_notes.extend(result.agent_notes.iter().cloned());
        self.result_data = Some(result.result_data.clone());
        self.flagged = result.flagged;
        self.flag_reason = result.flag_reason.clone();
        self.execution_time_ms = Some(result.execution_time_ms);
    }
}

/// The workflow state for one requisition, exclusively owned by the
/// orchestrator managing that document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub document_id: DocumentId,
    pub variant: ProcurementVariant,
    /// The next or active stage. Monotonically non-decreasing while the
    /// workflow is not rejected or errored.
    pub current_step: Stage,
    pub run_mode: RunMode,
    pub overall_status: OverallStatus,
    /// Always nine entries, fixed order, never reordered.
    pub steps: Vec<StepState>,
    /// Stale-response token: bumped on every run/reset/reconcile so a slow
    /// executor response for a superseded execution is discarded.
    #[serde(skip)]
    pub generation: u64,
    /// Generation that currently has an executor call outstanding, if any.
    /// At most one call may be in flight per document.
    #[serde(skip)]
    pub in_flight: Option<u64>,
}

impl PartialEq for WorkflowInstance {
    /// Equality over the observable workflow state. The generation stamp
    /// is a local in-flight token, not part of the state itself.
    fn eq(&self, other: &Self) -> bool {
        self.document_id == other.document_id
            && self.variant == other.variant
            && self.current_step == other.current_step
            && self.run_mode == other.run_mode
            && self.overall_status == other.overall_status
            && self.steps == other.steps
    }
}

impl WorkflowInstance {
    pub fn new(document_id: DocumentId, variant: ProcurementVariant) -> Self {
        Self {
            document_id,
            variant,
            current_step: Stage::Validation,
            run_mode: RunMode::All,
            overall_status: OverallStatus::NotStarted,
            steps: Stage::ALL.iter().map(|s| StepState::new(*s)).collect(),
            generation: 0,
            in_flight: None,
        }
    }

    pub fn step(&self, stage: Stage) -> &StepState {
        &self.steps[(stage.number() - 1) as usize]
    }

    pub fn step_mut(&mut self, stage: Stage) -> &mut StepState {
        &mut self.steps[(stage.number() - 1) as usize]
    }

    /// Earliest step currently waiting on a human decision, if any.
    pub fn waiting_step(&self) -> Option<Stage> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::WaitingApproval)
            .map(|s| s.stage)
    }
}

/// Human decision on a paused step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
    Hold,
}

/// Transient command carrying a human decision; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub target_step: Stage,
    pub decision: Decision,
}

/// Kind tag on an advisory stream message. Unknown kinds are carried
/// through as `Other` and dropped by the dispatch filter, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    AgentUpdate,
    WorkflowStatus,
    #[serde(untagged)]
    Other(String),
}

/// Ephemeral progress notification from the advisory stream.
///
/// Purely cosmetic: lost or duplicated messages never affect correctness,
/// and the orchestrator never bases a transition on one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActivityEvent {
    pub workflow_id: String,
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Authoritative server snapshot of a workflow's position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub current_step: u8,
    pub step_status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

/// Document attributes relevant to reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub variant: ProcurementVariant,
    /// Some documents carry their pipeline position directly; used as a
    /// degraded fallback when no workflow snapshot exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u8>,
}

/// Workflow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A run loop started for a document.
    RunStarted { document_id: DocumentId, start_step: Stage },
    /// A step began executing.
    StepStarted { document_id: DocumentId, stage: Stage },
    /// A step finished cleanly.
    StepCompleted { document_id: DocumentId, stage: Stage, flagged: bool },
    /// A step paused for a human decision.
    ApprovalRequested { document_id: DocumentId, stage: Stage, reason: Option<String> },
    /// A human decision was applied.
    ApprovalResolved { document_id: DocumentId, stage: Stage, decision: Decision },
    /// The run loop stopped without finishing the pipeline.
    RunHalted { document_id: DocumentId, status: OverallStatus },
    /// A step failed and the instance halted.
    RunFailed { document_id: DocumentId, stage: Stage, error: String },
    /// The pipeline reached the end of stage 9.
    WorkflowCompleted { document_id: DocumentId },
}
