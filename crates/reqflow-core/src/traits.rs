use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::*;

/// External check boundary: one opaque agent operation per stage.
///
/// The only true I/O seam in the engine. Implementations talk to whatever
/// backs the checks (fraud scoring, compliance rules, 3-way match); the
/// engine only sees the structured `StepResult`.
pub trait StepAgent: Send + Sync + 'static {
    /// Invoke the check serving `stage` for `document_id`.
    ///
    /// The variant selects which check serves stages 4 and 5; the contract
    /// shape is the same either way. Purely request/response, no other
    /// side effects.
    fn execute(
        &self,
        stage: Stage,
        document_id: &DocumentId,
        variant: ProcurementVariant,
    ) -> BoxFuture<'_, Result<StepResult>>;

    /// Timeout in seconds for one invocation.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// System-of-record boundary: authoritative workflow and document reads.
///
/// The synchronizer is the only component that touches this; server state
/// always wins over locally cached state on conflict.
pub trait RecordStore: Send + Sync + 'static {
    /// Fetch the document's attributes, or `NotFound`.
    fn fetch_document(&self, id: &DocumentId) -> BoxFuture<'_, Result<DocumentRecord>>;

    /// Fetch the authoritative workflow snapshot, `None` when the server
    /// has no workflow for this document yet.
    fn fetch_workflow(&self, id: &DocumentId) -> BoxFuture<'_, Result<Option<WorkflowSnapshot>>>;
}

/// Advisory stream transport: one persistent channel per workflow id.
pub trait ActivityStream: Send + Sync + 'static {
    /// Open a channel of progress notifications for `workflow_id`.
    /// The client reconnects through this same seam after a drop.
    fn connect(
        &self,
        workflow_id: &str,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<AgentActivityEvent>>>>;
}
