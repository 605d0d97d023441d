//! In-memory fakes for the engine's trait seams, shared by unit and
//! integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use futures::future::BoxFuture;

use reqflow_core::error::{Result, WorkflowError};
use reqflow_core::traits::{RecordStore, StepAgent};
use reqflow_core::types::{
    DocumentId, DocumentRecord, ProcurementVariant, Stage, StepResult, WorkflowSnapshot,
};

/// Step agent serving scripted per-stage results.
///
/// Unscripted stages return a clean success. A stage can be gated on a
/// [`tokio::sync::Notify`] so a test can hold a response in flight.
pub struct ScriptedAgent {
    results: Mutex<HashMap<Stage, StepResult>>,
    invocations: Mutex<Vec<Stage>>,
    gate: Option<(Stage, Arc<tokio::sync::Notify>)>,
}

impl ScriptedAgent {
    pub fn all_clean() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Script the result returned for one stage.
    pub fn with_result(self, stage: Stage, result: StepResult) -> Self {
        self.results.lock().unwrap().insert(stage, result);
        self
    }

    /// Block the response for `stage` until the returned handle is
    /// notified.
    pub fn with_gate(mut self, stage: Stage) -> (Self, Arc<tokio::sync::Notify>) {
        let release = Arc::new(tokio::sync::Notify::new());
        self.gate = Some((stage, release.clone()));
        (self, release)
    }

    /// Stages executed so far, in order.
    pub fn invocations(&self) -> Vec<Stage> {
        self.invocations.lock().unwrap().clone()
    }
}

impl StepAgent for ScriptedAgent {
    fn execute(
        &self,
        stage: Stage,
        _document_id: &DocumentId,
        _variant: ProcurementVariant,
    ) -> BoxFuture<'_, Result<StepResult>> {
        self.invocations.lock().unwrap().push(stage);
        let result = self
            .results
            .lock()
            .unwrap()
            .get(&stage)
            .cloned()
            .unwrap_or_else(StepResult::success);
        let gate = match &self.gate {
            Some((gated, release)) if *gated == stage => Some(release.clone()),
            _ => None,
        };
        Box::pin(async move {
            if let Some(release) = gate {
                release.notified().await;
            }
            Ok(result)
        })
    }
}

/// Record store serving one fixed document and optional snapshot.
pub struct StaticStore {
    document: Option<DocumentRecord>,
    snapshot: Option<WorkflowSnapshot>,
}

impl StaticStore {
    /// A document with no workflow record yet.
    pub fn fresh(variant: ProcurementVariant) -> Self {
        Self {
            document: Some(DocumentRecord { variant, current_step: None }),
            snapshot: None,
        }
    }

    /// No such document at all.
    pub fn absent() -> Self {
        Self { document: None, snapshot: None }
    }

    pub fn with_snapshot(mut self, snapshot: WorkflowSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

impl RecordStore for StaticStore {
    fn fetch_document(&self, id: &DocumentId) -> BoxFuture<'_, Result<DocumentRecord>> {
        let doc = self.document.clone();
        let id = id.clone();
        Box::pin(async move {
            doc.ok_or_else(|| WorkflowError::NotFound(format!("document {}", id)))
        })
    }

    fn fetch_workflow(&self, _id: &DocumentId) -> BoxFuture<'_, Result<Option<WorkflowSnapshot>>> {
        let snap = self.snapshot.clone();
        Box::pin(async move { Ok(snap) })
    }
}
