use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use reqflow_core::error::{Result, WorkflowError};
use reqflow_core::traits::StepAgent;
use reqflow_core::types::{DocumentId, ProcurementVariant, Stage, StepResult};

/// Bounded-timeout wrapper around the external check boundary.
///
/// The orchestrator guarantees at most one outstanding call per document;
/// this adapter guarantees the call itself is bounded and that a malformed
/// response surfaces as an error instead of leaking into the state machine.
pub struct AgentExecutor {
    agent: Arc<dyn StepAgent>,
    timeout_secs: u64,
}

impl AgentExecutor {
    pub fn new(agent: Arc<dyn StepAgent>) -> Self {
        let timeout_secs = agent.timeout_secs();
        Self { agent, timeout_secs }
    }

    /// Override the per-call timeout (config beats the trait default).
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Invoke the check for one stage. Never retries.
    pub async fn execute(
        &self,
        stage: Stage,
        document_id: &DocumentId,
        variant: ProcurementVariant,
    ) -> Result<StepResult> {
        debug!(stage = %stage, document_id = %document_id, agent = stage.agent(variant), "Executing step");

        let timeout = Duration::from_secs(self.timeout_secs);
        let result = match tokio::time::timeout(
            timeout,
            self.agent.execute(stage, document_id, variant),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(stage = %stage, error = %e, "Step agent failed");
                return Err(match e {
                    e @ (WorkflowError::AgentExecution { .. } | WorkflowError::AgentTimeout { .. }) => e,
                    other => WorkflowError::AgentExecution {
                        stage,
                        message: other.to_string(),
                    },
                });
            }
            Err(_) => {
                warn!(stage = %stage, timeout_secs = self.timeout_secs, "Step agent timed out");
                return Err(WorkflowError::AgentTimeout {
                    stage,
                    timeout_secs: self.timeout_secs,
                });
            }
        };

        // A flag with no reason is a malformed response, not a pause.
        if result.flagged && result.flag_reason.is_none() {
            return Err(WorkflowError::AgentExecution {
                stage,
                message: "check flagged the step without a flag_reason".into(),
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    struct SlowAgent;

    impl StepAgent for SlowAgent {
        fn execute(
            &self,
            _stage: Stage,
            _document_id: &DocumentId,
            _variant: ProcurementVariant,
        ) -> BoxFuture<'_, Result<StepResult>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StepResult::success())
            })
        }

        fn timeout_secs(&self) -> u64 {
            30
        }
    }

    struct MalformedAgent;

    impl StepAgent for MalformedAgent {
        fn execute(
            &self,
            _stage: Stage,
            _document_id: &DocumentId,
            _variant: ProcurementVariant,
        ) -> BoxFuture<'_, Result<StepResult>> {
            Box::pin(async {
                Ok(StepResult {
                    flagged: true,
                    flag_reason: None,
                    ..StepResult::success()
                })
            })
        }
    }

    #[tokio::test]
    async fn timeout_surfaces_as_agent_timeout() {
        // Zero-second bound: the deadline elapses on the first poll.
        let executor = AgentExecutor::new(Arc::new(SlowAgent)).with_timeout(0);
        let err = executor
            .execute(Stage::BudgetCheck, &DocumentId::new(), ProcurementVariant::Goods)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::AgentTimeout { stage: Stage::BudgetCheck, timeout_secs: 0 }
        ));
    }

    #[tokio::test]
    async fn flag_without_reason_is_malformed() {
        let executor = AgentExecutor::new(Arc::new(MalformedAgent));
        let err = executor
            .execute(Stage::FraudScreen, &DocumentId::new(), ProcurementVariant::Goods)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AgentExecution { stage: Stage::FraudScreen, .. }));
    }
}
