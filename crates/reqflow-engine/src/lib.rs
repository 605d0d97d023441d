//! Workflow orchestration engine for procure-to-pay requisitions.
//!
//! Drives a document through the fixed nine-stage pipeline of automated
//! checks with mandatory human approval gates, server-authoritative state
//! reconciliation, and an advisory progress stream.

pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod stream;
pub mod sync;
pub mod testing;

pub use executor::AgentExecutor;
pub use gate::{NextAction, Outcome};
pub use orchestrator::WorkflowOrchestrator;
pub use stream::{ActivityCallback, EventFilter, EventStreamClient, Subscription};
pub use sync::StatusSynchronizer;
