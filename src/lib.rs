//! Facade over the reqflow workspace crates.
//!
//! The engine is exposed as library-level operations only: `run`,
//! `approve`, `reject`, `hold`, and `reconcile` on
//! [`WorkflowOrchestrator`], plus the advisory [`EventStreamClient`].

pub use reqflow_core::{
    config::{EngineConfig, StreamConfig},
    error::{Result, WorkflowError},
    event::EventBus,
    traits::{ActivityStream, RecordStore, StepAgent},
    types::*,
};
pub use reqflow_engine::{
    ActivityCallback, AgentExecutor, EventFilter, EventStreamClient, NextAction, Outcome,
    StatusSynchronizer, Subscription, WorkflowOrchestrator,
};
