pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, StreamConfig};
pub use error::{Result, WorkflowError};
pub use event::EventBus;
pub use types::*;
