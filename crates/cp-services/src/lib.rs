//! cp-services: the task lifecycle and settlement pipeline.
//!
//! Ledger, execution engine, submission gateway, orchestrator and
//! reconciler. The daemon constructs each once and injects them.

pub mod chain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod reconcile;
pub mod runtime;
mod schema;

pub use chain::{HttpSettlementClient, SettlementEvent, SettlementLayer};
pub use engine::{ExecutionEngine, JobHandle, Slot};
pub use error::{
    ChainError, EngineError, LedgerError, LedgerResult, ProviderError, ProviderResult,
    SubmissionError,
};
pub use gateway::SubmissionGateway;
pub use ledger::{Ledger, SettlementRecord};
pub use orchestrator::{Orchestrator, ProviderResources, TaskView};
pub use reconcile::{CycleReport, Reconciler};
pub use runtime::{CommandRuntime, ContainerRuntime};
