pub mod orchestrator;

pub use orchestrator::{OperationCode, OperationRequest, WorkflowOrchestrator};
