pub mod conflict;
pub mod operation;
pub mod operation_record;
pub mod repository_target;

pub use conflict::{ConflictChoice, ConflictOrigin, ConflictState};
pub use operation::{FailureKind, OperationKind, OperationResult, OperationStatus, Outcome};
pub use operation_record::OperationRecord;
pub use repository_target::{RepositoryTarget, TargetMetadata};
