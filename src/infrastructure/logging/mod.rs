pub mod operation_log;

pub use operation_log::OperationLog;
