pub mod process_runner;

pub use process_runner::{
    CancellationSource,
    CommandInvocation,
    CommandResult,
    CommandStatus,
    GitProcessRunner,
    ProcessRunner,
    DEFAULT_TIMEOUT,
};
