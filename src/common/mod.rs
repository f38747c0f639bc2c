//! Shared error and result types.

pub mod error;
pub mod result;

pub use error::RepoflowError;
pub use result::{OptionExt, RepoflowResult};
