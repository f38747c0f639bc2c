pub mod output;
pub mod repository;

pub use repository::{GitRepository, REMOTE};
