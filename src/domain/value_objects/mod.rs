pub mod branch_name;

pub use branch_name::{BranchName, BranchNameError, NameRule};
