//! # repoflow - safe git workflows for configured repositories
//!
//! `repoflow` drives the everyday git routine of a feature branch (pull the
//! base branch, switch to the feature branch, rebase it, commit and push)
//! for repositories listed in a configuration file. Every operation keeps
//! uncommitted work safe by stashing around branch switches, suspends on
//! conflicts instead of failing, and is appended to a daily JSON-lines log.
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "base_path": "/home/me/src",
//!   "sections": {
//!     "work": {
//!       "description": "Client work",
//!       "configs": [
//!         { "number": 1, "repo": "api", "base_branch": "main",
//!           "feature_branch": "feature/TCK-1", "task": "TCK-1" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! ```bash
//! repoflow -s work -n 1 flow
//! repoflow -s work -n 1 reset --yes
//! repoflow logs
//! ```
//!
//! ## Architecture
//!
//! - [`domain`]: targets, branch names, results and log records
//! - [`application`]: one manager per operation family and the workflow orchestrator
//! - [`infrastructure`]: git process runner, output classification, config and the operation log
//! - [`presentation`]: CLI, interactive menu and terminal rendering
//! - [`common`]: error type and result helpers
//!
//! ## Using the Library
//!
//! ```rust,no_run
//! use repoflow::application::workflow::{OperationRequest, WorkflowOrchestrator};
//! use repoflow::domain::entities::repository_target::RepositoryTarget;
//! use repoflow::infrastructure::logging::OperationLog;
//! use repoflow::infrastructure::process::{CancellationSource, GitProcessRunner};
//! use std::sync::Arc;
//!
//! # async fn example() -> repoflow::Result<()> {
//! let log = Arc::new(OperationLog::open("/tmp/repoflow-logs")?);
//! let cancellation = CancellationSource::new();
//! let runner = GitProcessRunner::new().with_cancellation(cancellation.clone());
//! let mut orchestrator = WorkflowOrchestrator::new(Arc::new(runner), log, cancellation);
//!
//! let target = RepositoryTarget::new("/home/me/src/api", "main")?
//!     .with_feature_branch("feature/TCK-1")?;
//! let result = orchestrator.dispatch(&target, OperationRequest::FullFlow).await;
//! println!("{}: {}", result.outcome, result.message);
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod application;
pub mod common;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use crate::common::error::RepoflowError;
pub use crate::common::result::RepoflowResult as Result;
