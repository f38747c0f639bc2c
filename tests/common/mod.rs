//! Common test utilities and helpers
//!
//! Integration tests run against real repositories built in a temporary
//! directory: a bare `remote.git`, a working clone and optional peer clones.

#![allow(dead_code)]

pub mod git_fixture;

pub use git_fixture::GitFixture;
