//! アプリケーション層: マネージャーとワークフロー
pub mod managers;
pub mod workflow;
