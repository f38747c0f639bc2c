//! 外部とのやり取り: git プロセス、ログファイル、設定ファイル
pub mod config;
pub mod git;
pub mod logging;
pub mod process;
