//! プレゼンテーション層: CLI と端末表示
pub mod cli;
pub mod ui;
