//! Side-effecting adapters: configuration, model clients, execution, files.

pub mod attempt_log;
pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod signatures;
pub mod workspace;
