//! settle command line: argument parsing and per-server orchestration.

pub mod app;
pub mod commands;
pub mod error;
pub mod logging;
