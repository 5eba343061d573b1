//! Snapscrub core library
//!
//! Schema drift detection, ephemeral database cloning, column scrubbing,
//! dump/compress/upload of sanitized snapshots and their import.

pub mod adapter;
pub mod cloner;
pub mod config;
pub mod domain;
pub mod drift;
pub mod error;
pub mod export;
pub mod hooks;
pub mod import;
pub mod pipeline;
pub mod process;
pub mod processor;
pub mod sql;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Settings;
pub use error::{CoreError, Result};
pub use import::{import_snapshot, ImportOutcome};
pub use pipeline::{sanitize_and_export, ExportOutcome, PipelineContext};
