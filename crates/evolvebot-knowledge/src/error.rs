//! Errors from the knowledge subsystem.
//!
//! None of these are fatal to the process: learning passes log and retry next
//! interval, the publish loop counts them toward quarantine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// A local pack file is missing `name`, `kind` or `content`, or is not JSON.
    #[error("Invalid pack file {path}: {reason}")]
    InvalidPack { path: PathBuf, reason: String },
    /// The registry rejected a publish or could not be reached for one.
    #[error("Publish failed: {0}")]
    Publish(String),
    /// Any other registry request failed.
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A learning pass failed; the policy retries on its next trigger.
    #[error("Learning failed: {0}")]
    Learning(String),
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
