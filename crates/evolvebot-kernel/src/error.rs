//! Kernel-specific error types.

use evolvebot_knowledge::KnowledgeError;
use evolvebot_wire::WireError;
use thiserror::Error;

/// Kernel error type wrapping the lower layers with startup context.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    /// The configuration cannot describe a runnable node.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The universe failed to start.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
