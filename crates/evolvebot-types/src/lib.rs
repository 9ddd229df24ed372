//! Core types and traits for the evolvebot universe node.
//!
//! This crate defines the shared data structures used by the wire protocol,
//! the knowledge subsystem, and the kernel. It contains no business logic.

pub mod capability;
pub mod config;
pub mod knowledge;
pub mod model;
pub mod shutdown;

use std::path::PathBuf;

/// Root directory for evolvebot state (`~/.evolvebot`).
///
/// Falls back to `./.evolvebot` when no home directory can be resolved.
pub fn evolvebot_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".evolvebot"))
        .unwrap_or_else(|| PathBuf::from(".evolvebot"))
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
