//! Knowledge packs: how a node learns from, and contributes to, the shared
//! registry.
//!
//! - `client`: HTTP registry client behind the [`KnowledgeRegistry`] trait
//! - `store`: local inbox of received packs plus its manifest
//! - `learning`: curiosity, task-driven, and review learning, daily digest
//! - `publish`: outbox drain with retry and quarantine

pub mod applied;
pub mod client;
pub mod digest;
pub mod error;
pub mod learning;
pub mod persist;
pub mod publish;
pub mod review;
pub mod state;
pub mod store;
pub mod tags;

pub use client::{KnowledgeRegistry, PublishRequest, RegistryClient};
pub use error::{KnowledgeError, KnowledgeResult};
pub use learning::{LearningManager, LearningSettings};
pub use publish::{PublishLoop, PublishLoopConfig, PublishReport, PublishState};
pub use state::LearningState;

/// Unix time in seconds with sub-second precision.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
