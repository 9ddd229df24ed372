//! Dual GCRA rate limiting: one global bucket and one bucket per remote node.
//!
//! Exceeding either limit rejects the single request; the connection it came
//! in on stays open.

use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;
use tracing::warn;

/// Per-minute rates and burst allowances.
///
/// A rate of `0` disables that limiter. A burst of `0` means "burst equals the
/// per-minute rate".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_min: u32,
    pub burst: u32,
    pub per_min_by_node: u32,
    pub burst_by_node: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_min: 60,
            burst: 10,
            per_min_by_node: 30,
            burst_by_node: 5,
        }
    }
}

/// Which limiter rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Node,
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Node => f.write_str("per-node"),
        }
    }
}

/// A request was rejected by a rate limiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit exceeded ({scope})")]
pub struct RateLimitError {
    pub scope: RateLimitScope,
    pub node_id: String,
}

fn quota(per_min: u32, burst: u32) -> Option<Quota> {
    let rate = NonZeroU32::new(per_min)?;
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    Some(Quota::per_minute(rate).allow_burst(burst))
}

/// Global + per-node token buckets.
pub struct DualRateLimiter {
    global: Option<DefaultDirectRateLimiter>,
    by_node: Option<DefaultKeyedRateLimiter<String>>,
}

impl DualRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: quota(config.per_min, config.burst).map(RateLimiter::direct),
            by_node: quota(config.per_min_by_node, config.burst_by_node).map(RateLimiter::keyed),
        }
    }

    /// Spend one request from the global bucket, then from `node_id`'s bucket.
    pub fn check(&self, node_id: &str) -> Result<(), RateLimitError> {
        if let Some(global) = &self.global {
            if global.check().is_err() {
                warn!(node_id, "Global rate limit exceeded");
                return Err(RateLimitError {
                    scope: RateLimitScope::Global,
                    node_id: node_id.to_string(),
                });
            }
        }
        if let Some(by_node) = &self.by_node {
            if by_node.check_key(&node_id.to_string()).is_err() {
                warn!(node_id, "Per-node rate limit exceeded");
                return Err(RateLimitError {
                    scope: RateLimitScope::Node,
                    node_id: node_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Drop per-node buckets that have fully refilled.
    pub fn retain_recent(&self) {
        if let Some(by_node) = &self.by_node {
            by_node.retain_recent();
            by_node.shrink_to_fit();
        }
    }
}
