//! Universe wire protocol — how a node talks to the registry, the relay, and
//! other nodes.
//!
//! Every connection is a WebSocket carrying JSON [`Envelope`]s.
//!
//! ## Architecture
//!
//! - **Envelope**: typed, immutable message wrapper (`message`)
//! - **Dispatcher**: token check, dual rate limiting, capability-gated task
//!   routing to a [`ServiceHandle`] (`dispatch`)
//! - **NodeServer**: direct inbound endpoint (`node`)
//! - **RelayClient**: outbound session to a relay for nodes without a public
//!   address (`relay`)
//! - **RegistrationSession**: register + heartbeat loop against the registry
//!   (`registration`)

pub mod backoff;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod node;
pub mod rate_limit;
pub mod registration;
pub mod relay;
pub mod ws;

pub use backoff::Backoff;
pub use dispatch::{Dispatcher, ServiceHandle};
pub use error::{ProtocolError, WireError, WireResult};
pub use message::{make_envelope, Envelope, EnvelopeType, Payload};
pub use node::{NodeServer, NodeServerConfig};
pub use rate_limit::{DualRateLimiter, RateLimitConfig, RateLimitError, RateLimitScope};
pub use registration::{RegistrationConfig, RegistrationSession, SessionState};
pub use relay::{RelayClient, RelayClientConfig};
