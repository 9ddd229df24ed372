//! Universe kernel for an evolvebot node.
//!
//! Loads configuration, builds what the node advertises, and supervises the
//! long-running tasks: node endpoint, relay client, registration session, and
//! knowledge publish loop.

pub mod advertise;
pub mod capabilities;
pub mod config;
pub mod driver;
pub mod error;
pub mod service;
pub mod universe;

pub use config::load_config;
pub use driver::OpenAiCompatDriver;
pub use error::{KernelError, KernelResult};
pub use service::ChatService;
pub use universe::{registry_client, start_universe, UniverseHandle};
