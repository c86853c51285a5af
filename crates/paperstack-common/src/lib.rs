//! Shared error types, retry policy, sandboxed HTTP client, and
//! configuration used across all paperstack crates.

pub mod config;
pub mod error;
pub mod retry;
pub mod sandbox;

pub use config::Config;
pub use error::PaperstackError;
pub use retry::RetryPolicy;
pub use sandbox::SandboxClient;
