//! Warden Core - Core data structures and trait definitions
//!
//! Defines the object-permission data model (targets, object references,
//! permissions, principals, grant records), the collaborator traits the grant
//! engines depend on, and the shared error, configuration and logging layers.

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tracing;
