//! Reconciliation of a DigitalOcean inventory against a declared desired state.
//!
//! [`Orchestrator::run`] performs one two-phase pass: volumes, then droplets,
//! then the volume work that depends on droplets (deletes, attach/detach).

pub mod compute;
pub mod config;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod reconciler;
pub mod report;
pub mod volumes;

pub use compute::*;
pub use config::*;
pub use error::*;
pub use loader::*;
pub use orchestrator::*;
pub use reconciler::*;
pub use report::*;
pub use volumes::*;
