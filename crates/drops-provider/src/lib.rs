//! Provider side of the reconciler: the remote inventory API, its retry
//! policy, and the cancellation signal every call observes.

pub mod cancel;
pub mod digitalocean;
pub mod error;
pub mod memory;
pub mod provider;
pub mod retry;

pub use cancel::*;
pub use digitalocean::*;
pub use error::*;
pub use memory::*;
pub use provider::*;
pub use retry::*;
