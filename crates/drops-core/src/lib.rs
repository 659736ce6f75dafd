//! Data model and pure reconciliation logic: diffing, attachment derivation,
//! privilege gating and create-request validation. No I/O lives here.

pub mod action;
pub mod diff;
pub mod gate;
pub mod model;
pub mod validate;

pub use action::*;
pub use diff::*;
pub use gate::*;
pub use model::*;
pub use validate::*;
