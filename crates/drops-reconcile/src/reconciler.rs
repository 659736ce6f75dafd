use async_trait::async_trait;
use drops_core::ResourceKind;
use drops_provider::{Cancel, ProviderError};

use crate::{Interrupted, RunReport};

/// One resource kind's half of a pass.
///
/// `snapshot` replaces the observed inventory; `diff` recomputes the pending
/// create, update and delete work from it. Each `apply_*` runs one category
/// behind the privilege gate, records per-resource outcomes in the report, and
/// only returns early on cancellation.
#[async_trait]
pub trait ObjectReconciler: Send {
    fn kind(&self) -> ResourceKind;

    async fn snapshot(&mut self, cancel: &Cancel) -> Result<(), ProviderError>;

    fn diff(&mut self);

    async fn apply_creates(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted>;

    async fn apply_updates(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted>;

    async fn apply_deletes(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted>;
}
