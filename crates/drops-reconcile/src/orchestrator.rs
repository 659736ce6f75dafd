//! One reconciliation pass over volumes and droplets.
//!
//! Volumes are created and resized first so droplets can reference them; volume
//! deletes and attach/detach changes wait until droplets have been reconciled.

use std::sync::Arc;
use std::time::Duration;

use drops_core::Named;
use drops_provider::{Cancel, Provider};
use tracing::info;

use crate::{
    ComputeReconciler, DesiredStateSource, ObjectReconciler, Plan, ReconcileError, RunReport, Stage, VolumeReconciler,
};

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    source: Box<dyn DesiredStateSource>,
    settle: Duration,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, source: Box<dyn DesiredStateSource>) -> Self {
        Self {
            provider,
            source,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Pause between the volume and droplet phases. Zero skips it.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn reconcilers(&self) -> Result<(VolumeReconciler, ComputeReconciler, drops_core::Privileges), ReconcileError> {
        let desired = self.source.load()?;
        info!(
            "desired state: {} droplet(s), {} volume(s), privileges {:?}",
            desired.droplets.len(),
            desired.volumes.len(),
            desired.privileges
        );
        let volumes = VolumeReconciler::new(self.provider.clone(), desired.privileges, desired.volumes);
        let compute = ComputeReconciler::new(self.provider.clone(), desired.privileges, desired.droplets);
        Ok((volumes, compute, desired.privileges))
    }

    /// Runs one full pass. Per-resource failures end up in the report; snapshot
    /// failures and cancellation end the run.
    pub async fn run(&self, cancel: &Cancel) -> Result<RunReport, ReconcileError> {
        let (mut volumes, mut compute, _) = self.reconcilers()?;
        let mut report = RunReport::default();

        snapshot(&mut volumes, cancel, Stage::VolumeSnapshot).await?;
        volumes.diff();
        volumes
            .apply_creates(cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::VolumeApply))?;
        volumes
            .apply_updates(cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::VolumeApply))?;

        settle(self.settle, cancel).await?;

        // Fresh volume IDs, including any created above, before droplets resolve names.
        snapshot(&mut volumes, cancel, Stage::ComputeSnapshot).await?;
        snapshot(&mut compute, cancel, Stage::ComputeSnapshot).await?;
        compute.use_volume_index(volumes.name_index());
        compute.diff();
        compute
            .apply_creates(cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::ComputeApply))?;
        compute
            .apply_updates(cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::ComputeApply))?;
        compute
            .apply_deletes(cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::ComputeApply))?;
        let attachments = compute.attachment_actions();

        snapshot(&mut volumes, cancel, Stage::VolumeResnapshot).await?;
        volumes.diff();
        volumes
            .apply_deletes(cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::VolumeDelete))?;
        volumes
            .apply_attachments(&attachments, cancel, &mut report)
            .await
            .map_err(|i| i.during(Stage::Attachments))?;

        info!("pass complete: {report}");
        Ok(report)
    }

    /// Snapshots and diffs both kinds without issuing any mutation.
    pub async fn plan(&self, cancel: &Cancel) -> Result<Plan, ReconcileError> {
        let (mut volumes, mut compute, privileges) = self.reconcilers()?;

        snapshot(&mut volumes, cancel, Stage::VolumeSnapshot).await?;
        volumes.diff();
        snapshot(&mut compute, cancel, Stage::ComputeSnapshot).await?;
        compute.use_volume_index(volumes.name_index());
        compute.diff();

        Ok(Plan {
            privileges,
            volume_creates: volumes.creates().iter().map(|v| v.name().to_string()).collect(),
            volume_updates: volumes.updates().clone(),
            volume_deletes: volumes.deletes().to_vec(),
            droplet_creates: compute.creates().iter().map(|d| d.name().to_string()).collect(),
            droplet_updates: compute.updates().clone(),
            droplet_deletes: compute.deletes().to_vec(),
            rejected: volumes.rejected().iter().chain(compute.rejected()).cloned().collect(),
        })
    }
}

async fn snapshot(reconciler: &mut dyn ObjectReconciler, cancel: &Cancel, stage: Stage) -> Result<(), ReconcileError> {
    let kind = reconciler.kind();
    reconciler.snapshot(cancel).await.map_err(|source| {
        if source.is_cancelled() {
            ReconcileError::Cancelled { stage }
        } else {
            ReconcileError::Snapshot { kind, source }
        }
    })
}

/// Waits `delay` for provider-side volume work to converge. Cancellation during
/// the wait aborts the run.
pub async fn settle(delay: Duration, cancel: &Cancel) -> Result<(), ReconcileError> {
    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled { stage: Stage::Settle });
    }
    if delay.is_zero() {
        return Ok(());
    }
    info!("settling for {}s", delay.as_secs_f64());
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled { stage: Stage::Settle }),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drops_provider::cancel_pair;

    #[tokio::test]
    async fn zero_delay_skips_the_wait() {
        settle(Duration::ZERO, &Cancel::never()).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_interrupts_the_wait() {
        let (handle, cancel) = cancel_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let err = settle(Duration::from_secs(3600), &cancel).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled { stage: Stage::Settle }));
    }

    #[tokio::test]
    async fn already_cancelled_fails_even_without_delay() {
        let (handle, cancel) = cancel_pair();
        handle.cancel();
        assert!(settle(Duration::ZERO, &cancel).await.is_err());
    }
}
