use std::sync::Arc;

use async_trait::async_trait;
use drops_core::{
    diff_delete, diff_droplets, translate_droplet, validate_droplet, withhold_invalid, Action, ActionSet, Category,
    DesiredCompute, ObservedCompute, Privileges, ResourceId, ResourceKind, ValidationError, VolumeNameIndex,
};
use drops_provider::{Cancel, DropletAction, Provider, ProviderError};
use tracing::{debug, info};

use crate::{ActionError, Change, Interrupted, ObjectReconciler, RunReport};

/// Droplet half of the pass.
///
/// The diff yields resize, rebuild, detach and attach actions per droplet. Only
/// resize and rebuild are executed here; [`attachment_actions`](Self::attachment_actions)
/// hands the rest to the volume side.
pub struct ComputeReconciler {
    provider: Arc<dyn Provider>,
    privileges: Privileges,
    desired: Vec<DesiredCompute>,
    observed: Vec<ObservedCompute>,
    volumes: VolumeNameIndex,
    creates: Vec<DesiredCompute>,
    updates: ActionSet,
    rejected: Vec<(ResourceId, ValidationError)>,
    deletes: Vec<ObservedCompute>,
}

impl ComputeReconciler {
    pub fn new(provider: Arc<dyn Provider>, privileges: Privileges, desired: Vec<DesiredCompute>) -> Self {
        Self {
            provider,
            privileges,
            desired,
            observed: Vec::new(),
            volumes: VolumeNameIndex::default(),
            creates: Vec::new(),
            updates: ActionSet::new(),
            rejected: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Index used to resolve volume names by the next `diff` and by creates.
    pub fn use_volume_index(&mut self, index: VolumeNameIndex) {
        debug!("droplet reconciler resolving against {} volume name(s)", index.len());
        self.volumes = index;
    }

    pub fn creates(&self) -> &[DesiredCompute] {
        &self.creates
    }

    /// Every pending per-droplet action, attachments included.
    pub fn updates(&self) -> &ActionSet {
        &self.updates
    }

    /// Existing droplets whose desired entry failed validation; none of their actions run.
    pub fn rejected(&self) -> &[(ResourceId, ValidationError)] {
        &self.rejected
    }

    pub fn deletes(&self) -> &[ObservedCompute] {
        &self.deletes
    }

    /// Attach/detach actions keyed by droplet ID, for the volume reconciler to execute.
    pub fn attachment_actions(&self) -> ActionSet {
        self.updates.filtered(Action::is_attachment)
    }
}

fn droplet_action(action: &Action) -> Option<DropletAction<'_>> {
    match action {
        Action::ResizeDroplet { size } => Some(DropletAction::Resize { size }),
        Action::Rebuild { image } => Some(DropletAction::Rebuild { image }),
        _ => None,
    }
}

#[async_trait]
impl ObjectReconciler for ComputeReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Droplet
    }

    async fn snapshot(&mut self, cancel: &Cancel) -> Result<(), ProviderError> {
        self.observed = self.provider.list_compute(cancel).await?;
        info!("observed {} droplet(s)", self.observed.len());
        Ok(())
    }

    fn diff(&mut self) {
        let out = diff_droplets(&self.desired, &self.observed, &self.volumes);
        self.creates = out.create;
        self.updates = out.updates;
        self.rejected = withhold_invalid(&self.desired, &self.observed, &mut self.updates, validate_droplet);
        self.deletes = diff_delete(&self.desired, &self.observed);
        for (id, actions) in self.updates.iter() {
            for action in actions {
                debug!("{id}: {action}");
            }
        }
        info!(
            "droplets: {} to create, {} to update, {} invalid, {} to delete",
            self.creates.len(),
            self.updates.len(),
            self.rejected.len(),
            self.deletes.len()
        );
    }

    async fn apply_creates(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted> {
        if !report.admit(&self.privileges, Category::Create, ResourceKind::Droplet, self.creates.len()) {
            return Ok(());
        }
        for droplet in &self.creates {
            let result = match translate_droplet(droplet, &self.volumes) {
                Ok(request) => self
                    .provider
                    .create_compute(cancel, &request)
                    .await
                    .map_err(ActionError::from),
                Err(e) => Err(e.into()),
            };
            report.record(Change::Create, format!("droplet {}", droplet.name), "create", result)?;
        }
        Ok(())
    }

    async fn apply_updates(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted> {
        let updates = self.updates.filtered(|a| !a.is_attachment());
        let pending = updates.len() + self.rejected.len();
        if !report.admit(&self.privileges, Category::Update, ResourceKind::Droplet, pending) {
            return Ok(());
        }
        for (id, error) in &self.rejected {
            report.record(Change::Update, id, "update", Err(error.clone().into()))?;
        }
        for (id, actions) in updates.iter() {
            let Some(droplet_id) = id.as_droplet() else {
                continue;
            };
            for action in actions {
                let Some(request) = droplet_action(action) else {
                    continue;
                };
                let result = self
                    .provider
                    .act_on_compute(cancel, droplet_id, request)
                    .await
                    .map_err(ActionError::from);
                report.record(Change::Update, id, action, result)?;
            }
        }
        Ok(())
    }

    async fn apply_deletes(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted> {
        if !report.admit(&self.privileges, Category::Delete, ResourceKind::Droplet, self.deletes.len()) {
            return Ok(());
        }
        for droplet in &self.deletes {
            let result = self
                .provider
                .delete_compute(cancel, droplet.id)
                .await
                .map_err(ActionError::from);
            report.record(Change::Delete, ResourceId::Droplet(droplet.id), "delete", result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drops_provider::{Call, InMemoryProvider, Operation};

    fn observed(id: u64, name: &str, size: &str, image: &str, volumes: &[&str]) -> ObservedCompute {
        ObservedCompute {
            id,
            name: name.into(),
            size_slug: Some(size.into()),
            image_slug: Some(image.into()),
            volume_ids: volumes.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn desired(name: &str, size: &str, image: &str, volumes: &[&str]) -> DesiredCompute {
        DesiredCompute {
            name: name.into(),
            region: "nyc3".into(),
            size: size.into(),
            image: image.into(),
            volumes: volumes.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn diffed(provider: &Arc<InMemoryProvider>, desired: Vec<DesiredCompute>, index: VolumeNameIndex) -> ComputeReconciler {
        let mut r = ComputeReconciler::new(provider.clone(), Privileges::all(), desired);
        r.snapshot(&Cancel::never()).await.unwrap();
        r.use_volume_index(index);
        r.diff();
        r
    }

    #[tokio::test]
    async fn updates_run_resize_and_rebuild_but_not_attachments() {
        let provider = Arc::new(InMemoryProvider::new().with_droplets([observed(1, "db", "s-1", "ubuntu", &["A"])]));
        let index: VolumeNameIndex = [("b".to_string(), "B".to_string())].into_iter().collect();
        let mut r = diffed(&provider, vec![desired("db", "s-2", "debian", &["b"])], index).await;
        let mut report = RunReport::default();

        r.apply_updates(&Cancel::never(), &mut report).await.unwrap();

        assert_eq!(
            provider.calls()[1..],
            [
                Call::ResizeCompute { id: 1, size: "s-2".into() },
                Call::RebuildCompute { id: 1, image: "debian".into() },
            ]
        );
        assert_eq!(report.updated, 2);
        let handoff = r.attachment_actions();
        assert_eq!(handoff.action_count(), 2);
        assert!(handoff.get(&ResourceId::Droplet(1)).is_some_and(|a| a.iter().all(Action::is_attachment)));
    }

    #[tokio::test]
    async fn create_with_missing_image_is_skipped() {
        let provider = Arc::new(InMemoryProvider::new());
        let mut r = diffed(
            &provider,
            vec![desired("web-3", "s-1", "", &[]), desired("web-4", "s-1", "ubuntu", &[])],
            VolumeNameIndex::default(),
        )
        .await;
        let mut report = RunReport::default();

        r.apply_creates(&Cancel::never(), &mut report).await.unwrap();

        assert_eq!(provider.calls(), vec![Call::ListCompute, Call::CreateCompute("web-4".into())]);
        assert!(matches!(
            report.failures[0].error,
            ActionError::Validation(ValidationError::MissingField { field: "image", .. })
        ));
    }

    #[tokio::test]
    async fn provider_failure_on_one_delete_does_not_stop_the_next() {
        let provider = Arc::new(
            InMemoryProvider::new().with_droplets([observed(1, "a", "s", "u", &[]), observed(2, "b", "s", "u", &[])]),
        );
        let mut r = diffed(&provider, vec![], VolumeNameIndex::default()).await;
        provider.fail(Operation::DeleteCompute, 500);
        let mut report = RunReport::default();

        r.apply_deletes(&Cancel::never(), &mut report).await.unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(
            provider.operations(),
            vec![Operation::ListCompute, Operation::DeleteCompute, Operation::DeleteCompute]
        );
    }
}
