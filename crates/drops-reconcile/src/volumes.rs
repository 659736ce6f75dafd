use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use drops_core::{
    diff_delete, diff_volumes, translate_volume, validate_volume, withhold_invalid, Action, ActionSet, Category,
    DesiredVolume, ObservedVolume, Privileges, ResourceId, ResourceKind, ValidationError, VolumeNameIndex,
};
use drops_provider::{Cancel, Provider, ProviderError};
use tracing::{debug, info};

use crate::{ActionError, Change, Interrupted, ObjectReconciler, RunReport};

/// Volume half of the pass. Also executes attach/detach actions discovered by
/// the droplet diff, since those calls are addressed by volume ID.
pub struct VolumeReconciler {
    provider: Arc<dyn Provider>,
    privileges: Privileges,
    desired: Vec<DesiredVolume>,
    observed: Vec<ObservedVolume>,
    creates: Vec<DesiredVolume>,
    updates: ActionSet,
    rejected: Vec<(ResourceId, ValidationError)>,
    deletes: Vec<ObservedVolume>,
}

impl VolumeReconciler {
    pub fn new(provider: Arc<dyn Provider>, privileges: Privileges, desired: Vec<DesiredVolume>) -> Self {
        Self {
            provider,
            privileges,
            desired,
            observed: Vec::new(),
            creates: Vec::new(),
            updates: ActionSet::new(),
            rejected: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Name to ID over the latest snapshot.
    pub fn name_index(&self) -> VolumeNameIndex {
        VolumeNameIndex::from_volumes(&self.observed)
    }

    pub fn creates(&self) -> &[DesiredVolume] {
        &self.creates
    }

    pub fn updates(&self) -> &ActionSet {
        &self.updates
    }

    pub fn rejected(&self) -> &[(ResourceId, ValidationError)] {
        &self.rejected
    }

    pub fn deletes(&self) -> &[ObservedVolume] {
        &self.deletes
    }

    fn region_of(&self, id: &str) -> &str {
        self.observed
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.region.as_str())
            .unwrap_or_default()
    }

    /// Executes attach/detach actions keyed by droplet ID, under the update privilege.
    ///
    /// Every detach runs before any attach, so a volume moving between droplets
    /// is free by the time its new holder asks for it.
    pub async fn apply_attachments(
        &mut self,
        attachments: &ActionSet,
        cancel: &Cancel,
        report: &mut RunReport,
    ) -> Result<(), Interrupted> {
        let pending = affected_volumes(attachments);
        if !report.admit(&self.privileges, Category::Update, ResourceKind::Volume, pending) {
            return Ok(());
        }
        info!(
            "applying {} attachment change(s) across {pending} volume(s)",
            attachments.action_count()
        );
        for detaching in [true, false] {
            for (id, actions) in attachments.iter() {
                let Some(droplet_id) = id.as_droplet() else {
                    if detaching {
                        debug!("ignoring attachment actions keyed by {id}");
                    }
                    continue;
                };
                for action in actions {
                    let (change, result) = match action {
                        Action::Detach { volume_id } if detaching => {
                            let result = self
                                .provider
                                .detach_volume(cancel, volume_id, droplet_id)
                                .await
                                .map_err(ActionError::from);
                            (Change::Detach, result)
                        }
                        Action::Attach { volume } if !detaching => {
                            let result = match &volume.id {
                                Some(volume_id) => self
                                    .provider
                                    .attach_volume(cancel, volume_id, droplet_id)
                                    .await
                                    .map_err(ActionError::from),
                                None => Err(ActionError::VolumeNotFound(volume.name.clone())),
                            };
                            (Change::Attach, result)
                        }
                        _ => continue,
                    };
                    report.record(change, id, action, result)?;
                }
            }
        }
        Ok(())
    }
}

/// Distinct volumes touched by attach or detach actions. Unresolved attach
/// targets count by name.
fn affected_volumes(attachments: &ActionSet) -> usize {
    let mut volumes = BTreeSet::new();
    for (_, actions) in attachments.iter() {
        for action in actions {
            match action {
                Action::Detach { volume_id } => volumes.insert(volume_id.as_str()),
                Action::Attach { volume } => volumes.insert(volume.id.as_deref().unwrap_or(&volume.name)),
                _ => false,
            };
        }
    }
    volumes.len()
}

#[async_trait]
impl ObjectReconciler for VolumeReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    async fn snapshot(&mut self, cancel: &Cancel) -> Result<(), ProviderError> {
        self.observed = self.provider.list_volumes(cancel).await?;
        info!("observed {} volume(s)", self.observed.len());
        Ok(())
    }

    fn diff(&mut self) {
        let out = diff_volumes(&self.desired, &self.observed);
        self.creates = out.create;
        self.updates = out.updates;
        self.rejected = withhold_invalid(&self.desired, &self.observed, &mut self.updates, validate_volume);
        self.deletes = diff_delete(&self.desired, &self.observed);
        info!(
            "volumes: {} to create, {} to update, {} invalid, {} to delete",
            self.creates.len(),
            self.updates.len(),
            self.rejected.len(),
            self.deletes.len()
        );
    }

    async fn apply_creates(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted> {
        if !report.admit(&self.privileges, Category::Create, ResourceKind::Volume, self.creates.len()) {
            return Ok(());
        }
        for volume in &self.creates {
            let result = match translate_volume(volume) {
                Ok(request) => self
                    .provider
                    .create_volume(cancel, &request)
                    .await
                    .map_err(ActionError::from),
                Err(e) => Err(e.into()),
            };
            report.record(Change::Create, format!("volume {}", volume.name), "create", result)?;
        }
        Ok(())
    }

    async fn apply_updates(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted> {
        let pending = self.updates.len() + self.rejected.len();
        if !report.admit(&self.privileges, Category::Update, ResourceKind::Volume, pending) {
            return Ok(());
        }
        for (id, error) in &self.rejected {
            report.record(Change::Update, id, "update", Err(error.clone().into()))?;
        }
        for (id, actions) in self.updates.iter() {
            let Some(volume_id) = id.as_volume() else {
                continue;
            };
            for action in actions {
                let Action::ResizeVolume { size_gigabytes } = action else {
                    debug!("{id}: {action} is not a volume update");
                    continue;
                };
                let result = self
                    .provider
                    .resize_volume(cancel, volume_id, self.region_of(volume_id), *size_gigabytes)
                    .await
                    .map_err(ActionError::from);
                report.record(Change::Update, id, action, result)?;
            }
        }
        Ok(())
    }

    async fn apply_deletes(&mut self, cancel: &Cancel, report: &mut RunReport) -> Result<(), Interrupted> {
        if !report.admit(&self.privileges, Category::Delete, ResourceKind::Volume, self.deletes.len()) {
            return Ok(());
        }
        for volume in &self.deletes {
            let result = self
                .provider
                .delete_volume(cancel, &volume.id)
                .await
                .map_err(ActionError::from);
            report.record(Change::Delete, ResourceId::Volume(volume.id.clone()), "delete", result)?;
        }
        Ok(())
    }
}
