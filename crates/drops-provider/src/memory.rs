use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use drops_core::{ComputeCreateRequest, ObservedCompute, ObservedVolume, VolumeCreateRequest};

use crate::{Cancel, CancelHandle, DropletAction, Provider, ProviderError};

/// Provider calls, by kind. Used to inject failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ListCompute,
    ListVolumes,
    CreateCompute,
    DeleteCompute,
    ActOnCompute,
    CreateVolume,
    DeleteVolume,
    ResizeVolume,
    AttachVolume,
    DetachVolume,
}

/// One recorded provider call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    ListCompute,
    ListVolumes,
    CreateCompute(String),
    DeleteCompute(u64),
    ResizeCompute { id: u64, size: String },
    RebuildCompute { id: u64, image: String },
    CreateVolume(String),
    DeleteVolume(String),
    ResizeVolume { id: String, size_gigabytes: u64 },
    AttachVolume { volume_id: String, droplet_id: u64 },
    DetachVolume { volume_id: String, droplet_id: u64 },
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Call::ListCompute => Operation::ListCompute,
            Call::ListVolumes => Operation::ListVolumes,
            Call::CreateCompute(_) => Operation::CreateCompute,
            Call::DeleteCompute(_) => Operation::DeleteCompute,
            Call::ResizeCompute { .. } | Call::RebuildCompute { .. } => Operation::ActOnCompute,
            Call::CreateVolume(_) => Operation::CreateVolume,
            Call::DeleteVolume(_) => Operation::DeleteVolume,
            Call::ResizeVolume { .. } => Operation::ResizeVolume,
            Call::AttachVolume { .. } => Operation::AttachVolume,
            Call::DetachVolume { .. } => Operation::DetachVolume,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::ListCompute | Call::ListVolumes)
    }
}

/// In-memory inventory for tests and dry runs. Applies calls the way the real
/// API would, records every call in order, and can be told to fail or to fire a
/// cancel handle after a given operation.
#[derive(Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

struct Failure {
    status: u16,
    skip: usize,
}

#[derive(Default)]
struct Inner {
    droplets: Vec<ObservedCompute>,
    volumes: Vec<ObservedVolume>,
    next_droplet: u64,
    next_volume: u64,
    calls: Vec<Call>,
    failing: HashMap<Operation, Failure>,
    cancel_after: Option<(Operation, CancelHandle)>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_droplets(self, droplets: impl IntoIterator<Item = ObservedCompute>) -> Self {
        self.lock().droplets.extend(droplets);
        self
    }

    pub fn with_volumes(self, volumes: impl IntoIterator<Item = ObservedVolume>) -> Self {
        self.lock().volumes.extend(volumes);
        self
    }

    /// Every later call of `operation` fails with `status`.
    pub fn fail(&self, operation: Operation, status: u16) {
        self.fail_after(operation, status, 0);
    }

    /// The next `skip` calls of `operation` succeed; every call after them fails with `status`.
    pub fn fail_after(&self, operation: Operation, status: u16, skip: usize) {
        self.lock().failing.insert(operation, Failure { status, skip });
    }

    /// Fires `handle` once the first call of `operation` has been applied.
    pub fn cancel_after(&self, operation: Operation, handle: CancelHandle) {
        self.lock().cancel_after = Some((operation, handle));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(Call::operation).collect()
    }

    pub fn droplets(&self) -> Vec<ObservedCompute> {
        self.lock().droplets.clone()
    }

    pub fn volumes(&self) -> Vec<ObservedVolume> {
        self.lock().volumes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `call`, applies `apply` unless a failure is injected, then fires
    /// any pending cancel hook.
    fn call<T>(
        &self,
        cancel: &Cancel,
        call: Call,
        apply: impl FnOnce(&mut Inner) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let mut inner = self.lock();
        let operation = call.operation();
        inner.calls.push(call);
        if let Some(failure) = inner.failing.get_mut(&operation) {
            if failure.skip == 0 {
                return Err(ProviderError::Api {
                    status: failure.status,
                    message: format!("injected {operation:?} failure"),
                });
            }
            failure.skip -= 1;
        }
        let out = apply(&mut *inner);
        if inner
            .cancel_after
            .as_ref()
            .is_some_and(|(op, _)| *op == operation)
        {
            if let Some((_, handle)) = inner.cancel_after.take() {
                handle.cancel();
            }
        }
        out
    }
}

fn not_found(what: impl std::fmt::Display) -> ProviderError {
    ProviderError::Api {
        status: 404,
        message: format!("{what} not found"),
    }
}

fn conflict(message: String) -> ProviderError {
    ProviderError::Api { status: 409, message }
}

impl Inner {
    fn droplet_mut(&mut self, id: u64) -> Result<&mut ObservedCompute, ProviderError> {
        self.droplets
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| not_found(format_args!("droplet {id}")))
    }

    fn volume_index(&self, id: &str) -> Result<usize, ProviderError> {
        self.volumes
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| not_found(format_args!("volume {id}")))
    }

    fn holder_of(&self, volume_id: &str) -> Option<u64> {
        self.droplets
            .iter()
            .find(|d| d.volume_ids.iter().any(|v| v == volume_id))
            .map(|d| d.id)
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn list_compute(&self, cancel: &Cancel) -> Result<Vec<ObservedCompute>, ProviderError> {
        self.call(cancel, Call::ListCompute, |inner| Ok(inner.droplets.clone()))
    }

    async fn list_volumes(&self, cancel: &Cancel) -> Result<Vec<ObservedVolume>, ProviderError> {
        self.call(cancel, Call::ListVolumes, |inner| Ok(inner.volumes.clone()))
    }

    async fn create_compute(&self, cancel: &Cancel, request: &ComputeCreateRequest) -> Result<(), ProviderError> {
        self.call(cancel, Call::CreateCompute(request.name.clone()), |inner| {
            for volume_id in &request.volumes {
                inner.volume_index(volume_id)?;
                if let Some(holder) = inner.holder_of(volume_id) {
                    return Err(conflict(format!("volume {volume_id} is attached to droplet {holder}")));
                }
            }
            inner.next_droplet += 1;
            let id = 1000 + inner.next_droplet;
            inner.droplets.push(ObservedCompute {
                id,
                name: request.name.clone(),
                size_slug: Some(request.size.clone()),
                image_slug: Some(request.image.clone()),
                volume_ids: request.volumes.clone(),
            });
            Ok(())
        })
    }

    async fn delete_compute(&self, cancel: &Cancel, id: u64) -> Result<(), ProviderError> {
        self.call(cancel, Call::DeleteCompute(id), |inner| {
            inner.droplet_mut(id)?;
            inner.droplets.retain(|d| d.id != id);
            Ok(())
        })
    }

    async fn act_on_compute(&self, cancel: &Cancel, id: u64, action: DropletAction<'_>) -> Result<(), ProviderError> {
        let call = match action {
            DropletAction::Resize { size } => Call::ResizeCompute { id, size: size.to_string() },
            DropletAction::Rebuild { image } => Call::RebuildCompute { id, image: image.to_string() },
        };
        self.call(cancel, call, |inner| {
            let droplet = inner.droplet_mut(id)?;
            match action {
                DropletAction::Resize { size } => droplet.size_slug = Some(size.to_string()),
                DropletAction::Rebuild { image } => droplet.image_slug = Some(image.to_string()),
            }
            Ok(())
        })
    }

    async fn create_volume(&self, cancel: &Cancel, request: &VolumeCreateRequest) -> Result<(), ProviderError> {
        self.call(cancel, Call::CreateVolume(request.name.clone()), |inner| {
            if inner
                .volumes
                .iter()
                .any(|v| v.name == request.name && v.region == request.region)
            {
                return Err(conflict(format!("volume {} already exists", request.name)));
            }
            inner.next_volume += 1;
            let id = format!("vol-{}", inner.next_volume);
            inner.volumes.push(ObservedVolume {
                id,
                name: request.name.clone(),
                region: request.region.clone(),
                size_gigabytes: request.size_gigabytes,
            });
            Ok(())
        })
    }

    async fn delete_volume(&self, cancel: &Cancel, id: &str) -> Result<(), ProviderError> {
        self.call(cancel, Call::DeleteVolume(id.to_string()), |inner| {
            let at = inner.volume_index(id)?;
            if let Some(holder) = inner.holder_of(id) {
                return Err(conflict(format!("volume {id} is attached to droplet {holder}")));
            }
            inner.volumes.remove(at);
            Ok(())
        })
    }

    async fn resize_volume(
        &self,
        cancel: &Cancel,
        id: &str,
        _region: &str,
        size_gigabytes: u64,
    ) -> Result<(), ProviderError> {
        let call = Call::ResizeVolume {
            id: id.to_string(),
            size_gigabytes,
        };
        self.call(cancel, call, |inner| {
            let at = inner.volume_index(id)?;
            let volume = &mut inner.volumes[at];
            if size_gigabytes < volume.size_gigabytes {
                return Err(ProviderError::Api {
                    status: 422,
                    message: format!("volume {id} cannot shrink"),
                });
            }
            volume.size_gigabytes = size_gigabytes;
            Ok(())
        })
    }

    async fn attach_volume(&self, cancel: &Cancel, volume_id: &str, droplet_id: u64) -> Result<(), ProviderError> {
        let call = Call::AttachVolume {
            volume_id: volume_id.to_string(),
            droplet_id,
        };
        self.call(cancel, call, |inner| {
            inner.volume_index(volume_id)?;
            match inner.holder_of(volume_id) {
                Some(holder) if holder == droplet_id => return Ok(()),
                Some(holder) => {
                    return Err(conflict(format!("volume {volume_id} is attached to droplet {holder}")))
                }
                None => {}
            }
            inner.droplet_mut(droplet_id)?.volume_ids.push(volume_id.to_string());
            Ok(())
        })
    }

    async fn detach_volume(&self, cancel: &Cancel, volume_id: &str, droplet_id: u64) -> Result<(), ProviderError> {
        let call = Call::DetachVolume {
            volume_id: volume_id.to_string(),
            droplet_id,
        };
        self.call(cancel, call, |inner| {
            let droplet = inner.droplet_mut(droplet_id)?;
            let before = droplet.volume_ids.len();
            droplet.volume_ids.retain(|v| v != volume_id);
            if droplet.volume_ids.len() == before {
                return Err(not_found(format_args!("attachment of {volume_id} to droplet {droplet_id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel_pair;

    fn volume(id: &str, name: &str, size: u64) -> ObservedVolume {
        ObservedVolume {
            id: id.into(),
            name: name.into(),
            region: "nyc3".into(),
            size_gigabytes: size,
        }
    }

    fn droplet(id: u64, name: &str, volumes: &[&str]) -> ObservedCompute {
        ObservedCompute {
            id,
            name: name.into(),
            size_slug: Some("s-1vcpu-1gb".into()),
            image_slug: Some("ubuntu".into()),
            volume_ids: volumes.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn created_volumes_get_fresh_ids() {
        let p = InMemoryProvider::new();
        let cancel = Cancel::never();
        let req = VolumeCreateRequest {
            name: "data".into(),
            region: "nyc3".into(),
            size_gigabytes: 10,
            snapshot_id: None,
            filesystem_type: None,
            filesystem_label: None,
            tags: vec![],
        };
        p.create_volume(&cancel, &req).await.unwrap();
        let listed = p.list_volumes(&cancel).await.unwrap();
        assert_eq!(listed, vec![volume("vol-1", "data", 10)]);
        let again = p.create_volume(&cancel, &req).await.unwrap_err();
        assert_eq!(again.status(), Some(409));
    }

    #[tokio::test]
    async fn attached_volume_cannot_be_deleted() {
        let p = InMemoryProvider::new()
            .with_volumes([volume("A", "a", 10)])
            .with_droplets([droplet(1, "db", &["A"])]);
        let cancel = Cancel::never();
        let err = p.delete_volume(&cancel, "A").await.unwrap_err();
        assert_eq!(err.status(), Some(409));

        p.detach_volume(&cancel, "A", 1).await.unwrap();
        p.delete_volume(&cancel, "A").await.unwrap();
        assert!(p.volumes().is_empty());
        assert!(p.droplets()[0].volume_ids.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let p = InMemoryProvider::new();
        p.fail(Operation::ListCompute, 500);
        let err = p.list_compute(&Cancel::never()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(p.calls(), vec![Call::ListCompute]);
    }

    #[tokio::test]
    async fn delayed_failure_lets_earlier_calls_through() {
        let p = InMemoryProvider::new().with_volumes([volume("A", "a", 10)]);
        let cancel = Cancel::never();
        p.fail_after(Operation::ListVolumes, 503, 2);

        assert_eq!(p.list_volumes(&cancel).await.unwrap().len(), 1);
        assert_eq!(p.list_volumes(&cancel).await.unwrap().len(), 1);
        assert_eq!(p.list_volumes(&cancel).await.unwrap_err().status(), Some(503));
        assert_eq!(p.list_volumes(&cancel).await.unwrap_err().status(), Some(503));
        assert_eq!(p.operations().len(), 4);
    }

    #[tokio::test]
    async fn cancel_hook_fires_after_the_operation() {
        let p = InMemoryProvider::new().with_droplets([droplet(1, "web", &[])]);
        let (handle, cancel) = cancel_pair();
        p.cancel_after(Operation::ActOnCompute, handle);

        p.act_on_compute(&cancel, 1, DropletAction::Resize { size: "s-2vcpu-4gb" })
            .await
            .unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(p.droplets()[0].size_slug.as_deref(), Some("s-2vcpu-4gb"));

        let err = p.list_compute(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(p.operations(), vec![Operation::ActOnCompute]);
    }

    #[tokio::test]
    async fn volume_cannot_be_attached_twice() {
        let p = InMemoryProvider::new()
            .with_volumes([volume("A", "a", 10)])
            .with_droplets([droplet(1, "one", &["A"]), droplet(2, "two", &[])]);
        let cancel = Cancel::never();
        assert_eq!(p.attach_volume(&cancel, "A", 2).await.unwrap_err().status(), Some(409));
        p.attach_volume(&cancel, "A", 1).await.unwrap();
        assert_eq!(p.attach_volume(&cancel, "B", 1).await.unwrap_err().status(), Some(404));
    }
}
