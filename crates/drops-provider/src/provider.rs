use std::fmt;

use async_trait::async_trait;
use drops_core::{ComputeCreateRequest, ObservedCompute, ObservedVolume, VolumeCreateRequest};

use crate::{Cancel, ProviderError};

/// In-place change to an existing droplet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropletAction<'a> {
    Resize { size: &'a str },
    Rebuild { image: &'a str },
}

impl fmt::Display for DropletAction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropletAction::Resize { size } => write!(f, "resize to {size}"),
            DropletAction::Rebuild { image } => write!(f, "rebuild from {image}"),
        }
    }
}

/// Remote inventory the reconciler reads and mutates.
///
/// Implementations own retrying: each call either succeeds or returns one
/// error after its attempt budget is spent. Every call observes `cancel`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// All droplets, across every page.
    async fn list_compute(&self, cancel: &Cancel) -> Result<Vec<ObservedCompute>, ProviderError>;

    /// All volumes, across every page.
    async fn list_volumes(&self, cancel: &Cancel) -> Result<Vec<ObservedVolume>, ProviderError>;

    async fn create_compute(&self, cancel: &Cancel, request: &ComputeCreateRequest) -> Result<(), ProviderError>;

    async fn delete_compute(&self, cancel: &Cancel, id: u64) -> Result<(), ProviderError>;

    async fn act_on_compute(&self, cancel: &Cancel, id: u64, action: DropletAction<'_>) -> Result<(), ProviderError>;

    async fn create_volume(&self, cancel: &Cancel, request: &VolumeCreateRequest) -> Result<(), ProviderError>;

    async fn delete_volume(&self, cancel: &Cancel, id: &str) -> Result<(), ProviderError>;

    async fn resize_volume(
        &self,
        cancel: &Cancel,
        id: &str,
        region: &str,
        size_gigabytes: u64,
    ) -> Result<(), ProviderError>;

    async fn attach_volume(&self, cancel: &Cancel, volume_id: &str, droplet_id: u64) -> Result<(), ProviderError>;

    async fn detach_volume(&self, cancel: &Cancel, volume_id: &str, droplet_id: u64) -> Result<(), ProviderError>;
}
