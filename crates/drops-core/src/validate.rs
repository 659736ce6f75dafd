use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DesiredCompute, DesiredVolume, ResourceKind, VolumeNameIndex};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} {field} not specified")]
    MissingField { kind: ResourceKind, field: &'static str },
    #[error("volume {0} sizeGigaBytes must be greater than zero")]
    NonPositiveSize(String),
    #[error("droplet {droplet} references volume {volume} which does not exist")]
    UnknownVolume { droplet: String, volume: String },
}

/// Body of a droplet create call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputeCreateRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
    pub backups: bool,
    pub ipv6: bool,
    pub monitoring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// Volume IDs, already resolved from names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_uuid: Option<String>,
}

/// Body of a volume create call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCreateRequest {
    pub name: String,
    pub region: String,
    pub size_gigabytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn require(value: &str, kind: ResourceKind, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField { kind, field });
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Checks the fields a droplet needs before any create call is attempted.
pub fn validate_droplet(droplet: &DesiredCompute) -> Result<(), ValidationError> {
    let kind = ResourceKind::Droplet;
    require(&droplet.name, kind, "name")?;
    require(&droplet.region, kind, "region")?;
    require(&droplet.size, kind, "size")?;
    require(&droplet.image, kind, "image")?;
    Ok(())
}

pub fn validate_volume(volume: &DesiredVolume) -> Result<(), ValidationError> {
    let kind = ResourceKind::Volume;
    require(&volume.name, kind, "name")?;
    require(&volume.region, kind, "region")?;
    if volume.size_gigabytes == 0 {
        return Err(ValidationError::NonPositiveSize(volume.name.clone()));
    }
    Ok(())
}

/// Translates a desired droplet into a create request, resolving its volume names.
pub fn translate_droplet(
    droplet: &DesiredCompute,
    volumes: &VolumeNameIndex,
) -> Result<ComputeCreateRequest, ValidationError> {
    validate_droplet(droplet)?;

    let volume_ids = droplet
        .volumes
        .iter()
        .map(|name| {
            volumes
                .resolve(name)
                .map(str::to_string)
                .ok_or_else(|| ValidationError::UnknownVolume {
                    droplet: droplet.name.clone(),
                    volume: name.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ComputeCreateRequest {
        name: droplet.name.clone(),
        region: droplet.region.clone(),
        size: droplet.size.clone(),
        image: droplet.image.clone(),
        ssh_keys: droplet.ssh_key_fingerprints.clone(),
        backups: droplet.backups,
        ipv6: droplet.ipv6,
        monitoring: droplet.monitoring,
        user_data: droplet.user_data.data.as_deref().and_then(non_empty),
        volumes: volume_ids,
        tags: droplet.tags.clone(),
        vpc_uuid: non_empty(&droplet.vpc_uuid),
    })
}

pub fn translate_volume(volume: &DesiredVolume) -> Result<VolumeCreateRequest, ValidationError> {
    validate_volume(volume)?;
    Ok(VolumeCreateRequest {
        name: volume.name.clone(),
        region: volume.region.clone(),
        size_gigabytes: volume.size_gigabytes,
        snapshot_id: non_empty(&volume.snapshot_id),
        filesystem_type: non_empty(&volume.filesystem_type),
        filesystem_label: non_empty(&volume.filesystem_label),
        tags: volume.tags.clone(),
    })
}
