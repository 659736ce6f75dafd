use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Category-wide switches. A disabled category is skipped as a whole, never per resource.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Privileges {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub delete: bool,
}

impl Privileges {
    pub fn all() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }
}

/// The two resource kinds the reconciler manages.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Droplet,
    Volume,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Droplet => f.write_str("droplet"),
            ResourceKind::Volume => f.write_str("volume"),
        }
    }
}

/// User-init script for a droplet. When `path` is set the loader replaces `data`
/// with the file contents, so `path` wins over inline data.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A droplet as declared in the desired-state document.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredCompute {
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub size: String,
    /// Image slug, e.g. `ubuntu-22-04-x64`.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub ssh_key_fingerprints: Vec<String>,
    #[serde(default)]
    pub backups: bool,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default)]
    pub user_data: UserData,
    /// Names (not IDs) of the volumes that should be attached.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "vpcuuid")]
    pub vpc_uuid: String,
}

/// A block-storage volume as declared in the desired-state document.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredVolume {
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, rename = "sizeGigaBytes")]
    pub size_gigabytes: u64,
    #[serde(default, rename = "snapShotID")]
    pub snapshot_id: String,
    #[serde(default)]
    pub filesystem_type: String,
    #[serde(default)]
    pub filesystem_label: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A droplet as reported by the provider. Never mutated locally.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedCompute {
    pub id: u64,
    pub name: String,
    /// `None` when the provider did not report a size; such droplets are not resized.
    pub size_slug: Option<String>,
    /// `None` when the provider did not report an image; such droplets are not rebuilt.
    pub image_slug: Option<String>,
    pub volume_ids: Vec<String>,
}

/// A volume as reported by the provider. Never mutated locally.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedVolume {
    pub id: String,
    pub name: String,
    pub region: String,
    pub size_gigabytes: u64,
}

/// Provider-assigned identifier of an observed resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceId {
    Droplet(u64),
    Volume(String),
}

impl ResourceId {
    pub fn as_droplet(&self) -> Option<u64> {
        match self {
            ResourceId::Droplet(id) => Some(*id),
            ResourceId::Volume(_) => None,
        }
    }

    pub fn as_volume(&self) -> Option<&str> {
        match self {
            ResourceId::Volume(id) => Some(id),
            ResourceId::Droplet(_) => None,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Droplet(id) => write!(f, "droplet {id}"),
            ResourceId::Volume(id) => write!(f, "volume {id}"),
        }
    }
}

/// Anything joined by name between the desired and observed sets.
///
/// Names are a uniqueness constraint on both sides. The diff does not arbitrate
/// duplicates; the desired-state loader rejects them before a run starts.
pub trait Named {
    fn name(&self) -> &str;
}

/// An observed resource with a provider-assigned identity.
pub trait Observed: Named {
    fn resource_id(&self) -> ResourceId;
}

impl Named for DesiredCompute {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for DesiredVolume {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ObservedCompute {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ObservedVolume {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Observed for ObservedCompute {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Droplet(self.id)
    }
}

impl Observed for ObservedVolume {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Volume(self.id.clone())
    }
}

/// Volume name to provider ID, built from one volume snapshot.
///
/// Rebuilt every time it is needed: IDs of volumes created earlier in the same
/// pass only exist in a snapshot taken after the create.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeNameIndex(HashMap<String, String>);

impl VolumeNameIndex {
    pub fn from_volumes(volumes: &[ObservedVolume]) -> Self {
        Self(
            volumes
                .iter()
                .map(|v| (v.name.clone(), v.id.clone()))
                .collect(),
        )
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for VolumeNameIndex {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_compute_reads_document_field_names() {
        let json = r##"{
            "name": "web-1",
            "region": "nyc3",
            "size": "s-1vcpu-1gb",
            "image": "ubuntu-22-04-x64",
            "sshKeyFingerprints": ["aa:bb"],
            "userData": {"data": "#!/bin/sh"},
            "volumes": ["data-1"],
            "vpcuuid": "vpc-1"
        }"##;
        let d: DesiredCompute = serde_json::from_str(json).unwrap();
        assert_eq!(d.ssh_key_fingerprints, vec!["aa:bb".to_string()]);
        assert_eq!(d.user_data.data.as_deref(), Some("#!/bin/sh"));
        assert_eq!(d.vpc_uuid, "vpc-1");
        assert!(!d.backups);
    }

    #[test]
    fn desired_volume_reads_document_field_names() {
        let json = r#"{"name": "data-1", "region": "nyc3", "sizeGigaBytes": 100, "snapShotID": "snap"}"#;
        let v: DesiredVolume = serde_json::from_str(json).unwrap();
        assert_eq!(v.size_gigabytes, 100);
        assert_eq!(v.snapshot_id, "snap");
    }

    #[test]
    fn name_index_resolves_latest_snapshot_only() {
        let idx = VolumeNameIndex::from_volumes(&[ObservedVolume {
            id: "vol-1".into(),
            name: "data-1".into(),
            region: "nyc3".into(),
            size_gigabytes: 10,
        }]);
        assert_eq!(idx.resolve("data-1"), Some("vol-1"));
        assert_eq!(idx.resolve("data-2"), None);
    }
}
