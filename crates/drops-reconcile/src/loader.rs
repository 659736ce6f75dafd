use std::collections::HashSet;
use std::path::{Path, PathBuf};

use drops_core::{
    translate_droplet, validate_volume, DesiredCompute, DesiredVolume, Named, Privileges, ResourceKind,
    ValidationError, VolumeNameIndex,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("read user data {} for droplet {droplet}: {source}", .path.display())]
    UserData {
        droplet: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("duplicate {kind} name {name}")]
    DuplicateName { kind: ResourceKind, name: String },
}

/// The declarative inventory one pass converges towards.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredState {
    #[serde(default)]
    pub privileges: Privileges,
    #[serde(default)]
    pub droplets: Vec<DesiredCompute>,
    #[serde(default)]
    pub volumes: Vec<DesiredVolume>,
}

impl DesiredState {
    /// Names join desired and observed resources, so they must be unique per kind.
    pub fn check_unique_names(&self) -> Result<(), LoadError> {
        unique(ResourceKind::Droplet, &self.droplets)?;
        unique(ResourceKind::Volume, &self.volumes)
    }

    /// Runs request translation on every entity without contacting a provider.
    /// Volume references resolve against the declared volumes.
    pub fn validate(&self) -> Vec<ValidationError> {
        let declared: VolumeNameIndex = self
            .volumes
            .iter()
            .map(|v| (v.name.clone(), v.name.clone()))
            .collect();
        let volumes = self.volumes.iter().filter_map(|v| validate_volume(v).err());
        let droplets = self
            .droplets
            .iter()
            .filter_map(|d| translate_droplet(d, &declared).err());
        volumes.chain(droplets).collect()
    }
}

fn unique<T: Named>(kind: ResourceKind, items: &[T]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.name()) {
            return Err(LoadError::DuplicateName {
                kind,
                name: item.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Where a run gets its desired state from. Loaded once per run.
pub trait DesiredStateSource: Send + Sync {
    fn load(&self) -> Result<DesiredState, LoadError>;
}

impl DesiredStateSource for DesiredState {
    fn load(&self) -> Result<DesiredState, LoadError> {
        self.check_unique_names()?;
        Ok(self.clone())
    }
}

/// A YAML desired-state document on disk.
///
/// `userData.path` is read relative to the document's directory and replaces
/// any inline `userData.data`.
#[derive(Clone, Debug)]
pub struct YamlFile {
    path: PathBuf,
}

impl YamlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve_user_data(&self, droplet: &mut DesiredCompute) -> Result<(), LoadError> {
        let Some(rel) = droplet.user_data.path.as_ref() else {
            return Ok(());
        };
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        let path = base.join(rel);
        let data = std::fs::read_to_string(&path).map_err(|source| LoadError::UserData {
            droplet: droplet.name.clone(),
            path: path.clone(),
            source,
        })?;
        droplet.user_data.data = Some(data);
        Ok(())
    }
}

impl DesiredStateSource for YamlFile {
    fn load(&self) -> Result<DesiredState, LoadError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| LoadError::Read {
            path: self.path.clone(),
            source,
        })?;
        let mut state: DesiredState = serde_yaml::from_str(&text).map_err(|source| LoadError::Parse {
            path: self.path.clone(),
            source,
        })?;
        state.check_unique_names()?;
        for droplet in &mut state.droplets {
            self.resolve_user_data(droplet)?;
        }
        Ok(state)
    }
}
