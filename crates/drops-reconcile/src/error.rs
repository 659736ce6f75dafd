use std::fmt;

use drops_core::{ResourceKind, ValidationError};
use drops_provider::ProviderError;
use thiserror::Error;

use crate::LoadError;

/// Where in the pass a fatal error surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    VolumeSnapshot,
    VolumeApply,
    Settle,
    ComputeSnapshot,
    ComputeApply,
    VolumeResnapshot,
    VolumeDelete,
    Attachments,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::VolumeSnapshot => "volume snapshot",
            Stage::VolumeApply => "volume create/resize",
            Stage::Settle => "settle",
            Stage::ComputeSnapshot => "droplet snapshot",
            Stage::ComputeApply => "droplet create/update/delete",
            Stage::VolumeResnapshot => "volume re-snapshot",
            Stage::VolumeDelete => "volume delete",
            Stage::Attachments => "volume attach/detach",
        };
        f.write_str(s)
    }
}

/// Fatal to the whole run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("load desired state: {0}")]
    Load(#[from] LoadError),
    #[error("snapshot {kind}s: {source}")]
    Snapshot {
        kind: ResourceKind,
        #[source]
        source: ProviderError,
    },
    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },
}

/// Failure of one action on one resource. The pass continues past these.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("volume {0} not found")]
    VolumeNotFound(String),
}

impl ActionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Provider(e) if e.is_cancelled())
    }
}

/// Cancellation observed while applying a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

impl Interrupted {
    pub fn during(self, stage: Stage) -> ReconcileError {
        ReconcileError::Cancelled { stage }
    }
}
