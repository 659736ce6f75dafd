use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Kind of change an [`Action`] performs, independent of its value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Resize,
    Rebuild,
    Attach,
    Detach,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Resize => "resize",
            ActionKind::Rebuild => "rebuild",
            ActionKind::Attach => "attach",
            ActionKind::Detach => "detach",
        };
        f.write_str(s)
    }
}

/// Target of an attach. `id` is `None` when the name did not resolve against
/// the latest volume snapshot; executing such an attach fails with "volume not found".
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeRef {
    pub name: String,
    pub id: Option<String>,
}

/// One field-level or relationship-level change for a single resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// New droplet size slug.
    ResizeDroplet { size: String },
    /// New volume capacity.
    ResizeVolume { size_gigabytes: u64 },
    /// New droplet image slug.
    Rebuild { image: String },
    /// Attach a volume to the droplet the action is keyed by.
    Attach { volume: VolumeRef },
    /// Detach a volume from the droplet the action is keyed by.
    Detach { volume_id: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ResizeDroplet { .. } | Action::ResizeVolume { .. } => ActionKind::Resize,
            Action::Rebuild { .. } => ActionKind::Rebuild,
            Action::Attach { .. } => ActionKind::Attach,
            Action::Detach { .. } => ActionKind::Detach,
        }
    }

    /// Attach and detach are executed by the volume side even when a droplet diff found them.
    pub fn is_attachment(&self) -> bool {
        matches!(self.kind(), ActionKind::Attach | ActionKind::Detach)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ResizeDroplet { size } => write!(f, "resize({size})"),
            Action::ResizeVolume { size_gigabytes } => write!(f, "resize({size_gigabytes}GB)"),
            Action::Rebuild { image } => write!(f, "rebuild({image})"),
            Action::Attach { volume } => match &volume.id {
                Some(id) => write!(f, "attach({id})"),
                None => write!(f, "attach({}, unresolved)", volume.name),
            },
            Action::Detach { volume_id } => write!(f, "detach({volume_id})"),
        }
    }
}

/// Ordered actions per resource. Order within one resource's list is preserved;
/// iteration across resources follows `ResourceId` ordering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionSet(BTreeMap<ResourceId, Vec<Action>>);

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous list for `id`. Empty lists are not stored.
    pub fn insert(&mut self, id: ResourceId, actions: Vec<Action>) {
        if actions.is_empty() {
            self.0.remove(&id);
        } else {
            self.0.insert(id, actions);
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<Vec<Action>> {
        self.0.remove(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&[Action]> {
        self.0.get(id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &[Action])> {
        self.0.iter().map(|(id, a)| (id, a.as_slice()))
    }

    /// Number of resources with at least one action.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total actions across all resources.
    pub fn action_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// New set keeping only actions matching `keep`, dropping resources left empty.
    pub fn filtered(&self, mut keep: impl FnMut(&Action) -> bool) -> ActionSet {
        let mut out = ActionSet::new();
        for (id, actions) in &self.0 {
            let kept: Vec<Action> = actions.iter().filter(|a| keep(a)).cloned().collect();
            out.insert(id.clone(), kept);
        }
        out
    }
}

impl FromIterator<(ResourceId, Vec<Action>)> for ActionSet {
    fn from_iter<I: IntoIterator<Item = (ResourceId, Vec<Action>)>>(iter: I) -> Self {
        let mut set = ActionSet::new();
        for (id, actions) in iter {
            set.insert(id, actions);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_are_not_stored() {
        let mut set = ActionSet::new();
        set.insert(ResourceId::Droplet(1), vec![]);
        assert!(set.is_empty());
    }

    #[test]
    fn filtered_splits_attachment_actions() {
        let set: ActionSet = [(
            ResourceId::Droplet(7),
            vec![
                Action::ResizeDroplet { size: "s-2vcpu-4gb".into() },
                Action::Detach { volume_id: "vol-a".into() },
            ],
        )]
        .into_iter()
        .collect();

        let attachments = set.filtered(Action::is_attachment);
        assert_eq!(
            attachments.get(&ResourceId::Droplet(7)),
            Some(&[Action::Detach { volume_id: "vol-a".into() }][..])
        );
        let rest = set.filtered(|a| !a.is_attachment());
        assert_eq!(rest.action_count(), 1);
    }

    #[test]
    fn display_names_unresolved_attach() {
        let a = Action::Attach {
            volume: VolumeRef { name: "data-9".into(), id: None },
        };
        assert_eq!(a.to_string(), "attach(data-9, unresolved)");
        assert_eq!(a.kind(), ActionKind::Attach);
    }
}
