//! Desired-vs-observed diffing.
//!
//! Pure functions only: snapshots in, create lists / action sets / delete lists
//! out. Resources are joined by name (see [`Named`]).

use tracing::debug;

use crate::{
    Action, ActionSet, DesiredCompute, DesiredVolume, Named, Observed, ObservedCompute,
    ObservedVolume, ResourceId, ValidationError, VolumeNameIndex, VolumeRef,
};

/// Result of [`diff_create_update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateUpdate<D> {
    /// Desired entities with no observed counterpart, in desired order.
    pub create: Vec<D>,
    /// Per-resource actions keyed by the observed entity's ID.
    pub updates: ActionSet,
}

impl<D> Default for CreateUpdate<D> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            updates: ActionSet::new(),
        }
    }
}

/// Splits `desired` into entities to create and actions for entities that already exist.
///
/// `field_actions` computes the action list for one matched pair; an empty list
/// means the pair is in sync. If names repeat on the observed side the last
/// match wins; callers are expected to keep names unique.
pub fn diff_create_update<D, O, F>(desired: &[D], observed: &[O], mut field_actions: F) -> CreateUpdate<D>
where
    D: Named + Clone,
    O: Observed,
    F: FnMut(&D, &O) -> Vec<Action>,
{
    let mut out = CreateUpdate::default();
    for want in desired {
        match observed.iter().filter(|o| o.name() == want.name()).last() {
            Some(have) => {
                let actions = field_actions(want, have);
                if !actions.is_empty() {
                    debug!("{} needs {} action(s)", want.name(), actions.len());
                }
                out.updates.insert(have.resource_id(), actions);
            }
            None => out.create.push(want.clone()),
        }
    }
    out
}

/// Pulls the pending actions of every matched entity whose desired side fails
/// `validate` out of `updates`, returning the rejected IDs with their errors.
///
/// Matching mirrors [`diff_create_update`]. Entities already in sync are not rejected.
pub fn withhold_invalid<D, O>(
    desired: &[D],
    observed: &[O],
    updates: &mut ActionSet,
    validate: impl Fn(&D) -> Result<(), ValidationError>,
) -> Vec<(ResourceId, ValidationError)>
where
    D: Named,
    O: Observed,
{
    let mut rejected = Vec::new();
    for want in desired {
        let Err(error) = validate(want) else {
            continue;
        };
        let Some(have) = observed.iter().filter(|o| o.name() == want.name()).last() else {
            continue;
        };
        let id = have.resource_id();
        if updates.remove(&id).is_some() {
            debug!("{id}: withholding update of {}: {error}", want.name());
            rejected.push((id, error));
        }
    }
    rejected
}

/// Observed entities whose name appears nowhere in `desired`.
pub fn diff_delete<D, O>(desired: &[D], observed: &[O]) -> Vec<O>
where
    D: Named,
    O: Named + Clone,
{
    observed
        .iter()
        .filter(|o| !desired.iter().any(|d| d.name() == o.name()))
        .cloned()
        .collect()
}

/// Size then image, in that order.
pub fn droplet_field_actions(want: &DesiredCompute, have: &ObservedCompute) -> Vec<Action> {
    let mut actions = Vec::new();
    if let Some(size) = &have.size_slug {
        if *size != want.size {
            debug!("droplet {} size {size} -> {}", have.name, want.size);
            actions.push(Action::ResizeDroplet {
                size: want.size.clone(),
            });
        }
    }
    if let Some(image) = &have.image_slug {
        if *image != want.image {
            debug!("droplet {} image {image} -> {}", have.name, want.image);
            actions.push(Action::Rebuild {
                image: want.image.clone(),
            });
        }
    }
    actions
}

/// An observed size of zero belongs to a volume whose create has not settled
/// yet, so it is never diffed.
pub fn volume_field_actions(want: &DesiredVolume, have: &ObservedVolume) -> Vec<Action> {
    if have.size_gigabytes != 0 && have.size_gigabytes != want.size_gigabytes {
        debug!(
            "volume {} size {}GB -> {}GB",
            have.name, have.size_gigabytes, want.size_gigabytes
        );
        return vec![Action::ResizeVolume {
            size_gigabytes: want.size_gigabytes,
        }];
    }
    Vec::new()
}

/// Detach every attached volume that is not wanted, then attach every wanted
/// volume that is not attached.
///
/// A wanted name missing from `index` yields an attach with an unresolved
/// [`VolumeRef`], which the executor reports as "volume not found".
pub fn attachment_actions(
    want: &DesiredCompute,
    have: &ObservedCompute,
    index: &VolumeNameIndex,
) -> Vec<Action> {
    let wanted: Vec<VolumeRef> = want
        .volumes
        .iter()
        .map(|name| VolumeRef {
            name: name.clone(),
            id: index.resolve(name).map(str::to_string),
        })
        .collect();

    let mut actions = Vec::new();
    for attached in &have.volume_ids {
        if !wanted.iter().any(|w| w.id.as_deref() == Some(attached.as_str())) {
            debug!("volume {attached} to be detached from droplet {}", have.name);
            actions.push(Action::Detach {
                volume_id: attached.clone(),
            });
        }
    }
    for volume in wanted {
        let attached = volume
            .id
            .as_deref()
            .is_some_and(|id| have.volume_ids.iter().any(|a| a == id));
        if !attached {
            debug!("volume {} not attached to droplet {}", volume.name, have.name);
            actions.push(Action::Attach { volume });
        }
    }
    actions
}

/// Droplet diff: field actions followed by attachment actions for every matched droplet.
pub fn diff_droplets(
    desired: &[DesiredCompute],
    observed: &[ObservedCompute],
    index: &VolumeNameIndex,
) -> CreateUpdate<DesiredCompute> {
    diff_create_update(desired, observed, |want, have| {
        let mut actions = droplet_field_actions(want, have);
        actions.extend(attachment_actions(want, have, index));
        actions
    })
}

pub fn diff_volumes(desired: &[DesiredVolume], observed: &[ObservedVolume]) -> CreateUpdate<DesiredVolume> {
    diff_create_update(desired, observed, volume_field_actions)
}
