use std::fmt;

use drops_core::{
    admit, ActionSet, Admission, Category, ObservedCompute, ObservedVolume, Privileges, ResourceId, ResourceKind,
    ValidationError,
};
use tracing::{info, warn};

use crate::{ActionError, Interrupted};

/// What a successful action did, for the run tallies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Create,
    Update,
    Delete,
    Attach,
    Detach,
}

/// A category withheld by the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Skipped {
    pub kind: ResourceKind,
    pub category: Category,
    pub pending: usize,
}

/// A per-resource failure the pass continued past.
#[derive(Debug)]
pub struct ActionFailure {
    pub resource: String,
    pub action: String,
    pub error: ActionError,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.resource, self.action, self.error)
    }
}

/// Outcome of one pass.
#[derive(Debug, Default)]
pub struct RunReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub attached: usize,
    pub detached: usize,
    pub skipped: Vec<Skipped>,
    pub failures: Vec<ActionFailure>,
}

impl RunReport {
    /// Applies the privilege gate, remembering withheld categories.
    pub fn admit(&mut self, privileges: &Privileges, category: Category, kind: ResourceKind, pending: usize) -> bool {
        match admit(privileges, category, kind, pending) {
            Admission::Proceed => true,
            Admission::Idle => false,
            Admission::Withheld { pending } => {
                self.skipped.push(Skipped { kind, category, pending });
                false
            }
        }
    }

    /// Tallies one action result. Cancellation is handed back so the run
    /// stops; any other failure is logged and kept.
    pub fn record(
        &mut self,
        change: Change,
        resource: impl fmt::Display,
        action: impl fmt::Display,
        result: Result<(), ActionError>,
    ) -> Result<(), Interrupted> {
        match result {
            Ok(()) => {
                info!("{resource}: {action} issued");
                match change {
                    Change::Create => self.created += 1,
                    Change::Update => self.updated += 1,
                    Change::Delete => self.deleted += 1,
                    Change::Attach => self.attached += 1,
                    Change::Detach => self.detached += 1,
                }
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(Interrupted),
            Err(error) => {
                warn!("{resource}: {action} failed: {error}");
                self.failures.push(ActionFailure {
                    resource: resource.to_string(),
                    action: action.to_string(),
                    error,
                });
                Ok(())
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} deleted={} attached={} detached={} skipped={} failures={}",
            self.created,
            self.updated,
            self.deleted,
            self.attached,
            self.detached,
            self.skipped.len(),
            self.failures.len()
        )
    }
}

/// Everything a pass would do against the current inventory, without doing it.
///
/// Attach targets of volumes that do not exist yet show as unresolved, since a
/// dry run never creates them.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub privileges: Privileges,
    pub volume_creates: Vec<String>,
    pub volume_updates: ActionSet,
    pub volume_deletes: Vec<ObservedVolume>,
    pub droplet_creates: Vec<String>,
    pub droplet_updates: ActionSet,
    pub droplet_deletes: Vec<ObservedCompute>,
    /// Existing resources left alone because their desired entry is invalid.
    pub rejected: Vec<(ResourceId, ValidationError)>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.volume_creates.is_empty()
            && self.volume_updates.is_empty()
            && self.volume_deletes.is_empty()
            && self.droplet_creates.is_empty()
            && self.droplet_updates.is_empty()
            && self.droplet_deletes.is_empty()
            && self.rejected.is_empty()
    }
}

fn gated(privileges: &Privileges, category: Category) -> &'static str {
    if privileges.allows(category) {
        ""
    } else {
        " (withheld)"
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "in sync");
        }
        let p = &self.privileges;
        for name in &self.volume_creates {
            writeln!(f, "+ volume {name}{}", gated(p, Category::Create))?;
        }
        for (id, actions) in self.volume_updates.iter() {
            for action in actions {
                writeln!(f, "~ {id}: {action}{}", gated(p, Category::Update))?;
            }
        }
        for name in &self.droplet_creates {
            writeln!(f, "+ droplet {name}{}", gated(p, Category::Create))?;
        }
        for (id, actions) in self.droplet_updates.iter() {
            for action in actions {
                writeln!(f, "~ {id}: {action}{}", gated(p, Category::Update))?;
            }
        }
        for d in &self.droplet_deletes {
            writeln!(f, "- droplet {} ({}){}", d.name, d.id, gated(p, Category::Delete))?;
        }
        for v in &self.volume_deletes {
            writeln!(f, "- volume {} ({}){}", v.name, v.id, gated(p, Category::Delete))?;
        }
        for (id, error) in &self.rejected {
            writeln!(f, "! {id}: {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drops_core::Action;
    use drops_provider::ProviderError;

    #[test]
    fn failures_are_kept_and_cancellation_is_returned() {
        let mut report = RunReport::default();
        report
            .record(Change::Create, "droplet web-2", "create", Ok(()))
            .unwrap();
        report
            .record(
                Change::Delete,
                "volume vol-1",
                "delete",
                Err(ProviderError::Api { status: 409, message: "attached".into() }.into()),
            )
            .unwrap();
        let stop = report.record(
            Change::Update,
            "droplet 1",
            "resize(s-2vcpu-4gb)",
            Err(ProviderError::Cancelled.into()),
        );
        assert_eq!(stop, Err(Interrupted));
        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].to_string(), "volume vol-1 delete: provider returned 409: attached");
    }

    #[test]
    fn withheld_categories_are_remembered() {
        let mut report = RunReport::default();
        let p = Privileges { create: false, update: true, delete: true };
        assert!(!report.admit(&p, Category::Create, ResourceKind::Volume, 2));
        assert!(!report.admit(&p, Category::Create, ResourceKind::Droplet, 0));
        assert!(report.admit(&p, Category::Update, ResourceKind::Droplet, 1));
        assert_eq!(
            report.skipped,
            vec![Skipped { kind: ResourceKind::Volume, category: Category::Create, pending: 2 }]
        );
    }

    #[test]
    fn plan_marks_withheld_lines() {
        let mut plan = Plan {
            privileges: Privileges { create: true, update: true, delete: false },
            droplet_creates: vec!["web-2".into()],
            ..Default::default()
        };
        plan.droplet_updates.insert(
            ResourceId::Droplet(1),
            vec![Action::ResizeDroplet { size: "s-1vcpu-2gb".into() }],
        );
        plan.volume_deletes.push(ObservedVolume {
            id: "vol-9".into(),
            name: "scratch".into(),
            region: "nyc3".into(),
            size_gigabytes: 5,
        });
        let text = plan.to_string();
        assert_eq!(
            text,
            "+ droplet web-2\n~ droplet 1: resize(s-1vcpu-2gb)\n- volume scratch (vol-9) (withheld)\n"
        );
    }

    #[test]
    fn plan_lists_invalid_resources_last() {
        let plan = Plan {
            privileges: Privileges::all(),
            rejected: vec![(
                ResourceId::Volume("vol-1".into()),
                ValidationError::NonPositiveSize("data".into()),
            )],
            ..Default::default()
        };
        assert!(!plan.is_empty());
        assert_eq!(plan.to_string(), "! volume vol-1: volume data sizeGigaBytes must be greater than zero\n");
    }
}
