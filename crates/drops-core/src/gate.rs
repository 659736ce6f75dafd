use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Privileges, ResourceKind};

/// Action category gated by one privilege flag.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Create => f.write_str("create"),
            Category::Update => f.write_str("update"),
            Category::Delete => f.write_str("delete"),
        }
    }
}

impl Privileges {
    pub fn allows(&self, category: Category) -> bool {
        match category {
            Category::Create => self.create,
            Category::Update => self.update,
            Category::Delete => self.delete,
        }
    }
}

/// Outcome of [`admit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Nothing pending; no work and no notice.
    Idle,
    /// The whole category may run.
    Proceed,
    /// The category is withheld; `pending` items were discovered but will not be touched.
    Withheld { pending: usize },
}

/// Coarse, category-wide gate. Either every pending item of the category runs
/// or none does; a withheld category is a logged notice, never an error.
pub fn admit(privileges: &Privileges, category: Category, kind: ResourceKind, pending: usize) -> Admission {
    if pending == 0 {
        return Admission::Idle;
    }
    if privileges.allows(category) {
        return Admission::Proceed;
    }
    warn!("discovered {pending} {kind}(s) to {category} but lacks {category} privilege");
    Admission::Withheld { pending }
}
