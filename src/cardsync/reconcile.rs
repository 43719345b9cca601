use std::collections::BTreeSet;

use serde::Serialize;

use crate::tags::{ManagedTag, Namespace};

/// Tags to add to and remove from one remote note.
#[derive(Serialize, Clone, Default, PartialEq, Eq, Debug)]
pub struct TagPlan {
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

impl TagPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// the tag set a note ends up with once the plan has been applied
    pub fn apply(&self, remote: &BTreeSet<String>) -> BTreeSet<String> {
        remote.iter()
              .filter(|t| !self.remove.contains(*t))
              .chain(self.add.iter())
              .cloned()
              .collect()
    }
}

/// split remote tags into (managed, unmanaged)
pub fn partition(remote: &BTreeSet<String>) -> (BTreeSet<String>, BTreeSet<String>) {
    remote.iter()
          .cloned()
          .partition(|t| Namespace::of_tag(t).is_some())
}

/// Compute the minimal plan that replaces the managed part of `remote` with
/// `desired` while leaving every unmanaged tag where it is.
pub fn reconcile(remote: &BTreeSet<String>, desired: &BTreeSet<ManagedTag>) -> TagPlan {
    let (managed_remote, _unmanaged) = partition(remote);
    let desired: BTreeSet<String> = desired.iter().map(|t| t.to_string()).collect();

    TagPlan {
        add: desired.difference(&managed_remote).cloned().collect(),
        remove: managed_remote.difference(&desired).cloned().collect(),
    }
}
