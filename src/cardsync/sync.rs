//! Apply import records to the note store.
//!
//! Planning is offline and only consults the mapping table. Applying talks
//! to the store: one bundled field update per note, the new remote id made
//! durable before any tag call, then the tag plan with a read-back check.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, NoteError, Result};
use crate::extract::Fields;
use crate::mapping::MappingTable;
use crate::reconcile::{reconcile, TagPlan};
use crate::record::ImportRecord;
use crate::store::NoteStore;
use crate::tags::{join_tags, ManagedTag};

#[derive(Serialize, Clone, PartialEq, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update {
        remote_id: u64,
        /// the binding comes from the record and is not yet in the mapping table
        adopt: bool,
    },
}

/// What will happen to one note.
#[derive(Serialize, Clone, Debug)]
pub struct NotePlan {
    pub note_id: String,
    pub action: SyncAction,
    pub deck: String,
    pub model: String,
    pub fields: Fields,
    pub desired_tags: BTreeSet<ManagedTag>,
    /// `None` while the remote tags have not been fetched
    pub tags: Option<TagPlan>,
}

#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct SyncedNote {
    pub note_id: String,
    pub remote_id: u64,
    pub created: bool,
    pub fields_written: bool,
    pub tags: TagPlan,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<SyncedNote>,
    pub errors: Vec<NoteError>,
}

fn resolve(record: &ImportRecord, mapping: &MappingTable) -> Result<SyncAction> {
    match (mapping.get(&record.note_id), record.remote_id) {
        (Some(known), Some(given)) if known != given => Err(Error {
            kind: ErrorKind::MappingInconsistency,
            desc: format!("record says remote note {} but the mapping table says {}", given, known),
            detail: None,
        }),
        (Some(known), _) => Ok(SyncAction::Update { remote_id: known, adopt: false }),
        (None, Some(given)) => Ok(SyncAction::Update { remote_id: given, adopt: true }),
        (None, None) => Ok(SyncAction::Create),
    }
}

/// Decide create or update for every record without touching the store.
/// A new note starts with no tags, so its tag plan is already exact.
pub fn plan(records: &[ImportRecord], mapping: &MappingTable) -> (Vec<NotePlan>, Vec<NoteError>) {
    let mut plans = vec![];
    let mut errors = vec![];
    for r in records.iter() {
        let action = match resolve(r, mapping) {
            Ok(a) => a,
            Err(e) => {
                errors.push(NoteError::new(&r.note_id, e));
                continue;
            }
        };
        let tags = match action {
            SyncAction::Create => Some(reconcile(&BTreeSet::new(), &r.tags)),
            SyncAction::Update { .. } => None,
        };
        plans.push(NotePlan {
            note_id: r.note_id.clone(),
            action: action,
            deck: r.deck.clone(),
            model: r.model.clone(),
            fields: r.fields.clone(),
            desired_tags: r.tags.clone(),
            tags: tags,
        });
    }
    (plans, errors)
}

/// Applies note plans against a store, keeping the mapping table current.
pub struct SyncApplier<'a, S: NoteStore> {
    store: &'a mut S,
    mapping: &'a mut MappingTable,
}

impl<'a, S: NoteStore> SyncApplier<'a, S> {
    pub fn new(store: &'a mut S, mapping: &'a mut MappingTable) -> SyncApplier<'a, S> {
        SyncApplier {
            store: store,
            mapping: mapping,
        }
    }

    /// Apply every plan. Store and io failures abort the batch; anything
    /// already applied is safe to apply again on the next run.
    pub fn apply(&mut self, plans: &[NotePlan]) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for p in plans.iter() {
            match self.apply_one(p) {
                Ok(done) => {
                    info!(note_id = %done.note_id, remote_id = done.remote_id, created = done.created,
                          added = done.tags.add.len(), removed = done.tags.remove.len(), "synced");
                    report.synced.push(done);
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    warn!(note_id = %p.note_id, error = %e, "note not synced");
                    report.errors.push(NoteError::new(&p.note_id, e));
                }
            }
        }
        Ok(report)
    }

    fn apply_one(&mut self, p: &NotePlan) -> Result<SyncedNote> {
        let (remote_id, created, fields_written) = match p.action {
            SyncAction::Update { remote_id, adopt } => {
                let current = match self.store.note_info(remote_id)? {
                    Some(n) => n,
                    None => return kind_fail!(MappingInconsistency,
                                              format!("remote note {} no longer exists; not re-creating it", remote_id)),
                };
                let unknown: Vec<&str> = p.fields.keys()
                                                 .filter(|f| !current.fields.contains_key(*f))
                                                 .map(|f| f.as_str())
                                                 .collect();
                if !unknown.is_empty() {
                    return kind_fail!(MalformedSource,
                                      format!("remote note {} has no field(s) {}", remote_id, unknown.join(", ")));
                }
                if adopt {
                    self.mapping.record(&p.note_id, remote_id)?;
                }
                let changed = p.fields.iter().any(|(k, v)| current.fields.get(k) != Some(v));
                if changed {
                    // all fields in one call so no field write can shadow another
                    self.store.update(remote_id, &p.fields)?;
                } else {
                    debug!(note_id = %p.note_id, "fields unchanged");
                }
                (remote_id, false, changed)
            }
            SyncAction::Create => {
                let tags: BTreeSet<String> = p.desired_tags.iter().map(|t| t.to_string()).collect();
                let remote_id = self.store.create(&p.deck, &p.model, &p.fields, &tags)?;
                self.mapping.record(&p.note_id, remote_id)?;
                (remote_id, true, true)
            }
        };

        let before = self.store.get_tags(remote_id)?;
        let tags = reconcile(&before, &p.desired_tags);
        if !tags.is_empty() {
            // additions first: an interrupted run leaves extra stale tags,
            // never a missing desired one
            if !tags.add.is_empty() {
                self.store.add_tags(remote_id, &tags.add)?;
            }
            if !tags.remove.is_empty() {
                self.store.remove_tags(remote_id, &tags.remove)?;
            }
            let after = self.store.get_tags(remote_id)?;
            let expected = tags.apply(&before);
            if after != expected {
                let missing: BTreeSet<&String> = expected.difference(&after).collect();
                let extra: BTreeSet<&String> = after.difference(&expected).collect();
                return Err(Error {
                    kind: ErrorKind::PartialApply,
                    desc: format!("tags on remote note {} differ from the applied plan", remote_id),
                    detail: Some(format!("missing: [{}] unexpected: [{}]", join_tags(missing), join_tags(extra))),
                });
            }
        }

        Ok(SyncedNote {
            note_id: p.note_id.clone(),
            remote_id: remote_id,
            created: created,
            fields_written: fields_written,
            tags: tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::managed_tags;

    fn record(id: &str, remote: Option<u64>) -> ImportRecord {
        ImportRecord {
            note_id: id.to_string(),
            remote_id: remote,
            deck: "D".to_string(),
            model: "Basic".to_string(),
            tags: managed_tags("sensory").unwrap(),
            fields: Fields::new(),
        }
    }

    #[test]
    fn unknown_notes_are_created_with_an_exact_tag_plan() {
        let (plans, errors) = plan(&[record("A", None)], &MappingTable::default());
        assert!(errors.is_empty());
        assert_eq!(plans[0].action, SyncAction::Create);
        let tags = plans[0].tags.as_ref().unwrap();
        assert!(tags.add.contains("topic:sensory"));
        assert!(tags.remove.is_empty());
    }

    #[test]
    fn mapping_table_decides_updates() {
        let mut mapping = MappingTable::default();
        mapping.bind("A", 11).unwrap();
        let (plans, _) = plan(&[record("A", None), record("B", Some(22))], &mapping);
        assert_eq!(plans[0].action, SyncAction::Update { remote_id: 11, adopt: false });
        assert_eq!(plans[1].action, SyncAction::Update { remote_id: 22, adopt: true });
        assert!(plans[0].tags.is_none());
    }

    #[test]
    fn disagreeing_remote_id_is_a_mapping_inconsistency() {
        let mut mapping = MappingTable::default();
        mapping.bind("A", 11).unwrap();
        let (plans, errors) = plan(&[record("A", Some(12))], &mapping);
        assert!(plans.is_empty());
        assert!(matches!(errors[0].error.kind, ErrorKind::MappingInconsistency));
    }
}
