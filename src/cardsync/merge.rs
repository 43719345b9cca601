use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::errors::{Error, ErrorKind, NoteError};
use crate::extract::Fields;
use crate::record::{BaseRecord, ImportRecord};
use crate::tags::managed_tags;

/// Records that joined cleanly, plus one error per note that did not.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub records: Vec<ImportRecord>,
    pub errors: Vec<NoteError>,
}

/// Inner-join base records with derived fields by Note_ID.
///
/// A note present on only one side is a join mismatch. Canonical tags are
/// mapped to managed tags here, so a bad tag string fails only its note.
/// Records come out sorted by Note_ID.
pub fn merge(base: &[BaseRecord], derived: &BTreeMap<String, Fields>) -> MergeOutcome {
    let mut out = MergeOutcome::default();
    let base_ids: BTreeSet<&str> = base.iter().map(|b| b.note_id.as_str()).collect();

    let mut sorted: Vec<&BaseRecord> = base.iter().collect();
    sorted.sort_by(|a, b| a.note_id.cmp(&b.note_id));

    for b in sorted {
        let extra = match derived.get(&b.note_id) {
            Some(f) => f,
            None => {
                out.errors.push(NoteError::new(&b.note_id, Error::new(
                    ErrorKind::JoinMismatch,
                    "base record has no derived fields".to_string())));
                continue;
            }
        };
        let tags = match managed_tags(&b.tags) {
            Ok(t) => t,
            Err(e) => {
                out.errors.push(NoteError::new(&b.note_id, e));
                continue;
            }
        };

        let mut fields = b.fields.clone();
        for (name, value) in extra.iter() {
            if fields.insert(name.clone(), value.clone()).is_some() {
                warn!(note_id = %b.note_id, field = %name, "derived field overrides base field");
            }
        }
        debug!(note_id = %b.note_id, fields = fields.len(), tags = tags.len(), "merged record");

        out.records.push(ImportRecord {
            note_id: b.note_id.clone(),
            remote_id: b.remote_id,
            deck: b.deck.clone(),
            model: b.model.clone(),
            tags: tags,
            fields: fields,
        });
    }

    for note_id in derived.keys().filter(|k| !base_ids.contains(k.as_str())) {
        out.errors.push(NoteError::new(note_id, Error::new(
            ErrorKind::JoinMismatch,
            "derived fields have no base record".to_string())));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(id: &str, tags: &str) -> BaseRecord {
        BaseRecord {
            note_id: id.to_string(),
            remote_id: None,
            deck: "Fruit".to_string(),
            model: "Basic".to_string(),
            tags: tags.to_string(),
            fields: Fields::new(),
        }
    }

    fn derived(ids: &[&str]) -> BTreeMap<String, Fields> {
        ids.iter()
           .map(|id| {
               let mut f = Fields::new();
               f.insert("Front".to_string(), format!("<p>{}</p>", id));
               (id.to_string(), f)
           })
           .collect()
    }

    fn mismatches(out: &MergeOutcome) -> BTreeSet<String> {
        out.errors.iter()
           .filter(|e| matches!(e.error.kind, ErrorKind::JoinMismatch))
           .map(|e| e.note_id.clone())
           .collect()
    }

    #[test]
    fn equal_key_sets_merge_without_errors() {
        let out = merge(&[base("B", "sensory"), base("A", "ch:1")], &derived(&["A", "B"]));
        assert!(out.errors.is_empty());
        assert_eq!(out.records.iter().map(|r| r.note_id.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(out.records[0].fields["Front"], "<p>A</p>");
        assert_eq!(out.records[0].tags.iter().next().unwrap().to_string(), "src:ch:1");
    }

    #[test]
    fn mismatches_are_exactly_the_symmetric_difference() {
        let out = merge(&[base("A", ""), base("B", ""), base("C", "")], &derived(&["B", "C", "D", "E"]));
        let expected: BTreeSet<String> = ["A", "D", "E"].iter().map(|s| s.to_string()).collect();
        assert_eq!(mismatches(&out), expected);
        assert_eq!(out.records.len(), 2);
    }

    #[test]
    fn bad_tags_fail_only_that_note() {
        let out = merge(&[base("A", "author:x"), base("B", "sensory")], &derived(&["A", "B"]));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].note_id, "A");
        assert!(matches!(out.errors[0].error.kind, ErrorKind::MalformedSource));
    }

    #[test]
    fn derived_fields_sit_beside_base_fields() {
        let mut b = base("A", "");
        b.fields.insert("Source".to_string(), "textbook".to_string());
        let out = merge(&[b], &derived(&["A"]));
        assert_eq!(out.records[0].fields.len(), 2);
        assert_eq!(out.records[0].fields["Source"], "textbook");
    }
}
