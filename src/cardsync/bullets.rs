//! Rewrite `;`-separated answers into bullet lines for notes that ask for it.
//!
//! A note opts in with a `format_bullets` or `special-formatting` tag. Every
//! rewrite is collected so it can be written out as a before/after review
//! document next to the formatted records.

use std::collections::BTreeSet;
use std::fmt::Write;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::errors::Result;
use crate::record::ImportRecord;

pub const BULLET_TAGS: [&str; 2] = ["format_bullets", "special-formatting"];
pub const BULLET: &str = "• ";
pub const DEFAULT_BULLET_FIELD: &str = "Back";

#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct BulletChange {
    pub note_id: String,
    pub field: String,
    pub before: String,
    pub after: String,
}

pub fn wants_bullets(record: &ImportRecord) -> bool {
    record.tags.iter().any(|t| BULLET_TAGS.contains(&t.rest.as_str()))
}

/// split on `;`, except the ones closing an HTML entity such as `&amp;`
fn split_items(text: &str, entity: &Regex) -> Option<Vec<String>> {
    let closers: BTreeSet<usize> = entity.find_iter(text).map(|m| m.end() - 1).collect();
    let mut items = vec![];
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == ';' && !closers.contains(&i) {
            items.push(&text[start..i]);
            start = i + 1;
        }
    }
    if items.is_empty() {
        return None;
    }
    items.push(&text[start..]);
    Some(items.iter()
              .map(|s| s.trim())
              .filter(|s| !s.is_empty())
              .map(|s| s.to_string())
              .collect())
}

/// Bullet form of one field value, `None` when there is nothing to split.
/// A single enclosing paragraph is kept around the bullet lines.
pub fn to_bullets(value: &str) -> Result<Option<String>> {
    let entity = Regex::new(r"&#?[A-Za-z0-9]+;")?;
    let trimmed = value.trim();
    let paragraph = trimmed.strip_prefix("<p>")
                           .and_then(|s| s.strip_suffix("</p>"))
                           .filter(|inner| !inner.contains("<p>"));
    let inner = paragraph.unwrap_or(trimmed);

    let items = match split_items(inner, &entity) {
        Some(items) if !items.is_empty() => items,
        _ => return Ok(None),
    };
    let lines: Vec<String> = items.iter().map(|i| format!("{}{}", BULLET, i)).collect();
    let body = lines.join("<br>\n");
    Ok(Some(match paragraph {
        Some(_) => format!("<p>{}</p>", body),
        None => body,
    }))
}

/// Rewrite `field` of every opted-in record in place.
pub fn format_bullets(records: &mut [ImportRecord], field: &str) -> Result<Vec<BulletChange>> {
    let mut changes = vec![];
    for r in records.iter_mut().filter(|r| wants_bullets(r)) {
        let before = match r.fields.get(field) {
            Some(v) => v.clone(),
            None => continue,
        };
        if let Some(after) = to_bullets(&before)? {
            debug!(note_id = %r.note_id, field = %field, "formatted as bullets");
            r.fields.insert(field.to_string(), after.clone());
            changes.push(BulletChange {
                note_id: r.note_id.clone(),
                field: field.to_string(),
                before: before,
                after: after,
            });
        }
    }
    Ok(changes)
}

pub fn review_markdown(changes: &[BulletChange]) -> Result<String> {
    let mut out = String::from("# Formatting Review\n\n");
    for c in changes.iter() {
        write!(out, "## {}\n\n### BEFORE\n{}\n\n### AFTER\n{}\n\n---\n\n", c.note_id, c.before, c.after)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Fields;
    use crate::tags::managed_tags;

    fn record(id: &str, tags: &str, back: &str) -> ImportRecord {
        let mut fields = Fields::new();
        fields.insert("Front".to_string(), "<p>q; still the question</p>".to_string());
        fields.insert("Back".to_string(), back.to_string());
        ImportRecord {
            note_id: id.to_string(),
            remote_id: None,
            deck: "D".to_string(),
            model: "Basic".to_string(),
            tags: managed_tags(tags).unwrap(),
            fields: fields,
        }
    }

    #[test]
    fn answers_split_into_bullet_lines() {
        assert_eq!(to_bullets("<p>red; green ; ;yellow</p>").unwrap().unwrap(),
                   "<p>• red<br>\n• green<br>\n• yellow</p>");
        assert_eq!(to_bullets("one;two").unwrap().unwrap(), "• one<br>\n• two");
        assert_eq!(to_bullets("<p>no separators</p>").unwrap(), None);
    }

    #[test]
    fn entities_are_not_separators() {
        assert_eq!(to_bullets("<p>salt &amp; pepper; oil</p>").unwrap().unwrap(),
                   "<p>• salt &amp; pepper<br>\n• oil</p>");
        assert_eq!(to_bullets("<p>fish &amp; chips</p>").unwrap(), None);
    }

    #[test]
    fn only_tagged_notes_change_and_formatting_is_stable() {
        let mut records = vec![
            record("A", "sensory; format_bullets", "<p>crisp; sweet</p>"),
            record("B", "sensory", "<p>crisp; sweet</p>"),
            record("C", "special-formatting", "<p>single answer</p>"),
        ];
        let changes = format_bullets(&mut records, "Back").unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].note_id, "A");
        assert_eq!(records[0].fields["Back"], "<p>• crisp<br>\n• sweet</p>");
        assert_eq!(records[0].fields["Front"], "<p>q; still the question</p>");
        assert_eq!(records[1].fields["Back"], "<p>crisp; sweet</p>");

        assert!(format_bullets(&mut records, "Back").unwrap().is_empty());
    }

    #[test]
    fn review_shows_before_and_after() {
        let mut records = vec![record("FRUIT-0001", "format_bullets", "<p>red; green</p>")];
        let changes = format_bullets(&mut records, "Back").unwrap();
        assert_eq!(review_markdown(&changes).unwrap(),
                   "# Formatting Review\n\n\
                    ## FRUIT-0001\n\n\
                    ### BEFORE\n<p>red; green</p>\n\n\
                    ### AFTER\n<p>• red<br>\n• green</p>\n\n---\n\n");
        assert_eq!(review_markdown(&[]).unwrap(), "# Formatting Review\n\n");
    }
}
