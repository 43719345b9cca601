//! Slice rendered HTML into per-note field values.
//!
//! A single note's HTML is split on `<h2>` section markers (`FRONT`,
//! `BACK`, ...). A collection document carries one note per `<h2>` whose
//! text is the Note_ID, with the section markers one level down at `<h3>`.
//! A section's content runs until the next heading at the same or a
//! shallower level, so sub-headings inside an answer stay in the field.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, NoteError, Result};

pub type Fields = BTreeMap<String, String>;

/// heading level of section markers inside a single note
pub const NOTE_SECTION_LEVEL: usize = 2;
/// heading level of the Note_ID headings in a collection document
pub const COLLECTION_NOTE_LEVEL: usize = 2;
/// heading level of section markers inside a collection document
pub const COLLECTION_SECTION_LEVEL: usize = 3;

/// Maps a section marker heading to the field it fills.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct SectionSpec {
    pub marker: String,
    pub field: String,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

impl SectionSpec {
    pub fn new(marker: &str, field: &str, required: bool) -> SectionSpec {
        SectionSpec {
            marker: marker.to_string(),
            field: field.to_string(),
            required: required,
        }
    }

    fn matches(&self, title: &str) -> bool {
        self.marker.trim().to_uppercase() == title.to_uppercase()
    }
}

pub fn default_sections() -> Vec<SectionSpec> {
    vec![SectionSpec::new("FRONT", "Front", true),
         SectionSpec::new("BACK", "Back", true)]
}

/// Fields extracted from a collection document, with per-note failures.
#[derive(Debug, Default)]
pub struct Extraction {
    pub fields: BTreeMap<String, Fields>,
    pub errors: Vec<NoteError>,
}

#[derive(Clone, Debug)]
struct Heading {
    level: usize,
    title: String,
    start: usize,
    end: usize,
}

fn headings(html: &str) -> Result<Vec<Heading>> {
    let re = Regex::new(r"(?is)<h([1-6])(?:\s[^>]*)?>(.*?)</h[1-6]\s*>")?;
    let tag_re = Regex::new(r"<[^>]+>")?;
    let mut found = vec![];
    for caps in re.captures_iter(html) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let level = caps[1].parse::<usize>().unwrap_or(6);
        let inner = tag_re.replace_all(&caps[2], "");
        found.push(Heading {
            level: level,
            title: collapse_whitespace(&unescape_basic(&inner)),
            start: whole.start(),
            end: whole.end(),
        });
    }
    Ok(found)
}

fn unescape_basic(s: &str) -> String {
    s.replace("&lt;", "<")
     .replace("&gt;", ">")
     .replace("&quot;", "\"")
     .replace("&#39;", "'")
     .replace("&nbsp;", " ")
     .replace("&amp;", "&")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// slice the sections found at `level` between byte offsets `scope`
fn slice_sections(note_id: &str,
                  html: &str,
                  heads: &[Heading],
                  scope: (usize, usize),
                  level: usize,
                  sections: &[SectionSpec])
                  -> Result<Fields> {
    let in_scope: Vec<&Heading> = heads.iter()
                                       .filter(|h| h.start >= scope.0 && h.end <= scope.1)
                                       .collect();
    let mut fields = Fields::new();

    for (i, head) in in_scope.iter().enumerate() {
        if head.level != level {
            continue;
        }
        let spec = match sections.iter().find(|s| s.matches(&head.title)) {
            Some(s) => s,
            None => continue,
        };
        let end = in_scope[i + 1..].iter()
                                   .find(|h| h.level <= level)
                                   .map_or(scope.1, |h| h.start);
        let content = html[head.end..end].trim().to_string();
        if fields.insert(spec.field.clone(), content).is_some() {
            return kind_fail!(MalformedSource,
                              format!("section {} appears more than once in note {}", spec.marker, note_id));
        }
    }

    for spec in sections.iter().filter(|s| s.required) {
        if !fields.contains_key(&spec.field) {
            return Err(Error {
                kind: ErrorKind::MalformedSource,
                desc: format!("missing required section {}", spec.marker),
                detail: Some(format!("note {}", note_id)),
            });
        }
    }
    Ok(fields)
}

/// extract the sections of one rendered note
pub fn extract_note(note_id: &str, html: &str, sections: &[SectionSpec]) -> Result<Fields> {
    let heads = headings(html)?;
    slice_sections(note_id, html, &heads, (0, html.len()), NOTE_SECTION_LEVEL, sections)
}

/// extract every note of a rendered collection document
pub fn extract_collection(html: &str, sections: &[SectionSpec]) -> Result<Extraction> {
    let heads = headings(html)?;
    let note_heads: Vec<&Heading> = heads.iter()
                                         .filter(|h| h.level <= COLLECTION_NOTE_LEVEL)
                                         .collect();
    let mut out = Extraction::default();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();

    for (i, head) in note_heads.iter().enumerate() {
        if head.level != COLLECTION_NOTE_LEVEL || head.title.is_empty() {
            continue;
        }
        let note_id = head.title.clone();
        let scope_end = note_heads.get(i + 1).map_or(html.len(), |h| h.start);
        *seen.entry(note_id.clone()).or_insert(0) += 1;

        match slice_sections(&note_id, html, &heads, (head.end, scope_end),
                             COLLECTION_SECTION_LEVEL, sections) {
            Ok(fields) => {
                debug!(note_id = %note_id, fields = fields.len(), "extracted note");
                out.fields.insert(note_id, fields);
            }
            Err(e) => out.errors.push(NoteError::new(&note_id, e)),
        }
    }

    for (note_id, count) in seen.into_iter().filter(|(_, c)| *c > 1) {
        out.fields.remove(&note_id);
        out.errors.push(NoteError::new(&note_id, Error::new(
            ErrorKind::MalformedSource,
            format!("note heading appears {} times", count))));
    }
    Ok(out)
}
