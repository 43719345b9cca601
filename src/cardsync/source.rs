//! Canonical note files: YAML front matter followed by a Markdown body.
//!
//! ```text
//! ---
//! note_id: FRUIT-0001
//! anki:
//!   deck: Fruit::Sensory
//!   model: Basic
//! tags: "textbook:яблуко; ch:2.8.6; sensory"
//! fields:
//!   Source: chapter 2
//! ---
//! ## FRONT
//! ...
//! ## BACK
//! ...
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use walkdir::WalkDir;

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, Result};
use crate::record::BaseRecord;

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct AnkiTarget {
    pub deck: String,
    pub model: String,
}

#[derive(Deserialize)]
struct FrontMatter {
    #[serde(default)]
    note_id: String,
    anki: Option<AnkiTarget>,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// One canonical note as read from disk.
#[derive(Clone, PartialEq, Debug)]
pub struct SourceNote {
    pub path: PathBuf,
    pub note_id: String,
    pub target: AnkiTarget,
    pub tags: String,
    pub fields: BTreeMap<String, String>,
    pub body: String,
}

impl SourceNote {
    /// the authoritative half of the note, ready for merging
    pub fn base_record(&self) -> BaseRecord {
        BaseRecord {
            note_id: self.note_id.clone(),
            remote_id: None,
            deck: self.target.deck.clone(),
            model: self.target.model.clone(),
            tags: self.tags.clone(),
            fields: self.fields.clone(),
        }
    }
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn require(value: &str, label: &str, path: &Path) -> Result<String> {
    if value.trim().is_empty() {
        return kind_fail!(MalformedSource, format!("missing required '{}' in {}", label, path.display()));
    }
    Ok(value.trim().to_string())
}

pub fn parse_note(path: &Path, text: &str) -> Result<SourceNote> {
    let (meta, body) = match split_front_matter(text) {
        Some(parts) => parts,
        None => return kind_fail!(MalformedSource,
                                  format!("{} has no front matter block", path.display())),
    };
    let front: FrontMatter = serde_yaml::from_str(meta).map_err(|e| Error {
        kind: ErrorKind::MalformedSource,
        desc: format!("invalid front matter in {}", path.display()),
        detail: Some(e.to_string()),
    })?;

    let note_id = require(&front.note_id, "note_id", path)?;
    let target = match front.anki {
        Some(t) => AnkiTarget {
            deck: require(&t.deck, "anki.deck", path)?,
            model: require(&t.model, "anki.model", path)?,
        },
        None => return kind_fail!(MalformedSource, format!("missing required 'anki' in {}", path.display())),
    };

    Ok(SourceNote {
        path: path.to_path_buf(),
        note_id: note_id,
        target: target,
        tags: front.tags,
        fields: front.fields,
        body: body.to_string(),
    })
}

pub fn load_note(path: &Path) -> Result<SourceNote> {
    let text = fs::read_to_string(path)?;
    parse_note(path, &text)
}

fn collect_markdown(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = vec![];
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && entry.path().extension().map_or(false, |e| e == "md") {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Expand inputs into note files: directories are searched recursively for
/// `*.md`, files are taken as given. Sorted per input, duplicates dropped.
pub fn discover(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = vec![];
    let mut seen = BTreeSet::new();
    for input in inputs.iter() {
        let found = if input.is_dir() {
            collect_markdown(input)?
        } else if input.is_file() {
            vec![input.clone()]
        } else {
            return kind_fail!(MalformedSource, format!("{} does not exist", input.display()));
        };
        for path in found {
            let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if seen.insert(key) {
                out.push(path);
            }
        }
    }
    Ok(out)
}
