//! Source notes to import records: render, extract, merge.
//!
//! Every stage is a pure function of the previous artifact. Each note gets a
//! fresh [`NoteRun`] per invocation that only ever moves forward.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, NoteError, Result};
use crate::extract::{extract_collection, extract_note, Fields, SectionSpec};
use crate::merge::merge;
use crate::record::{BaseRecord, ImportRecord};
use crate::render::{Rendered, Renderer};
use crate::source::load_note;

#[derive(Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sourced,
    Rendered,
    Extracted,
    Synced,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
               "{}",
               match *self {
                   Stage::Sourced => "sourced",
                   Stage::Rendered => "rendered",
                   Stage::Extracted => "extracted",
                   Stage::Synced => "synced",
               })
    }
}

/// Progress of one note through a single pipeline run.
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct NoteRun {
    pub note_id: String,
    pub stage: Stage,
}

impl NoteRun {
    pub fn new(note_id: &str) -> NoteRun {
        NoteRun {
            note_id: note_id.to_string(),
            stage: Stage::Sourced,
        }
    }

    /// move to the next stage; stages cannot be skipped or revisited
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        let next = match self.stage {
            Stage::Sourced => Some(Stage::Rendered),
            Stage::Rendered => Some(Stage::Extracted),
            Stage::Extracted => Some(Stage::Synced),
            Stage::Synced => None,
        };
        if next != Some(to) {
            return kind_fail!(Generic,
                              format!("note {} cannot move from {} to {}", self.note_id, self.stage, to));
        }
        debug!(note_id = %self.note_id, stage = %to, "stage");
        self.stage = to;
        Ok(())
    }
}

/// Everything one export run produced, kept for inspection.
#[derive(Debug, Default)]
pub struct ExportOutput {
    pub rendered: BTreeMap<String, Rendered>,
    pub records: Vec<ImportRecord>,
    pub runs: BTreeMap<String, NoteRun>,
    pub errors: Vec<NoteError>,
}

/// Render and extract canonical note files, then merge them with their
/// own front matter into import records.
pub fn export_notes(paths: &[PathBuf], renderer: &Renderer, sections: &[SectionSpec]) -> Result<ExportOutput> {
    let mut out = ExportOutput::default();
    let mut base: Vec<BaseRecord> = vec![];
    let mut derived: BTreeMap<String, Fields> = BTreeMap::new();

    for path in paths.iter() {
        let note = match load_note(path) {
            Ok(n) => n,
            Err(e) if e.is_batch_fatal() => return Err(e),
            Err(e) => {
                out.errors.push(NoteError::new(&path.display().to_string(), e));
                continue;
            }
        };
        if out.runs.contains_key(&note.note_id) {
            out.errors.push(NoteError::new(&note.note_id, Error::new(
                ErrorKind::MalformedSource,
                format!("duplicate note_id, also defined before {}", path.display()))));
            continue;
        }
        let mut run = NoteRun::new(&note.note_id);

        let rendered = match renderer.render(&note.body) {
            Ok(r) => r,
            Err(e) if e.is_batch_fatal() => return Err(e),
            Err(e) => {
                out.errors.push(NoteError::new(&note.note_id, e));
                out.runs.insert(note.note_id.clone(), run);
                continue;
            }
        };
        run.advance(Stage::Rendered)?;

        match extract_note(&note.note_id, &rendered.html, sections) {
            Ok(fields) => {
                run.advance(Stage::Extracted)?;
                derived.insert(note.note_id.clone(), fields);
                base.push(note.base_record());
            }
            Err(e) => out.errors.push(NoteError::new(&note.note_id, e)),
        }
        out.rendered.insert(note.note_id.clone(), rendered);
        out.runs.insert(note.note_id.clone(), run);
    }

    let merged = merge(&base, &derived);
    out.records = merged.records;
    out.errors.extend(merged.errors);
    info!(notes = paths.len(), records = out.records.len(), errors = out.errors.len(), "export finished");
    Ok(out)
}

/// Render a collection document when it is Markdown, then extract it.
pub fn extract_document(path: &Path, text: &str, renderer: &Renderer, sections: &[SectionSpec])
                        -> Result<(BTreeMap<String, Fields>, Vec<NoteError>)> {
    let html = if path.extension().map_or(false, |e| e == "md" || e == "markdown") {
        renderer.render(text)?.html
    } else {
        text.to_string()
    };
    let extraction = extract_collection(&html, sections)?;
    Ok((extraction.fields, extraction.errors))
}
