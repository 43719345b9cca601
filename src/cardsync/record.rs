//! Tab separated record files: base, derived and import sets.
//!
//! Every file has one header row and one record per physical line. Tabs,
//! newlines and backslashes inside a value are written as `\t`, `\n` and
//! `\\` so HTML with embedded newlines survives a round trip.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, NoteError, Result};
use crate::extract::Fields;
use crate::tags::{parse_managed_list, join_tags, ManagedTag};

pub const NOTE_ID: &str = "note_id";
pub const REMOTE_ID: &str = "noteId";
pub const DECK: &str = "deck";
pub const MODEL: &str = "model";
pub const TAGS: &str = "tags";

const RESERVED: [&str; 5] = [NOTE_ID, REMOTE_ID, DECK, MODEL, TAGS];

/// A parsed TSV file with unescaped values.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Table {
        Table {
            columns: columns,
            rows: vec![],
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn require(&self, name: &str) -> Result<usize> {
        match self.column(name) {
            Some(i) => Ok(i),
            None => kind_fail!(MalformedSource, format!("missing required column '{}'", name)),
        }
    }

    /// render back to TSV text, always ending in a newline
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.columns.iter().map(|c| escape(c)).collect::<Vec<_>>().join("\t"));
        out.push('\n');
        for row in self.rows.iter() {
            out.push_str(&row.iter().map(|v| escape(v)).collect::<Vec<_>>().join("\t"));
            out.push('\n');
        }
        out
    }
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.replace("\r\n", "\n").chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub fn parse_table(text: &str) -> Result<Table> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines().enumerate();
    let columns: Vec<String> = match lines.next() {
        Some((_, header)) if !header.trim().is_empty() => header.split('\t').map(unescape).collect(),
        _ => return kind_fail!(MalformedSource, "TSV has no header row".to_string()),
    };

    let mut table = Table::new(columns);
    for (i, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<String> = line.split('\t').map(unescape).collect();
        if row.len() != table.columns.len() {
            return Err(Error {
                kind: ErrorKind::MalformedSource,
                desc: format!("line {} has {} columns, header has {}", i + 1, row.len(), table.columns.len()),
                detail: None,
            });
        }
        table.rows.push(row);
    }
    Ok(table)
}

pub fn read_table(path: &Path) -> Result<Table> {
    let text = fs::read_to_string(path)?;
    parse_table(&text).map_err(|mut e| {
        e.detail = Some(path.display().to_string());
        e
    })
}

fn parse_remote_id(value: &str, note_id: &str) -> Result<Option<u64>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u64>() {
        Ok(id) => Ok(Some(id)),
        Err(_) => kind_fail!(MalformedSource,
                             format!("noteId '{}' of note {} is not a number", value, note_id)),
    }
}

/// note ids in a table, refusing blanks and duplicates
fn note_ids(table: &Table) -> Result<Vec<String>> {
    let idx = table.require(NOTE_ID)?;
    let mut seen = BTreeSet::new();
    let mut ids = vec![];
    for (i, row) in table.rows.iter().enumerate() {
        let id = row[idx].trim().to_string();
        if id.is_empty() {
            return kind_fail!(MalformedSource, format!("row {} has an empty note_id", i + 1));
        }
        if !seen.insert(id.clone()) {
            return kind_fail!(MalformedSource, format!("note_id {} appears more than once", id));
        }
        ids.push(id);
    }
    Ok(ids)
}

fn field_columns(table: &Table) -> Vec<(usize, String)> {
    table.columns.iter()
                 .enumerate()
                 .filter(|(_, c)| !RESERVED.contains(&c.as_str()))
                 .map(|(i, c)| (i, c.clone()))
                 .collect()
}

/// The fields one row supplies. Columns are the union over every record, so
/// an empty cell means the note does not carry that field.
fn row_fields(columns: &[(usize, String)], row: &[String]) -> Fields {
    columns.iter()
           .filter(|(i, _)| !row[*i].is_empty())
           .map(|(i, c)| (c.clone(), row[*i].clone()))
           .collect()
}

/// Authoritative per-note values: where the note goes and how it is tagged.
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct BaseRecord {
    pub note_id: String,
    pub remote_id: Option<u64>,
    pub deck: String,
    pub model: String,
    /// canonical semicolon separated tag string
    pub tags: String,
    pub fields: Fields,
}

/// A complete record ready to be synced.
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct ImportRecord {
    pub note_id: String,
    pub remote_id: Option<u64>,
    pub deck: String,
    pub model: String,
    pub tags: BTreeSet<ManagedTag>,
    pub fields: Fields,
}

pub fn base_from_table(table: &Table) -> Result<Vec<BaseRecord>> {
    let ids = note_ids(table)?;
    let remote = table.column(REMOTE_ID);
    let deck = table.require(DECK)?;
    let model = table.require(MODEL)?;
    let tags = table.require(TAGS)?;
    let fields = field_columns(table);

    let mut out = vec![];
    for (row, note_id) in table.rows.iter().zip(ids.into_iter()) {
        let remote_id = match remote {
            Some(i) => parse_remote_id(&row[i], &note_id)?,
            None => None,
        };
        out.push(BaseRecord {
            remote_id: remote_id,
            deck: row[deck].clone(),
            model: row[model].clone(),
            tags: row[tags].clone(),
            fields: row_fields(&fields, row),
            note_id: note_id,
        });
    }
    Ok(out)
}

/// derived field values keyed by note id
pub fn derived_from_table(table: &Table) -> Result<BTreeMap<String, Fields>> {
    let ids = note_ids(table)?;
    let fields = field_columns(table);
    Ok(table.rows.iter()
                 .zip(ids.into_iter())
                 .map(|(row, id)| (id, row_fields(&fields, row)))
                 .collect())
}

pub fn derived_to_table(derived: &BTreeMap<String, Fields>) -> Table {
    let names: BTreeSet<&String> = derived.values().flat_map(|f| f.keys()).collect();
    let mut columns = vec![NOTE_ID.to_string()];
    columns.extend(names.iter().map(|n| n.to_string()));
    let mut table = Table::new(columns);
    for (id, fields) in derived.iter() {
        let mut row = vec![id.clone()];
        row.extend(names.iter().map(|n| fields.get(*n).cloned().unwrap_or_default()));
        table.rows.push(row);
    }
    table
}

/// Import records from a table; rows with bad tags or ids are per-note errors.
pub fn import_from_table(table: &Table) -> Result<(Vec<ImportRecord>, Vec<NoteError>)> {
    let ids = note_ids(table)?;
    let remote = table.column(REMOTE_ID);
    let deck = table.require(DECK)?;
    let model = table.require(MODEL)?;
    let tags = table.require(TAGS)?;
    let fields = field_columns(table);

    let mut records = vec![];
    let mut errors = vec![];
    for (row, note_id) in table.rows.iter().zip(ids.into_iter()) {
        let parsed = remote.map_or(Ok(None), |i| parse_remote_id(&row[i], &note_id))
                           .and_then(|rid| parse_managed_list(&row[tags]).map(|t| (rid, t)));
        match parsed {
            Ok((remote_id, tag_set)) => records.push(ImportRecord {
                remote_id: remote_id,
                deck: row[deck].clone(),
                model: row[model].clone(),
                tags: tag_set,
                fields: row_fields(&fields, row),
                note_id: note_id,
            }),
            Err(e) => errors.push(NoteError::new(&note_id, e)),
        }
    }
    Ok((records, errors))
}

pub fn import_to_table(records: &[ImportRecord]) -> Table {
    let names: BTreeSet<&String> = records.iter().flat_map(|r| r.fields.keys()).collect();
    let mut columns: Vec<String> = RESERVED.iter().map(|c| c.to_string()).collect();
    columns.extend(names.iter().map(|n| n.to_string()));
    let mut table = Table::new(columns);
    for r in records.iter() {
        let mut row = vec![
            r.note_id.clone(),
            r.remote_id.map(|id| id.to_string()).unwrap_or_default(),
            r.deck.clone(),
            r.model.clone(),
            join_tags(&r.tags),
        ];
        row.extend(names.iter().map(|n| r.fields.get(*n).cloned().unwrap_or_default()));
        table.rows.push(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_survives_html_with_newlines() {
        let value = "<p>a\tb</p>\n<pre>C:\\dir\\n</pre>";
        assert_eq!(unescape(&escape(value)), value);
        assert!(!escape(value).contains('\n'));
        assert!(!escape(value).contains('\t'));
    }

    #[test]
    fn rows_must_match_the_header() {
        let err = parse_table("note_id\tdeck\nA\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedSource));
        assert!(err.desc.contains("line 2"));
    }

    #[test]
    fn blank_rows_are_skipped() {
        let t = parse_table("note_id\tFront\nA\tq\n\n   \nB\tr\n").unwrap();
        assert_eq!(t.rows.len(), 2);
    }

    #[test]
    fn base_records_keep_extra_columns_as_fields() {
        let t = parse_table("note_id\tnoteId\tdeck\tmodel\ttags\tSource\n\
                             A\t\tD\tBasic\tsensory; ch:1\tbook\n\
                             B\t42\tD\tBasic\t\t\n").unwrap();
        let base = base_from_table(&t).unwrap();
        assert_eq!(base[0].remote_id, None);
        assert_eq!(base[0].tags, "sensory; ch:1");
        assert_eq!(base[0].fields["Source"], "book");
        assert_eq!(base[1].remote_id, Some(42));
    }

    #[test]
    fn empty_cells_are_fields_the_note_does_not_have() {
        let t = parse_table("note_id\tnoteId\tdeck\tmodel\ttags\tBack\tFront\tSource\n\
                             A\t\tD\tCited\ttopic:x\ta\tq\tch 2\n\
                             B\t\tD\tBasic\ttopic:x\ta\tq\t\n").unwrap();
        let (records, errors) = import_from_table(&t).unwrap();
        assert!(errors.is_empty());
        assert_eq!(records[0].fields["Source"], "ch 2");
        assert!(!records[1].fields.contains_key("Source"));
        assert_eq!(records[1].fields.len(), 2);
        assert_eq!(import_to_table(&records).to_tsv(), t.to_tsv());
    }

    #[test]
    fn duplicate_note_ids_are_refused() {
        let t = parse_table("note_id\tFront\nA\tx\nA\ty\n").unwrap();
        assert!(derived_from_table(&t).is_err());
    }

    #[test]
    fn missing_deck_column_is_refused() {
        let t = parse_table("note_id\tmodel\ttags\nA\tBasic\t\n").unwrap();
        let err = base_from_table(&t).unwrap_err();
        assert!(err.desc.contains("deck"));
    }

    #[test]
    fn import_rows_with_unmanaged_tags_fail_alone() {
        let t = parse_table("note_id\tnoteId\tdeck\tmodel\ttags\tFront\n\
                             A\t7\tD\tBasic\ttopic:x src:ch:1\tq\n\
                             B\t\tD\tBasic\tpersonal:x\tq\n").unwrap();
        let (records, errors) = import_from_table(&t).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].remote_id, Some(7));
        assert_eq!(records[0].tags.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].note_id, "B");
    }

    #[test]
    fn import_table_text_is_stable() {
        let t = parse_table("note_id\tnoteId\tdeck\tmodel\ttags\tBack\tFront\n\
                             A\t\tD\tBasic\ttopic:x\t<p>a\\nb</p>\tq\n").unwrap();
        let (records, _) = import_from_table(&t).unwrap();
        let text = import_to_table(&records).to_tsv();
        assert_eq!(parse_table(&text).unwrap(), t);
        assert_eq!(import_to_table(&records).to_tsv(), text);
    }
}
