use std::fs;
use std::path::Path;

use tempfile::tempdir;

use cardsync::bullets::{format_bullets, review_markdown};
use cardsync::errors::ErrorKind;
use cardsync::extract::default_sections;
use cardsync::merge::merge;
use cardsync::pipeline::{export_notes, extract_document, Stage};
use cardsync::record::{base_from_table, derived_from_table, derived_to_table, import_from_table,
                       import_to_table, parse_table};
use cardsync::render::{Renderer, RendererKind};
use cardsync::source::discover;

const APPLE: &str = "---
note_id: FRUIT-0001
anki:
  deck: Fruit::Sensory
  model: Basic
tags: \"textbook:apple; ch:2.8.6; sensory\"
---
## FRONT
What colour is a *ripe* apple?

## BACK
Red, usually.

- sometimes green
- sometimes yellow
";

const PEAR: &str = "---
note_id: FRUIT-0002
anki:
  deck: Fruit::Sensory
  model: Basic
tags: \"textbook:pear; wf:draft\"
---
## FRONT
Pear texture?

## BACK
Gritty.
";

const NO_BACK: &str = "---
note_id: FRUIT-0003
anki:
  deck: Fruit::Sensory
  model: Basic
tags: sensory
---
## FRONT
Question without an answer
";

fn builtin() -> Renderer {
    Renderer::discover(&[RendererKind::Builtin]).unwrap()
}

fn write_notes(dir: &Path) {
    fs::create_dir_all(dir.join("pears")).unwrap();
    fs::write(dir.join("apple.md"), APPLE).unwrap();
    fs::write(dir.join("pears").join("pear.md"), PEAR).unwrap();
    fs::write(dir.join("notes.txt"), "not a note").unwrap();
}

#[test]
fn export_builds_import_records() {
    let dir = tempdir().unwrap();
    write_notes(dir.path());

    let paths = discover(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(paths.len(), 2);
    let out = export_notes(&paths, &builtin(), &default_sections()).unwrap();

    assert!(out.errors.is_empty());
    assert_eq!(out.records.len(), 2);
    let apple = &out.records[0];
    assert_eq!(apple.note_id, "FRUIT-0001");
    assert_eq!(apple.deck, "Fruit::Sensory");
    let tags: Vec<String> = apple.tags.iter().map(|t| t.to_string()).collect();
    assert_eq!(tags, vec!["src:ch:2.8.6", "src:textbook:apple", "topic:sensory"]);
    assert!(apple.fields["Front"].contains("<em>ripe</em>"));
    assert!(apple.fields["Back"].contains("<li>sometimes green</li>"));
    assert!(!apple.fields["Front"].contains("BACK"));
    assert_eq!(out.runs["FRUIT-0002"].stage, Stage::Extracted);
}

#[test]
fn export_is_byte_identical_across_runs() {
    let dir = tempdir().unwrap();
    write_notes(dir.path());
    let paths = discover(&[dir.path().to_path_buf()]).unwrap();

    let first = import_to_table(&export_notes(&paths, &builtin(), &default_sections()).unwrap().records).to_tsv();
    let second = import_to_table(&export_notes(&paths, &builtin(), &default_sections()).unwrap().records).to_tsv();
    assert_eq!(first, second);

    // the written file reads back into the same records
    let (records, errors) = import_from_table(&parse_table(&first).unwrap()).unwrap();
    assert!(errors.is_empty());
    assert_eq!(import_to_table(&records).to_tsv(), first);
}

#[test]
fn one_bad_note_does_not_stop_the_others() {
    let dir = tempdir().unwrap();
    write_notes(dir.path());
    fs::write(dir.path().join("broken.md"), NO_BACK).unwrap();

    let paths = discover(&[dir.path().to_path_buf()]).unwrap();
    let out = export_notes(&paths, &builtin(), &default_sections()).unwrap();

    assert_eq!(out.records.len(), 2);
    let failed: Vec<&str> = out.errors.iter().map(|e| e.note_id.as_str()).collect();
    assert_eq!(failed, vec!["FRUIT-0003"]);
    assert!(matches!(out.errors[0].error.kind, ErrorKind::MalformedSource));
}

#[test]
fn collection_extract_then_merge() {
    let collection = "## FRUIT-0001\n### FRONT\nq1\n### BACK\na1\n\n## FRUIT-0002\n### FRONT\nq2\n### BACK\na2\n";
    let (derived, errors) = extract_document(Path::new("deck.md"), collection, &builtin(),
                                             &default_sections()).unwrap();
    assert!(errors.is_empty());

    let derived_tsv = derived_to_table(&derived).to_tsv();
    let base_tsv = "note_id\tdeck\tmodel\ttags\n\
                    FRUIT-0001\tFruit\tBasic\tsensory\n\
                    FRUIT-0002\tFruit\tBasic\ttextbook:pear\n";

    let base = base_from_table(&parse_table(base_tsv).unwrap()).unwrap();
    let derived = derived_from_table(&parse_table(&derived_tsv).unwrap()).unwrap();
    let merged = merge(&base, &derived);

    assert!(merged.errors.is_empty());
    assert_eq!(merged.records.len(), 2);
    assert_eq!(merged.records[1].fields["Back"], "<p>a2</p>");
    let tsv = import_to_table(&merged.records).to_tsv();
    assert!(tsv.starts_with("note_id\tnoteId\tdeck\tmodel\ttags\tBack\tFront\n"));
    assert!(tsv.contains("FRUIT-0001\t\tFruit\tBasic\ttopic:sensory\t<p>a1</p>\t<p>q1</p>\n"));
}

#[test]
fn tagged_answers_become_bullets_after_export() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("apple.md"), APPLE).unwrap();
    fs::write(dir.path().join("plum.md"), "---\nnote_id: FRUIT-0004\nanki:\n  deck: D\n  model: Basic\n\
                                           tags: \"sensory; format_bullets\"\n---\n\
                                           ## FRONT\nPlum colours?\n\n## BACK\npurple; red; yellow\n").unwrap();

    let paths = discover(&[dir.path().to_path_buf()]).unwrap();
    let mut out = export_notes(&paths, &builtin(), &default_sections()).unwrap();
    let changes = format_bullets(&mut out.records, "Back").unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(out.records[1].fields["Back"], "<p>• purple<br>\n• red<br>\n• yellow</p>");
    let review = review_markdown(&changes).unwrap();
    assert!(review.contains("## FRUIT-0004\n\n### BEFORE\n<p>purple; red; yellow</p>"));
    assert!(!out.records[0].fields["Back"].contains('•'));
}
