use std::fs;
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};

use crossterm::{
    style::{Attribute, SetAttribute},
    execute,
    tty::IsTty,
};
use tempfile::NamedTempFile;

// cardsync imports
use crate::specific_fail;
use crate::errors::{NoteError, Result};
use crate::reconcile::TagPlan;
use crate::sync::{NotePlan, SyncAction, SyncReport};
use crate::tags::join_tags;

pub fn istty() -> bool {
    stdout().is_tty()
}

pub fn pretty_line(bold: &str, plain: &str, tty: bool) -> Result<()> {
    let mut stdout = stdout();
    if tty {
        execute!(stdout, SetAttribute(Attribute::Bold))?;
    }
    print!("{}", bold);
    if tty {
        execute!(stdout, SetAttribute(Attribute::Reset))?;
    }
    print!("{}", plain);
    Ok(())
}

pub fn format_field(value: &str, width: usize, truncate: bool) -> String {
    if value.chars().count() > width && width > 3 && truncate {
        let cut: String = value.chars().take(width - 3).collect();
        format!("{}...", cut)
    } else {
        format!("{: <1$}", value, width)
    }
}

/// Write an artifact, refusing to replace an existing file unless asked.
/// The file is written to a sibling temp file and renamed into place.
pub fn write_output(path: &Path, contents: &str, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return specific_fail!(format!("refusing to overwrite existing file: {} (use --overwrite)",
                                      path.display()));
    }
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// `dir/name.tsv` + `__review.md` -> `dir/name__review.md`
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{}{}", stem, suffix))
}

pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

pub fn print_note_errors(errors: &[NoteError]) {
    for e in errors.iter() {
        eprintln!("  {}", e);
    }
}

fn plan_summary(tags: &Option<TagPlan>) -> String {
    match tags {
        Some(t) if t.is_empty() => "tags unchanged".to_string(),
        Some(t) => format!("+[{}] -[{}]", join_tags(&t.add), join_tags(&t.remove)),
        None => "tags: remote not fetched".to_string(),
    }
}

/// one line per note: id, action, tag plan
pub fn print_plan_table(plans: &[NotePlan]) -> Result<()> {
    let tty = istty();
    let width = plans.iter().map(|p| p.note_id.chars().count()).max().unwrap_or(0).max(7);
    pretty_line(&format!("{}  {}  {}\n", format_field("note_id", width, false),
                         format_field("action", 16, false), "tags"),
                "", tty)?;
    for p in plans.iter() {
        let action = match p.action {
            SyncAction::Create => "create".to_string(),
            SyncAction::Update { remote_id, .. } => format!("update {}", remote_id),
        };
        println!("{}  {}  {}",
                 format_field(&p.note_id, width, false),
                 format_field(&action, 16, true),
                 plan_summary(&p.tags));
    }
    Ok(())
}

pub fn print_sync_report(report: &SyncReport) -> Result<()> {
    let tty = istty();
    let created = report.synced.iter().filter(|s| s.created).count();
    let retagged = report.synced.iter().filter(|s| !s.tags.is_empty()).count();
    pretty_line("synced: ", &format!("{}\n", report.synced.len()), tty)?;
    pretty_line("created: ", &format!("{}\n", created), tty)?;
    pretty_line("retagged: ", &format!("{}\n", retagged), tty)?;
    pretty_line("failed: ", &format!("{}\n", report.errors.len()), tty)?;
    Ok(())
}
