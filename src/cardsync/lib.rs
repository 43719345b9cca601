pub mod args;
pub mod bullets;
pub mod config;
pub mod errors;
pub mod extract;
pub mod mapping;
pub mod merge;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod render;
pub mod source;
pub mod store;
pub mod sync;
pub mod tags;
pub mod utils;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::{Cli, Commands};
use config::Config;
use errors::{NoteError, Result};
use mapping::MappingTable;
use record::ImportRecord;
use render::Renderer;
use store::AnkiConnect;
use sync::SyncApplier;
use utils::{istty, pretty_line, print_note_errors, sanitize_filename, sibling_path, write_output};

/// log filter env var; falls back to `-v` counting
pub const LOG_ENV: &str = "CARDSYNC_LOG";

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "cardsync=warn",
        1 => "cardsync=info",
        _ => "cardsync=debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.anki_url {
        config.anki_url = url.clone();
    }
    if let Some(map) = &cli.map {
        config.mapping = map.clone();
    }
    if !cli.renderers.is_empty() {
        config.renderers = cli.renderers.clone();
    }
    Ok(config)
}

/// report per-note failures and turn them into the process result
fn finish(errors: &[NoteError]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    eprintln!("{} note(s) failed:", errors.len());
    print_note_errors(errors);
    specific_fail!(format!("{} note(s) failed", errors.len()))
}

fn summary(rows: usize, out: &Path) -> Result<()> {
    let tty = istty();
    pretty_line("rows: ", &format!("{}\n", rows), tty)?;
    pretty_line("output: ", &format!("{}\n", out.display()), tty)?;
    Ok(())
}

/// rewrite tagged answers in place and write the review document
fn apply_bullets(records: &mut [ImportRecord], field: &str, review: &Path, overwrite: bool) -> Result<()> {
    let changes = bullets::format_bullets(records, field)?;
    write_output(review, &bullets::review_markdown(&changes)?, overwrite)?;
    let tty = istty();
    pretty_line("formatted: ", &format!("{}\n", changes.len()), tty)?;
    pretty_line("review: ", &format!("{}\n", review.display()), tty)?;
    Ok(())
}

pub fn r#run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = resolve_config(&cli)?;

    match &cli.command {
        Commands::Tags { canonical, remote } => {
            let desired = tags::managed_tags(canonical)?;
            let tty = istty();
            pretty_line("managed: ", &format!("{}\n", tags::join_tags(&desired)), tty)?;
            if let Some(remote) = remote {
                let current: BTreeSet<String> = remote.split_whitespace().map(|t| t.to_string()).collect();
                let plan = reconcile::reconcile(&current, &desired);
                pretty_line("add: ", &format!("{}\n", tags::join_tags(&plan.add)), tty)?;
                pretty_line("remove: ", &format!("{}\n", tags::join_tags(&plan.remove)), tty)?;
                pretty_line("result: ", &format!("{}\n", tags::join_tags(&plan.apply(&current))), tty)?;
            }
        }
        Commands::Render { input, out, overwrite } => {
            let renderer = Renderer::discover(&config.renderers)?;
            let rendered = renderer.render(&fs::read_to_string(input)?)?;
            match out {
                Some(path) => {
                    write_output(path, &rendered.html, *overwrite)?;
                    info!(output = %path.display(), renderer = %rendered.renderer, "rendered");
                }
                None => print!("{}", rendered.html),
            }
        }
        Commands::Extract { input, out, overwrite } => {
            let renderer = Renderer::discover(&config.renderers)?;
            let text = fs::read_to_string(input)?;
            let (derived, errors) = pipeline::extract_document(input, &text, &renderer, &config.sections)?;
            write_output(out, &record::derived_to_table(&derived).to_tsv(), *overwrite)?;
            summary(derived.len(), out)?;
            finish(&errors)?;
        }
        Commands::Merge { base, derived, out, overwrite } => {
            let base = record::base_from_table(&record::read_table(base)?)?;
            let derived = record::derived_from_table(&record::read_table(derived)?)?;
            let merged = merge::merge(&base, &derived);
            write_output(out, &record::import_to_table(&merged.records).to_tsv(), *overwrite)?;
            summary(merged.records.len(), out)?;
            finish(&merged.errors)?;
        }
        Commands::Export { inputs, out, html_dir, overwrite, limit, bullets } => {
            let mut paths = source::discover(inputs)?;
            if paths.is_empty() {
                return specific_fail_str!("no input files found");
            }
            if let Some(n) = limit {
                paths.truncate(*n);
            }
            let renderer = Renderer::discover(&config.renderers)?;
            let mut exported = pipeline::export_notes(&paths, &renderer, &config.sections)?;
            if *bullets {
                apply_bullets(&mut exported.records, &config.bullet_field,
                              &sibling_path(out, "__review.md"), *overwrite)?;
            }

            if let Some(dir) = html_dir {
                for (note_id, rendered) in exported.rendered.iter() {
                    let path = dir.join(format!("{}.html", sanitize_filename(note_id)));
                    write_output(&path, &rendered.html, *overwrite)?;
                }
            }
            write_output(out, &record::import_to_table(&exported.records).to_tsv(), *overwrite)?;
            summary(exported.records.len(), out)?;
            finish(&exported.errors)?;
        }
        Commands::Bullets { input, out, review, field, overwrite } => {
            let (mut records, errors) = record::import_from_table(&record::read_table(input)?)?;
            let out = out.clone().unwrap_or_else(|| sibling_path(input, "__formatted.tsv"));
            let review = review.clone().unwrap_or_else(|| sibling_path(input, "__review.md"));
            let field = field.as_deref().unwrap_or(&config.bullet_field);
            apply_bullets(&mut records, field, &review, *overwrite)?;
            write_output(&out, &record::import_to_table(&records).to_tsv(), *overwrite)?;
            summary(records.len(), &out)?;
            finish(&errors)?;
        }
        Commands::Sync { input, dry_run, limit } => {
            let (mut records, mut errors) = record::import_from_table(&record::read_table(input)?)?;
            if let Some(n) = limit {
                records.truncate(*n);
            }
            let mut mapping = MappingTable::load(&config.mapping)?;
            let (plans, plan_errors) = sync::plan(&records, &mapping);
            errors.extend(plan_errors);

            if *dry_run {
                print!("{}", serde_yaml::to_string(&plans)?);
                utils::print_plan_table(&plans)?;
                println!("dry run: nothing sent to {}", config.anki_url);
                return finish(&errors);
            }

            let mut store = AnkiConnect::new(&config.anki_url, config.timeout())?;
            let version = store.version()?;
            info!(version, url = %config.anki_url, "connected to AnkiConnect");
            if plans.is_empty() {
                warn!("nothing to sync");
            }
            let report = SyncApplier::new(&mut store, &mut mapping).apply(&plans)?;
            utils::print_sync_report(&report)?;
            errors.extend(report.errors);
            finish(&errors)?;
        }
    }

    Ok(())
}
