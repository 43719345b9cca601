use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::render::RendererKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "cardsync")]
#[command(version)]
#[command(about = "render canonical markdown notes into flashcards and sync them to anki", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (YAML)
    #[arg(short, long, global = true, env = "CARDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// AnkiConnect URL
    #[arg(long, global = true, env = "CARDSYNC_ANKI_URL")]
    pub anki_url: Option<String>,

    /// Note_ID -> noteId mapping table
    #[arg(short, long, global = true, env = "CARDSYNC_MAP")]
    pub map: Option<PathBuf>,

    /// Renderer preference, first available wins (repeatable)
    #[arg(long = "renderer", global = true, value_parser = parse_renderer)]
    pub renderers: Vec<RendererKind>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_renderer(s: &str) -> Result<RendererKind, String> {
    s.parse::<RendererKind>().map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the managed tags for a canonical tag string
    Tags {
        /// Canonical tag string, e.g. "textbook:apple; ch:2.8.6; sensory"
        canonical: String,

        /// Current remote tags (space separated) to reconcile against
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Render one Markdown file to HTML
    Render {
        /// Markdown input
        input: PathBuf,

        /// Output file (stdout when missing)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },

    /// Extract per-note fields from a collection document
    Extract {
        /// Collection document, Markdown or rendered HTML
        input: PathBuf,

        /// Derived fields TSV
        #[arg(short, long)]
        out: PathBuf,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },

    /// Join a base TSV with a derived TSV into an import TSV
    Merge {
        /// Base records (note_id, deck, model, tags, ...)
        #[arg(long)]
        base: PathBuf,

        /// Derived fields (note_id, field columns)
        #[arg(long)]
        derived: PathBuf,

        /// Import TSV
        #[arg(short, long)]
        out: PathBuf,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },

    /// Turn canonical note files into an import TSV
    Export {
        /// Note files or folders (searched recursively for *.md)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Import TSV
        #[arg(short, long)]
        out: PathBuf,

        /// Also write each note's rendered HTML here
        #[arg(long)]
        html_dir: Option<PathBuf>,

        /// Replace existing output files
        #[arg(long)]
        overwrite: bool,

        /// Only export the first N notes
        #[arg(short, long)]
        limit: Option<usize>,

        /// Bullet-format tagged answers and write a review file beside the output
        #[arg(long)]
        bullets: bool,
    },

    /// Bullet-format answers of tagged notes in an import TSV
    Bullets {
        /// Import TSV
        input: PathBuf,

        /// Formatted TSV (default: <input>__formatted.tsv)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Before/after review (default: <input>__review.md)
        #[arg(long)]
        review: Option<PathBuf>,

        /// Field to rewrite (default from config, Back)
        #[arg(short, long)]
        field: Option<String>,

        /// Replace existing output files
        #[arg(long)]
        overwrite: bool,
    },

    /// Create or update notes in Anki from an import TSV
    Sync {
        /// Import TSV
        input: PathBuf,

        /// Print the plan without contacting Anki
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Only process the first N records
        #[arg(short, long)]
        limit: Option<usize>,
    },
}
