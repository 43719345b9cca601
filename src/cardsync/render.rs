//! Markdown to HTML rendering.
//!
//! Renderers are tried in the configured order. External programs are looked
//! up on `PATH` and fed the Markdown on stdin; the builtin renderer is always
//! available. Output from any renderer other than the first choice carries a
//! provenance comment so a fallback rendering is visible in the artifact.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use pulldown_cmark::{html, Options, Parser};
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, Result};

const MULTIMARKDOWN_ARGS: &[&str] = &["--snippet"];
const PANDOC_ARGS: &[&str] = &["--from", "markdown", "--to", "html"];

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    MultiMarkdown,
    Pandoc,
    Builtin,
}

impl RendererKind {
    pub fn name(self) -> &'static str {
        match self {
            RendererKind::MultiMarkdown => "multimarkdown",
            RendererKind::Pandoc => "pandoc",
            RendererKind::Builtin => "builtin",
        }
    }

    /// program name and arguments for renderers that run out of process
    fn command(self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            RendererKind::MultiMarkdown => Some(("multimarkdown", MULTIMARKDOWN_ARGS)),
            RendererKind::Pandoc => Some(("pandoc", PANDOC_ARGS)),
            RendererKind::Builtin => None,
        }
    }
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for RendererKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<RendererKind> {
        match s.to_lowercase().as_str() {
            "multimarkdown" | "mmd" => Ok(RendererKind::MultiMarkdown),
            "pandoc" => Ok(RendererKind::Pandoc),
            "builtin" => Ok(RendererKind::Builtin),
            _ => kind_fail!(RendererUnavailable, format!("unknown renderer '{}'", s)),
        }
    }
}

/// Rendered HTML plus where it came from.
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct Rendered {
    pub html: String,
    pub renderer: RendererKind,
    pub fallback: bool,
}

/// A renderer that has been resolved against what is installed.
#[derive(Clone, Debug)]
pub struct Renderer {
    kind: RendererKind,
    program: Option<PathBuf>,
    fallback: bool,
}

impl Renderer {
    /// pick the first available renderer from `preference`
    pub fn discover(preference: &[RendererKind]) -> Result<Renderer> {
        Renderer::discover_with(preference, find_program)
    }

    pub fn discover_with<F>(preference: &[RendererKind], lookup: F) -> Result<Renderer>
        where F: Fn(&str) -> Option<PathBuf>
    {
        for (i, kind) in preference.iter().enumerate() {
            let program = match kind.command() {
                Some((name, _)) => match lookup(name) {
                    Some(p) => Some(p),
                    None => {
                        debug!(renderer = %kind, "renderer not found on PATH");
                        continue;
                    }
                },
                None => None,
            };
            if i > 0 {
                warn!(renderer = %kind, preferred = %preference[0], "falling back to secondary renderer");
            } else {
                info!(renderer = %kind, "using renderer");
            }
            return Ok(Renderer {
                kind: *kind,
                program: program,
                fallback: i > 0,
            });
        }
        let names: Vec<&str> = preference.iter().map(|k| k.name()).collect();
        kind_fail!(RendererUnavailable,
                   format!("no markdown renderer available (tried: {})", names.join(", ")))
    }

    pub fn kind(&self) -> RendererKind {
        self.kind
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// render one Markdown document
    pub fn render(&self, markdown: &str) -> Result<Rendered> {
        let markdown = markdown.replace("\r\n", "\n");
        let body = match (&self.program, self.kind.command()) {
            (Some(program), Some((_, args))) => run_external(program, args, &markdown)?,
            _ => render_builtin(&markdown),
        };
        let html = if self.fallback {
            format!("{}\n{}", provenance_marker(self.kind), body)
        } else {
            body
        };
        Ok(Rendered {
            html: html,
            renderer: self.kind,
            fallback: self.fallback,
        })
    }
}

pub fn provenance_marker(kind: RendererKind) -> String {
    format!("<!-- rendered-by: {} (fallback) -->", kind)
}

fn render_builtin(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn run_external(program: &Path, args: &[&str], markdown: &str) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error {
            kind: ErrorKind::RendererUnavailable,
            desc: format!("failed to start renderer '{}'", program.display()),
            detail: Some(e.to_string()),
        })?;

    // feed stdin from a thread so a large document cannot fill both pipes
    let mut stdin = match child.stdin.take() {
        Some(s) => s,
        None => return kind_fail!(RendererUnavailable, "renderer stdin unavailable".to_string()),
    };
    let input = markdown.to_string();
    let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));

    let output = child.wait_with_output()?;
    let fed = match writer.join() {
        Ok(res) => res,
        Err(_) => return kind_fail!(Generic, "renderer input thread panicked".to_string()),
    };

    // a renderer that bails out early also breaks the input pipe; report the exit
    if !output.status.success() {
        return Err(Error {
            kind: ErrorKind::Generic,
            desc: format!("renderer '{}' exited with {}", program.display(), output.status),
            detail: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        });
    }
    fed?;
    Ok(String::from_utf8(output.stdout)?)
}

/// locate an executable on `PATH`
pub fn find_program(name: &str) -> Option<PathBuf> {
    let paths: OsString = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> Renderer {
        Renderer::discover(&[RendererKind::Builtin]).unwrap()
    }

    #[test]
    fn builtin_renders_headings_and_paragraphs() {
        let out = builtin().render("## FRONT\nWhat colour?\n\n## BACK\n**Red**\n").unwrap();
        assert_eq!(out.html,
                   "<h2>FRONT</h2>\n<p>What colour?</p>\n<h2>BACK</h2>\n<p><strong>Red</strong></p>\n");
        assert!(!out.fallback);
    }

    #[test]
    fn rendering_is_deterministic_across_line_endings() {
        let r = builtin();
        let a = r.render("# T\r\n\r\n- one\r\n- two\r\n").unwrap();
        let b = r.render("# T\n\n- one\n- two\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tables_keep_row_order() {
        let md = "| k | v |\n|---|---|\n| first | 1 |\n| second | 2 |\n| third | 3 |\n";
        let html = builtin().render(md).unwrap().html;
        assert!(html.contains("<table>"));
        assert!(html.contains("</table>"));
        let first = html.find("first").unwrap();
        let second = html.find("second").unwrap();
        let third = html.find("third").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn missing_primary_falls_back_with_marker() {
        let r = Renderer::discover_with(&[RendererKind::MultiMarkdown, RendererKind::Builtin], |_| None).unwrap();
        assert_eq!(r.kind(), RendererKind::Builtin);
        assert!(r.is_fallback());
        let out = r.render("text").unwrap();
        assert!(out.html.starts_with("<!-- rendered-by: builtin (fallback) -->\n"));
        assert!(out.fallback);
    }

    #[test]
    fn no_renderer_at_all_is_fatal() {
        let err = Renderer::discover_with(&[RendererKind::Pandoc], |_| None).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::RendererUnavailable));
        assert!(Renderer::discover_with(&[], |_| None).is_err());
    }

    #[test]
    fn renderer_names_parse() {
        assert_eq!("mmd".parse::<RendererKind>().unwrap(), RendererKind::MultiMarkdown);
        assert_eq!("Builtin".parse::<RendererKind>().unwrap(), RendererKind::Builtin);
        assert!("latex".parse::<RendererKind>().is_err());
    }
}
