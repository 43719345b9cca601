use std::fmt;
use std::convert::From;
use std::error::Error as StdError;
use std::io::Error as IoError;
use std::string::FromUtf8Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug)]
pub enum ErrorKind {
    /// the canonical source of one note is unusable
    MalformedSource,
    /// base and derived record sets disagree on membership
    JoinMismatch,
    /// a Note_ID -> remote id binding changed or vanished
    MappingInconsistency,
    /// the note store could not be reached or refused a call
    Api,
    /// a tag plan was only partly visible after applying it
    PartialApply,
    RendererUnavailable,
    InternalIo(IoError),
    Generic,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub desc: String,
    pub detail: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, desc: String) -> Error {
        Error {
            kind: kind,
            desc: desc,
            detail: None,
        }
    }

    /// true for failures that stop the whole batch instead of one note
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Api | ErrorKind::InternalIo(_) | ErrorKind::RendererUnavailable)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ErrorKind::MalformedSource => "malformed source",
            ErrorKind::JoinMismatch => "join mismatch",
            ErrorKind::MappingInconsistency => "mapping inconsistency",
            ErrorKind::Api => "api",
            ErrorKind::PartialApply => "partial apply",
            ErrorKind::RendererUnavailable => "renderer unavailable",
            ErrorKind::InternalIo(_) => "io",
            ErrorKind::Generic => "error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.detail {
            Some(ref d) => write!(f, "{} ({})", &self.desc, d),
            None => write!(f, "{}", &self.desc),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self.kind {
            ErrorKind::InternalIo(ref e) => Some(e),
            _ => None,
        }
    }
}

/// A failure scoped to a single note; the batch carries on without it.
#[derive(Debug)]
pub struct NoteError {
    pub note_id: String,
    pub error: Error,
}

impl NoteError {
    pub fn new(note_id: &str, error: Error) -> NoteError {
        NoteError {
            note_id: note_id.to_string(),
            error: error,
        }
    }
}

impl fmt::Display for NoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: [{}] {}", self.note_id, self.error.kind_name(), self.error)
    }
}

#[macro_export]
macro_rules! specific_fail {
    ($short:expr) => {{
        use crate::errors::{Error, ErrorKind};
        Err(::std::convert::From::from(
            Error {
                kind: ErrorKind::Generic,
                desc: $short,
                detail: None
            }
        ))
    }}
}

#[macro_export]
macro_rules! specific_fail_str {
    ($s:expr) => {
        specific_fail!($s.to_string())
    }
}

#[macro_export]
macro_rules! kind_fail {
    ($kind:ident, $desc:expr) => {{
        use crate::errors::{Error, ErrorKind};
        Err(Error::new(ErrorKind::$kind, $desc))
    }}
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error {
            desc: err.to_string(),
            kind: ErrorKind::InternalIo(err),
            detail: None,
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Error {
        Error::from(err.error)
    }
}

impl From<FromUtf8Error> for Error {
    fn from(err: FromUtf8Error) -> Error {
        Error {
            kind: ErrorKind::Generic,
            desc: format!("UTF-8 error: {}", err),
            detail: None,
        }
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Error {
        Error {
            kind: ErrorKind::Generic,
            desc: "formatting error".to_string(),
            detail: None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Error {
        Error {
            kind: ErrorKind::Generic,
            desc: format!("YAML error: {}", err),
            detail: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error {
            kind: ErrorKind::Api,
            desc: format!("unexpected AnkiConnect payload: {}", err),
            detail: None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        Error {
            kind: ErrorKind::Api,
            desc: "unable to reach AnkiConnect".to_string(),
            detail: Some(err.to_string()),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Error {
        let path = err.path().map(|p| p.display().to_string());
        match err.into_io_error() {
            Some(io) => Error {
                desc: io.to_string(),
                kind: ErrorKind::InternalIo(io),
                detail: path,
            },
            None => Error {
                kind: ErrorKind::Generic,
                desc: "filesystem loop while searching for notes".to_string(),
                detail: path,
            },
        }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Error {
        Error {
            kind: ErrorKind::Generic,
            desc: format!("regex error: {}", err),
            detail: None,
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error {
            kind: ErrorKind::Generic,
            desc: err,
            detail: None,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Error {
        Error {
            kind: ErrorKind::Generic,
            desc: err.to_string(),
            detail: None,
        }
    }
}
