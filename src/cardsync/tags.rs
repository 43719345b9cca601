//! Canonical tag strings and the managed tag namespaces they map into.
//!
//! A canonical tag string is the human-edited form kept in a note's source,
//! e.g. `textbook:яблуко; ch:2.8.6; sensory; wf:unverified`. Each token maps
//! to exactly one managed tag under one of the three [`Namespace`]s; tags
//! outside those namespaces belong to the user and are never touched.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::kind_fail;
use crate::errors::{Error, Result};

/// separator between tokens of a canonical tag string
pub const TOKEN_SEPARATOR: char = ';';

/// keys routed into the `src` namespace
const SOURCE_KEYS: [&str; 2] = ["textbook", "ch"];

/// The closed vocabulary of automation-owned tag prefixes.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Src,
    Topic,
    Wf,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Src, Namespace::Topic, Namespace::Wf];

    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Src => "src",
            Namespace::Topic => "topic",
            Namespace::Wf => "wf",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Namespace> {
        match prefix {
            "src" => Some(Namespace::Src),
            "topic" => Some(Namespace::Topic),
            "wf" => Some(Namespace::Wf),
            _ => None,
        }
    }

    /// namespace of an output-side tag, `None` when the tag is unmanaged
    pub fn of_tag(tag: &str) -> Option<Namespace> {
        let (prefix, _) = tag.split_once(':')?;
        Namespace::from_prefix(prefix)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// A parsed token of a canonical tag string.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TagToken {
    pub raw: String,
    pub namespace_guess: Option<Namespace>,
    pub key: Option<String>,
    pub value: String,
}

impl TagToken {
    fn parse(raw: &str, position: usize) -> Result<TagToken> {
        let raw = raw.trim();
        if raw.is_empty() {
            return kind_fail!(MalformedSource,
                              format!("empty tag token at position {}", position + 1));
        }
        if raw.chars().any(char::is_whitespace) {
            return kind_fail!(MalformedSource,
                              format!("tag token '{}' contains whitespace", raw));
        }

        match raw.split_once(':') {
            None => Ok(TagToken {
                raw: raw.to_string(),
                namespace_guess: Some(Namespace::Topic),
                key: None,
                value: raw.to_string(),
            }),
            Some((key, value)) => {
                if key.is_empty() || value.is_empty() {
                    return kind_fail!(MalformedSource,
                                      format!("tag token '{}' needs both a key and a value", raw));
                }
                let lowered = key.to_lowercase();
                let guess = if SOURCE_KEYS.contains(&lowered.as_str()) {
                    Some(Namespace::Src)
                } else if lowered == Namespace::Wf.prefix() {
                    Some(Namespace::Wf)
                } else {
                    None
                };
                Ok(TagToken {
                    raw: raw.to_string(),
                    namespace_guess: guess,
                    key: Some(if guess.is_some() { lowered } else { key.to_string() }),
                    value: value.to_string(),
                })
            }
        }
    }

    /// map the token into its namespace; unknown keys are never guessed
    pub fn to_managed(&self) -> Result<ManagedTag> {
        let rest = match (self.namespace_guess, &self.key) {
            (Some(Namespace::Topic), None) => self.value.clone(),
            (Some(Namespace::Src), Some(key)) => format!("{}:{}", key, self.value),
            (Some(Namespace::Wf), Some(_)) => self.value.clone(),
            (_, Some(key)) => {
                return kind_fail!(MalformedSource,
                                  format!("unrecognized tag key '{}' in '{}'", key, self.raw))
            }
            (_, None) => {
                return kind_fail!(MalformedSource,
                                  format!("cannot map tag token '{}'", self.raw))
            }
        };
        Ok(ManagedTag {
            namespace: self.namespace_guess.unwrap_or(Namespace::Topic),
            rest: rest,
        })
    }
}

/// An automation-owned tag, rendered as `<prefix>:<rest>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ManagedTag {
    pub namespace: Namespace,
    pub rest: String,
}

impl ManagedTag {
    pub fn new(namespace: Namespace, rest: &str) -> ManagedTag {
        ManagedTag {
            namespace: namespace,
            rest: rest.to_string(),
        }
    }
}

impl fmt::Display for ManagedTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.prefix(), self.rest)
    }
}

impl FromStr for ManagedTag {
    type Err = Error;

    fn from_str(tag: &str) -> Result<ManagedTag> {
        let namespace = match Namespace::of_tag(tag) {
            Some(ns) => ns,
            None => return kind_fail!(MalformedSource, format!("'{}' is not a managed tag", tag)),
        };
        let rest = &tag[namespace.prefix().len() + 1..];
        if rest.is_empty() || rest.chars().any(char::is_whitespace) {
            return kind_fail!(MalformedSource, format!("malformed managed tag '{}'", tag));
        }
        Ok(ManagedTag::new(namespace, rest))
    }
}

impl Serialize for ManagedTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// split a canonical tag string into tokens, rejecting empty ones
pub fn parse_canonical(canonical: &str) -> Result<Vec<TagToken>> {
    if canonical.trim().is_empty() {
        return Ok(vec![]);
    }
    canonical.split(TOKEN_SEPARATOR)
             .enumerate()
             .map(|(i, raw)| TagToken::parse(raw, i))
             .collect()
}

/// the full set of managed tags a canonical tag string asks for
pub fn managed_tags(canonical: &str) -> Result<BTreeSet<ManagedTag>> {
    parse_canonical(canonical)?
        .iter()
        .map(TagToken::to_managed)
        .collect()
}

/// parse a space-separated list of managed tags, e.g. an import TSV column
pub fn parse_managed_list(list: &str) -> Result<BTreeSet<ManagedTag>> {
    list.split_whitespace().map(|t| t.parse::<ManagedTag>()).collect()
}

pub fn join_tags<'a, I, T>(tags: I) -> String
    where I: IntoIterator<Item = &'a T>,
          T: fmt::Display + 'a
{
    tags.into_iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ")
}
