//! Error types for WIT parsing and resolution.
//!
//! `wit-parser` reports failures as `anyhow` chains whose innermost entry
//! carries a highlighted `--> file:line:col` excerpt; [`WitError::from_parser`]
//! sorts those into the typed variants below.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A position inside a WIT source file, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.col)
    }
}

/// Malformed or unsupported WIT text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}:{line}:{col}: {message}", .file.display())]
pub struct ParseError {
    pub file: PathBuf,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl ParseError {
    pub fn location(&self) -> Location {
        Location {
            file: self.file.clone(),
            line: self.line,
            col: self.col,
        }
    }
}

/// A well-formed document refers to something that does not exist, or
/// defines something twice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{at}unknown {kind} `{name}`")]
    Unknown {
        kind: &'static str,
        name: String,
        at: Origin,
    },

    #[error("{at}duplicate {kind} `{name}`")]
    Duplicate {
        kind: &'static str,
        name: String,
        at: Origin,
    },

    #[error("world `{world}` both imports and exports `{name}`")]
    ImportExportCollision { world: String, name: String },

    #[error("{at}{message}")]
    Invalid { message: String, at: Origin },

    #[error("{0}")]
    WorldSelection(String),
}

impl ResolutionError {
    /// The name of the symbol the error is about, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            ResolutionError::Unknown { name, .. }
            | ResolutionError::Duplicate { name, .. }
            | ResolutionError::ImportExportCollision { name, .. } => Some(name),
            ResolutionError::Invalid { .. } | ResolutionError::WorldSelection(_) => None,
        }
    }
}

/// Where a resolution error was detected, when known.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Origin(pub Option<Location>);

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(loc) => write!(f, "{loc}: "),
            None => Ok(()),
        }
    }
}

/// A value type contains itself without an intervening handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cyclic type definition: {}", .path.join(" -> "))]
pub struct CyclicTypeError {
    /// Type names along the cycle, first and last entries are equal.
    pub path: Vec<String>,
}

/// Any failure while loading a WIT document set.
#[derive(Error, Debug)]
pub enum WitError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Cyclic(#[from] CyclicTypeError),

    #[error("failed to read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Message fragments `wit-parser` uses for lexer and grammar errors.
const SYNTAX_MARKERS: &[&str] = &[
    "expected ",
    "unexpected ",
    "unterminated ",
    "invalid character",
    "identifiers must",
    "invalid escape",
    "unknown attribute",
    "trailing ",
    "found eof",
];

impl WitError {
    /// Classify an error returned while loading WIT sources.
    pub fn from_parser(err: &anyhow::Error) -> Self {
        let text = err
            .chain()
            .map(ToString::to_string)
            .find(|entry| entry.contains("-->"))
            .unwrap_or_else(|| err.root_cause().to_string());
        let message = text.lines().next().unwrap_or_default().trim().to_string();
        let location = locate(&text);

        if message.contains("depends on itself") || message.contains("cycle") {
            let path = match backticked(&message).first() {
                Some(name) => vec![name.to_string(), name.to_string()],
                None => Vec::new(),
            };
            return Self::Cyclic(CyclicTypeError { path });
        }

        if SYNTAX_MARKERS.iter().any(|marker| message.contains(marker))
            && let Some(Location { file, line, col }) = location.clone()
        {
            return Self::Parse(ParseError {
                file,
                line,
                col,
                message,
            });
        }

        let at = Origin(location);
        let names = backticked(&message);
        let kind = message
            .split_whitespace()
            .next()
            .map_or("name", |word| kind_name(word.trim_matches('`')));
        let error = match names.first() {
            Some(name) if message.contains("does not exist") || message.starts_with("no ") => {
                ResolutionError::Unknown {
                    kind: if message.starts_with("no ") {
                        kind_name(message.split_whitespace().nth(1).unwrap_or_default())
                    } else {
                        kind
                    },
                    name: name.to_string(),
                    at,
                }
            }
            Some(name) if message.contains("defined twice") || message.contains("duplicate") => {
                ResolutionError::Duplicate {
                    kind,
                    name: name.to_string(),
                    at,
                }
            }
            _ => ResolutionError::Invalid { message, at },
        };
        Self::Resolution(error)
    }
}

/// The `--> file:line:col` marker of a highlighted excerpt.
fn locate(text: &str) -> Option<Location> {
    let marker = text
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("-->"))?
        .trim();
    let mut parts = marker.rsplitn(3, ':');
    let col = parts.next()?.parse().ok()?;
    let line = parts.next()?.parse().ok()?;
    let file = PathBuf::from(parts.next()?);
    Some(Location { file, line, col })
}

/// The `quoted` names of a message, in order.
fn backticked(message: &str) -> Vec<&str> {
    message.split('`').skip(1).step_by(2).collect()
}

fn kind_name(word: &str) -> &'static str {
    match word {
        "type" => "type",
        "resource" => "resource",
        "interface" => "interface",
        "world" => "world",
        "package" => "package",
        "function" => "function",
        "field" => "field",
        "case" => "case",
        "flag" => "flag",
        _ => "name",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIGHLIGHTED: &str = "type `missing` does not exist
     --> test.wit:3:14
      |
    3 |   f: func(x: missing);
      |              ^------";

    #[test]
    fn highlighted_locations_are_extracted() {
        let loc = locate(HIGHLIGHTED).unwrap();
        assert_eq!(loc.file, PathBuf::from("test.wit"));
        assert_eq!((loc.line, loc.col), (3, 14));
        assert_eq!(locate("no marker here"), None);
    }

    #[test]
    fn unknown_names_become_resolution_errors() {
        let err = anyhow::anyhow!(HIGHLIGHTED).context("failed to resolve package");
        let WitError::Resolution(ResolutionError::Unknown { kind, name, at }) =
            WitError::from_parser(&err)
        else {
            panic!("expected an unknown-name error");
        };
        assert_eq!((kind, name.as_str()), ("type", "missing"));
        assert_eq!(at.0.map(|loc| loc.line), Some(3));
    }

    #[test]
    fn syntax_errors_keep_their_position() {
        let err = anyhow::anyhow!(
            "expected an identifier or string, found '{{'\n     --> math.wit:2:7\n      |"
        );
        let WitError::Parse(parse) = WitError::from_parser(&err) else {
            panic!("expected a parse error");
        };
        assert_eq!((parse.line, parse.col), (2, 7));
        assert!(parse.to_string().starts_with("math.wit:2:7: expected"));
    }

    #[test]
    fn self_dependencies_are_cycles() {
        let err = anyhow::anyhow!("type `node` depends on itself\n     --> t.wit:2:1");
        let WitError::Cyclic(cycle) = WitError::from_parser(&err) else {
            panic!("expected a cycle");
        };
        assert_eq!(cycle.path, ["node", "node"]);
    }
}
