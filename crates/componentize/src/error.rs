//! Unified error type for the componentize library.
//!
//! Every module reports its own error type; [`Error`] wraps them all so
//! callers can use `?` across the whole pipeline and map failures to a
//! process exit status with [`Error::exit_code`].

use std::path::PathBuf;

use componentize_abi::{AbiError, MemoryBoundsError, ReentranceError, ResourceError};
use thiserror::Error;

use crate::link::{AbiMismatchError, LinkError};
use crate::wit::{CyclicTypeError, ParseError, ResolutionError, WitError};

/// Unified error type for all componentize operations.
///
/// # Example
///
/// ```ignore
/// use componentize::{Componentizer, Result};
///
/// fn build() -> Result<()> {
///     let component = Componentizer::new().wit_path("wit").module_path("guest.wasm").componentize()?;
///     component.write_to("guest.component.wasm")?;
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Lexing, parsing or resolving WIT.
    #[error(transparent)]
    Wit(#[from] WitError),

    /// Layout computation, lifting or lowering.
    #[error(transparent)]
    Abi(#[from] AbiError),

    /// A core function signature disagrees with the world.
    #[error(transparent)]
    AbiMismatch(#[from] AbiMismatchError),

    /// The core module cannot be linked against the world.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// A pointer/length pair fell outside linear memory.
    #[error(transparent)]
    MemoryBounds(#[from] MemoryBoundsError),

    /// Misuse of a resource handle.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// An export was re-entered.
    #[error(transparent)]
    Reentrance(#[from] ReentranceError),

    /// A host function or export implementation failed.
    #[error("Call to `{name}` failed: {message}")]
    Call { name: String, message: String },

    /// I/O error on a module or output path.
    #[error("I/O error on `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Self::Wit(err.into())
    }
}

impl From<ResolutionError> for Error {
    fn from(err: ResolutionError) -> Self {
        Self::Wit(err.into())
    }
}

impl From<CyclicTypeError> for Error {
    fn from(err: CyclicTypeError) -> Self {
        Self::Wit(err.into())
    }
}

impl Error {
    /// Create an error reported by a host function or implementation.
    pub fn call(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            name: name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for WIT syntax errors.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Wit(WitError::Parse(_)))
    }

    /// Returns `true` for name resolution and cyclic type errors.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::Wit(WitError::Resolution(_) | WitError::Cyclic(_))
        )
    }

    /// Returns `true` for ABI and link failures.
    pub fn is_link(&self) -> bool {
        matches!(
            self,
            Self::Abi(_) | Self::AbiMismatch(_) | Self::Link(_) | Self::MemoryBounds(_)
        )
    }

    /// Returns `true` if this is an I/O error.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Wit(WitError::Io { .. }))
    }

    /// Process exit status for this error.
    ///
    /// | code | failure |
    /// |------|---------|
    /// | 2 | WIT parse error |
    /// | 3 | resolution or cyclic type error |
    /// | 4 | ABI or link failure |
    /// | 5 | I/O error |
    /// | 1 | anything else |
    pub fn exit_code(&self) -> i32 {
        if self.is_parse() {
            2
        } else if self.is_resolution() {
            3
        } else if self.is_link() {
            4
        } else if self.is_io() {
            5
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wit::Origin;

    #[test]
    fn exit_codes_follow_the_failure_class() {
        let parse = Error::from(ParseError {
            file: "a.wit".into(),
            line: 1,
            col: 2,
            message: "expected `;`".to_string(),
        });
        assert_eq!(parse.exit_code(), 2);

        let unknown = Error::from(ResolutionError::Unknown {
            kind: "type",
            name: "nope".to_string(),
            at: Origin::default(),
        });
        assert_eq!(unknown.exit_code(), 3);
        assert_eq!(Error::from(CyclicTypeError { path: vec![] }).exit_code(), 3);
        assert_eq!(Error::from(LinkError::MissingMemory).exit_code(), 4);
        let io = Error::io("out.wasm", std::io::Error::other("disk full"));
        assert_eq!(io.exit_code(), 5);
        assert_eq!(Error::call("f", "boom").exit_code(), 1);
    }
}
