//! Crate-internal logging macros.
//!
//! With the `logging` feature the macros are `tracing`'s own. Without it
//! they swallow their arguments and expand to nothing.
//!
//! ```rust,ignore
//! use crate::logging::{debug, trace};
//!
//! debug!(world = %name, "selected world");
//! trace!(bytes = module.len(), "embedded core module");
//! ```

#[cfg(feature = "logging")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "logging"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "logging"))]
pub(crate) use discard as debug;
#[cfg(not(feature = "logging"))]
pub(crate) use discard as error;
#[cfg(not(feature = "logging"))]
pub(crate) use discard as info;
#[cfg(not(feature = "logging"))]
pub(crate) use discard as trace;
#[cfg(not(feature = "logging"))]
pub(crate) use discard as warn;
