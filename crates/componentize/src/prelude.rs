//! Convenient re-exports for common usage patterns.
//!
//! # Example
//!
//! ```ignore
//! use componentize::prelude::*;
//!
//! let (resolve, bindings) = Componentizer::new().wit_path("wit").bindings()?;
//! println!("{}", bindings.describe());
//! ```

// Unified error handling
pub use crate::error::{Error, Result};

// Pipeline
pub use crate::Componentizer;
pub use crate::link::{Adapter, ComponentBinary, LinkOptions, link, validate};

// WIT model
pub use crate::wit::{Features, Resolve, SourceSet, WorldId, WorldItem};

// Adapter plans and the instance model
pub use crate::bindgen::{Bindings, Direction, FunctionPlan};
pub use crate::runtime::{ComponentInstance, InstanceBuilder};

// ABI types
pub use componentize_abi::{CoreValue, LinearMemory, Type, Value};
