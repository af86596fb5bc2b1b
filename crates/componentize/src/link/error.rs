//! Error types for linking core modules into components.

use thiserror::Error;

/// The core module and the world do not fit together, or the produced
/// component is malformed.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to parse core module: {0}")]
    InvalidModule(String),

    #[error("Expected a core wasm module, found a component")]
    NotACoreModule,

    #[error("Core module does not export `{name}` required by world export `{export}`")]
    MissingExport { name: String, export: String },

    #[error("Core module imports `{module}`.`{name}`, which the world does not provide")]
    UnknownImport { module: String, name: String },

    #[error("World import `{module}`.`{name}` is not imported by the core module")]
    MissingImport { module: String, name: String },

    #[error("Core module must export a memory named `memory`")]
    MissingMemory,

    #[error("Core module must export `cabi_realloc: (i32, i32, i32, i32) -> i32`")]
    MissingRealloc,

    #[error("Adapter `{adapter}` is not a valid core module: {reason}")]
    InvalidAdapter { adapter: String, reason: String },

    #[error("Adapter `{0}` is given more than once")]
    DuplicateAdapter(String),

    #[error("Core module imports `{adapter}`.`{name}`, which adapter `{adapter}` does not export")]
    MissingAdapterExport { adapter: String, name: String },

    #[error(
        "Adapter `{adapter}` imports `{module}`.`{name}`, which neither the core module nor the world provides"
    )]
    AdapterImport {
        adapter: String,
        module: String,
        name: String,
    },

    #[error("No implementation registered for export `{0}`")]
    MissingImplementation(String),

    #[error("No host function registered for import `{module}`.`{name}`")]
    MissingHostFunction { module: String, name: String },

    #[error("World has no export named `{0}`")]
    UnknownExport(String),

    #[error("Failed to encode component: {0}")]
    Encoding(String),

    #[error("Produced component failed validation: {0}")]
    Validation(String),
}

impl LinkError {
    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}

/// A core function's signature differs from the one the world requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Signature mismatch for `{item}`: world requires {expected}, core module has {found}")]
pub struct AbiMismatchError {
    pub item: String,
    pub expected: String,
    pub found: String,
}
