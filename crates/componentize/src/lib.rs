//! Turn a core WebAssembly module into a component.
//!
//! componentize reads a set of WIT documents, resolves the world the module
//! targets, plans the canonical ABI adapter for every imported and exported
//! function, and links the module, the generated adapter and the glue
//! modules into a component binary.
//!
//! # Module Organization
//!
//! - [`wit`]: WIT loading and resolution on top of `wit-parser`
//! - [`bindgen`]: Adapter plans and the wasm modules generated from them
//! - [`link`]: Core module inspection, component encoding and validation
//! - [`runtime`]: In-process model of a linked instance
//! - [`error`]: Unified error types
//! - [`prelude`]: Convenient re-exports
//! - `logging`: Conditional logging macros (internal)
//!
//! # Features
//!
//! - `logging`: Enable tracing-based logging
//!
//! # Example
//!
//! ```ignore
//! use componentize::prelude::*;
//!
//! let component = Componentizer::new()
//!     .wit_path("wit")
//!     .world("greeter")
//!     .module_path("guest.wasm")
//!     .componentize()?;
//! component.write_to("guest.component.wasm")?;
//! ```

pub mod bindgen;
pub mod error;
pub mod link;
#[macro_use]
pub(crate) mod logging;
pub mod prelude;
pub mod runtime;
pub mod wit;

use std::fs;
use std::path::{Path, PathBuf};

// Re-export from componentize-abi
pub use componentize_abi::{
    AbiError, CanonicalAbi, CoreType, CoreValue, LayoutCache, LinearMemory, MemoryBoundsError,
    ReentranceError, ResourceError, ResourceTable, Type, TypeArena, TypeId, Value,
};

// Re-export unified error types
pub use error::{Error, Result};

pub use bindgen::{Bindings, FunctionPlan};
pub use link::{AbiMismatchError, Adapter, ComponentBinary, LinkError, LinkOptions};
pub use runtime::{ComponentInstance, InstanceBuilder};
pub use wit::{Features, Resolve, SourceSet, WorldId};

use crate::link::CoreModule;
use crate::logging::{debug, info};

/// WIT directory used when no path is given.
pub const DEFAULT_WIT_PATH: &str = "wit";

/// File looked up inside a module directory.
pub const DEFAULT_MODULE_FILE: &str = "main.wasm";

#[derive(Debug, Clone)]
enum ModuleSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ModuleSource {
    /// Bytes in binary format; `.wat` text is assembled and a directory
    /// stands for its [`DEFAULT_MODULE_FILE`].
    fn load(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::Path(path) => {
                let path = if path.is_dir() {
                    path.join(DEFAULT_MODULE_FILE)
                } else {
                    path.clone()
                };
                let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
                debug!(path = %path.display(), bytes = bytes.len(), "read core module");
                bytes
            }
        };
        let bytes = wat::parse_bytes(&bytes)
            .map_err(|e| LinkError::InvalidModule(e.to_string()))?
            .into_owned();
        Ok(bytes)
    }
}

/// Builder running the whole pipeline: load WIT, select a world, plan
/// bindings and link a core module.
///
/// # Example
///
/// ```
/// use componentize::Componentizer;
///
/// let wat = r#"(module
///     (func (export "add") (param i32 i32) (result i32)
///         local.get 0 local.get 1 i32.add))"#;
/// let component = Componentizer::new()
///     .wit_text(
///         "math.wit",
///         "package example:math; world math { export add: func(a: u32, b: u32) -> u32; }",
///     )
///     .module_bytes(wat)
///     .componentize()
///     .unwrap();
/// assert!(!component.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Componentizer {
    wit_paths: Vec<PathBuf>,
    wit_texts: Vec<(PathBuf, String)>,
    world: Option<String>,
    features: Vec<String>,
    all_features: bool,
    module: Option<ModuleSource>,
    adapters: Vec<(String, ModuleSource)>,
    validate: bool,
}

impl Default for Componentizer {
    fn default() -> Self {
        Self {
            wit_paths: Vec::new(),
            wit_texts: Vec::new(),
            world: None,
            features: Vec::new(),
            all_features: false,
            module: None,
            adapters: Vec::new(),
            validate: true,
        }
    }
}

impl Componentizer {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a WIT file or directory. Directories may carry a `deps/`
    /// directory of dependency packages.
    ///
    /// Without any paths or texts, [`DEFAULT_WIT_PATH`] is used.
    pub fn wit_path(mut self, path: impl AsRef<Path>) -> Self {
        self.wit_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Add an in-memory WIT document as its own package.
    ///
    /// Texts are loaded after every path, in the order added, so a text
    /// package must come after the packages it uses.
    pub fn wit_text(mut self, name: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.wit_texts.push((name.into(), text.into()));
        self
    }

    /// Name of the world to target, plain or `ns:pkg/world`.
    ///
    /// If not specified the main packages must define exactly one world.
    pub fn world(mut self, name: impl Into<String>) -> Self {
        self.world = Some(name.into());
        self
    }

    /// Enable `@unstable` features. Each entry may hold several names
    /// separated by commas or whitespace.
    pub fn features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }

    pub fn all_features(mut self, all: bool) -> Self {
        self.all_features = all;
        self
    }

    /// Read the core module from a `.wasm` or `.wat` file, or from
    /// `main.wasm` inside a directory.
    pub fn module_path(mut self, path: impl AsRef<Path>) -> Self {
        self.module = Some(ModuleSource::Path(path.as_ref().to_path_buf()));
        self
    }

    /// Use core module bytes directly, in binary or text format.
    pub fn module_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.module = Some(ModuleSource::Bytes(bytes.into()));
        self
    }

    /// Implement the core module's imports from `name` with the adapter
    /// module at `path`, such as a WASI preview1 adapter for
    /// `wasi_snapshot_preview1`.
    pub fn adapter_path(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.adapters
            .push((name.into(), ModuleSource::Path(path.as_ref().to_path_buf())));
        self
    }

    /// Like [`Componentizer::adapter_path`], with the adapter given as
    /// binary or text.
    pub fn adapter(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.adapters
            .push((name.into(), ModuleSource::Bytes(bytes.into())));
        self
    }

    /// Validate the linked component before returning it. On by default.
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Load and resolve the WIT sources and select the world.
    pub fn resolve(&self) -> Result<(Resolve, WorldId)> {
        let mut sources = SourceSet::new();
        if self.wit_paths.is_empty() && self.wit_texts.is_empty() {
            sources.push_path(Path::new(DEFAULT_WIT_PATH))?;
        }
        for path in &self.wit_paths {
            sources.push_path(path)?;
        }
        for (name, text) in &self.wit_texts {
            sources.push_str(name.clone(), text.clone());
        }
        let features = Features::from_lists(&self.features, self.all_features);
        Ok(sources.resolve(&features, self.world.as_deref())?)
    }

    /// Resolve the world and plan its bindings.
    pub fn bindings(&self) -> Result<(Resolve, Bindings)> {
        let (resolve, world) = self.resolve()?;
        let bindings = Bindings::generate(&resolve, world)?;
        Ok((resolve, bindings))
    }

    /// The core module in binary format.
    pub fn load_module(&self) -> Result<Vec<u8>> {
        match &self.module {
            Some(source) => source.load(),
            None => Err(LinkError::InvalidModule("no core module was given".to_string()).into()),
        }
    }

    /// The adapters in binary format, in the order given.
    pub fn load_adapters(&self) -> Result<Vec<Adapter>> {
        self.adapters
            .iter()
            .map(|(name, source)| Ok(Adapter::new(name.clone(), source.load()?)))
            .collect()
    }

    /// Run the full pipeline and return the component.
    pub fn componentize(&self) -> Result<ComponentBinary> {
        let (resolve, bindings) = self.bindings()?;
        let module = self.load_module()?;
        let adapters = self.load_adapters()?;
        let component = link::link(
            &resolve,
            &bindings,
            &module,
            &adapters,
            LinkOptions {
                validate: self.validate,
            },
        )?;
        info!(
            world = %bindings.world_name,
            bytes = component.len(),
            "componentized module"
        );
        Ok(component)
    }

    /// The core module with a `component-type` section describing the
    /// world appended, without linking.
    pub fn embed(&self) -> Result<Vec<u8>> {
        let (resolve, world) = self.resolve()?;
        let module = self.load_module()?;
        CoreModule::parse(&module)?;
        Ok(link::metadata::embed(&module, &resolve, world)?)
    }

    /// The package defining the selected world, printed as WIT.
    pub fn wit_dump(&self) -> Result<String> {
        let (resolve, world) = self.resolve()?;
        Ok(resolve.print_world(world)?)
    }

    /// Every function's flattened signatures and post-return behaviour.
    pub fn abi_dump(&self) -> Result<String> {
        let (_, bindings) = self.bindings()?;
        Ok(bindings.describe())
    }
}
