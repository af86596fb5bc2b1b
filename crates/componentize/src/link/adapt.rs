//! Adapter modules: core modules that implement one import module of the
//! main module on top of the world's imports, the way a WASI preview1
//! adapter implements `wasi_snapshot_preview1`.
//!
//! An adapter may import the main module's memory as `env.memory`, any
//! export of the main module from `__main_module__`, and the world's
//! imports and resource intrinsics under their usual core names. Its
//! exports stand in for the main module's imports from the module the
//! adapter is named after.

use std::collections::HashSet;

use super::error::LinkError;
use super::module::{CoreItem, CoreModule};
use super::expect_sig;
use crate::error::Result;
use crate::bindgen::{AdaptedImport, Bindings};

/// Module an adapter imports the main module's memory from.
pub const ENV_MODULE: &str = "env";

/// Module an adapter imports the main module's exports from.
pub const MAIN_MODULE: &str = "__main_module__";

/// A core module providing the imports the main module takes from `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Adapter {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// An adapter with its imports and exports read.
#[derive(Debug)]
pub(crate) struct AdapterModule<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
    pub core: CoreModule,
}

impl<'a> AdapterModule<'a> {
    pub fn parse(adapter: &'a Adapter) -> Result<Self> {
        let core = CoreModule::parse(&adapter.bytes).map_err(|e| LinkError::InvalidAdapter {
            adapter: adapter.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name: &adapter.name,
            bytes: &adapter.bytes,
            core,
        })
    }

    pub fn parse_all(adapters: &'a [Adapter]) -> Result<Vec<Self>> {
        let mut names = HashSet::new();
        let mut parsed = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            if !names.insert(adapter.name.as_str()) {
                return Err(LinkError::DuplicateAdapter(adapter.name.clone()).into());
            }
            parsed.push(Self::parse(adapter)?);
        }
        Ok(parsed)
    }

    /// Whether the adapter imports the main module's memory.
    pub fn needs_memory(&self) -> bool {
        self.core
            .imports
            .iter()
            .any(|i| i.module == ENV_MODULE && i.item == CoreItem::Memory)
    }

    fn unknown_import(&self, module: &str, name: &str) -> LinkError {
        LinkError::AdapterImport {
            adapter: self.name.to_string(),
            module: module.to_string(),
            name: name.to_string(),
        }
    }
}

/// Whether `module` names one of `adapters`.
pub(crate) fn is_adapted(adapters: &[AdapterModule<'_>], module: &str) -> bool {
    adapters.iter().any(|a| a.name == module)
}

/// The main module's imports served by adapters, in import order, with
/// the signatures the adapters export them under.
pub(crate) fn adapted_imports(
    main: &CoreModule,
    adapters: &[AdapterModule<'_>],
) -> Result<Vec<AdaptedImport>> {
    let mut adapted = Vec::new();
    for import in main.imports.iter().filter(|i| is_adapted(adapters, &i.module)) {
        let item = format!("{}.{}", import.module, import.name);
        let Some(adapter) = adapters.iter().find(|a| a.name == import.module) else {
            continue;
        };
        let CoreItem::Func(wanted) = &import.item else {
            return Err(LinkError::UnknownImport {
                module: import.module.clone(),
                name: import.name.clone(),
            }
            .into());
        };
        let Some(provided) = adapter.core.export_func(&import.name) else {
            return Err(LinkError::MissingAdapterExport {
                adapter: adapter.name.to_string(),
                name: import.name.clone(),
            }
            .into());
        };
        let Some(wanted) = wanted else {
            return Err(LinkError::UnknownImport {
                module: import.module.clone(),
                name: import.name.clone(),
            }
            .into());
        };
        expect_sig(&item, provided, &wanted.params, &wanted.results)?;
        adapted.push(AdaptedImport {
            module: import.module.clone(),
            name: import.name.clone(),
            params: wanted.params.clone(),
            results: wanted.results.clone(),
        });
    }
    Ok(adapted)
}

/// Reject adapters importing something neither the main module nor the
/// world provides.
pub(crate) fn check(
    main: &CoreModule,
    adapters: &[AdapterModule<'_>],
    bindings: &Bindings,
) -> Result<()> {
    for adapter in adapters {
        for import in &adapter.core.imports {
            let item = format!("{}.{}", import.module, import.name);
            match (import.module.as_str(), &import.item) {
                (ENV_MODULE, CoreItem::Memory) if import.name == "memory" => {
                    if !main.exports_memory() {
                        return Err(LinkError::MissingMemory.into());
                    }
                }
                (MAIN_MODULE, CoreItem::Func(sig)) => {
                    let export = main
                        .export_func(&import.name)
                        .ok_or_else(|| adapter.unknown_import(&import.module, &import.name))?;
                    let Some(sig) = sig else {
                        return Err(adapter.unknown_import(&import.module, &import.name).into());
                    };
                    expect_sig(&item, export, &sig.params, &sig.results)?;
                }
                (module, CoreItem::Func(sig)) => {
                    if let Some(plan) = bindings.import(module, &import.name) {
                        expect_sig(&item, sig.as_ref(), &plan.lowered.params, &plan.lowered.results)?;
                    } else if bindings.intrinsic(module, &import.name).is_none() {
                        return Err(adapter.unknown_import(module, &import.name).into());
                    }
                }
                (module, _) => return Err(adapter.unknown_import(module, &import.name).into()),
            }
        }
    }
    Ok(())
}
