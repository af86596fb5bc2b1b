//! Linking a core module and the adapter plans of a world into a component.
//!
//! The produced component:
//!
//! 1. imports one instance per imported interface and one function per
//!    world-level imported function;
//! 2. embeds the core module, the adapter module and, when imports pass
//!    data through memory, the shim and fixup modules;
//! 3. instantiates the core module with lowered imports and resource
//!    built-ins, grouped by core import module;
//! 4. lifts the adapter's wrappers with memory, `cabi_realloc` and
//!    post-return options and exports them under the world's names;
//! 5. instantiates adapter modules after the core module and routes the
//!    core module's imports from them through the shim table;
//! 6. carries a `component-type` custom section describing the world.

pub mod adapt;
mod encoding;
mod error;
pub mod metadata;
pub mod module;
mod types;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use componentize_abi::{CoreType, Type, TypeDefKind, TypeId, TypeOwner};
use wasm_encoder::{
    CanonicalOption, ComponentExportKind, ComponentTypeRef, ExportKind, ModuleArg, TypeBounds,
};
use wasmparser::{Validator, WasmFeatures};

pub use adapt::Adapter;
pub use error::{AbiMismatchError, LinkError};
pub use module::{CoreImport, CoreItem, CoreModule, FuncSig};

use crate::bindgen::{
    self, Bindings, FunctionPlan, IntrinsicKind, ResourceIntrinsic, ShimModules,
};
use crate::error::{Error, Result};
use crate::logging::{debug, error, info, trace};
use crate::wit::{Function, FunctionKind, InterfaceId, Resolve, WorldItem};
use adapt::AdapterModule;
use encoding::ComponentEncoding;
use types::{TypeEncoder, instance_type};

/// Options controlling [`link`].
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    /// Run the component through `wasmparser`'s validator before returning it.
    pub validate: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

/// An encoded component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentBinary {
    bytes: Vec<u8>,
}

impl ComponentBinary {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the component to `path` atomically: the bytes go to a
    /// temporary file in the same directory which is then renamed over
    /// `path`, so a failed write never leaves a partial file behind.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        file.write_all(&self.bytes).map_err(|e| Error::io(path, e))?;
        file.persist(path).map_err(|e| Error::io(path, e.error))?;
        info!(path = %path.display(), bytes = self.bytes.len(), "wrote component");
        Ok(())
    }
}

/// Check `module` and its `adapters` against the plans in `bindings` and
/// encode the component.
pub fn link(
    resolve: &Resolve,
    bindings: &Bindings,
    module: &[u8],
    adapters: &[Adapter],
    options: LinkOptions,
) -> Result<ComponentBinary> {
    let core = CoreModule::parse(module)?;
    let adapters = AdapterModule::parse_all(adapters)?;
    check(&core, bindings, &adapters)?;
    let bytes = Assembler::new(resolve, bindings, &core, &adapters).assemble(module)?;
    if options.validate {
        validate(&bytes)?;
    }
    debug!(world = %bindings.world_name, bytes = bytes.len(), "linked component");
    Ok(ComponentBinary { bytes })
}

/// Validate a component binary with the default feature set.
pub fn validate(bytes: &[u8]) -> Result<()> {
    Validator::new_with_features(WasmFeatures::default())
        .validate_all(bytes)
        .map_err(|e| {
            error!(error = %e, "component failed validation");
            LinkError::Validation(e.to_string())
        })?;
    Ok(())
}

const REALLOC: &str = "cabi_realloc";

/// Reject core modules whose imports and exports do not line up with the
/// world and the adapters.
pub(crate) fn check(
    core: &CoreModule,
    bindings: &Bindings,
    adapters: &[AdapterModule<'_>],
) -> Result<()> {
    for plan in &bindings.exports {
        match core.export_func(&plan.core_name) {
            None => {
                return Err(LinkError::MissingExport {
                    name: plan.core_name.clone(),
                    export: plan.display_name(),
                }
                .into());
            }
            Some(sig) => expect_sig(&plan.core_name, sig, &plan.lowered.params, &plan.lowered.results)?,
        }
    }

    if bindings.needs_memory() && !core.exports_memory() {
        return Err(LinkError::MissingMemory.into());
    }
    if bindings.needs_realloc() {
        let i32s = [CoreType::I32; 4];
        let ok = matches!(
            core.export_func(REALLOC),
            Some(Some(sig)) if sig.matches(&i32s, &[CoreType::I32])
        );
        if !ok {
            return Err(LinkError::MissingRealloc.into());
        }
    }

    adapt::check(core, adapters, bindings)?;
    for import in core
        .imports
        .iter()
        .filter(|i| !adapt::is_adapted(adapters, &i.module))
    {
        let unknown = || LinkError::UnknownImport {
            module: import.module.clone(),
            name: import.name.clone(),
        };
        let CoreItem::Func(sig) = &import.item else {
            return Err(unknown().into());
        };
        let item = format!("{}.{}", import.module, import.name);
        if let Some(plan) = bindings.import(&import.module, &import.name) {
            expect_sig(&item, sig.as_ref(), &plan.lowered.params, &plan.lowered.results)?;
        } else if let Some(intrinsic) = bindings.intrinsic(&import.module, &import.name) {
            let results: &[CoreType] = match intrinsic.kind {
                IntrinsicKind::Drop => &[],
                IntrinsicKind::New | IntrinsicKind::Rep => &[CoreType::I32],
            };
            expect_sig(&item, sig.as_ref(), &[CoreType::I32], results)?;
        } else {
            return Err(unknown().into());
        }
    }

    for plan in &bindings.imports {
        let imports = |module: &CoreModule| {
            module
                .imports
                .iter()
                .any(|i| i.module == plan.core_module && i.name == plan.core_name)
        };
        let imported = imports(core) || adapters.iter().any(|a| imports(&a.core));
        if !imported {
            return Err(LinkError::MissingImport {
                module: plan.core_module.clone(),
                name: plan.core_name.clone(),
            }
            .into());
        }
    }
    trace!(
        imports = core.imports.len(),
        exports = core.exports.len(),
        "core module matches world"
    );
    Ok(())
}

pub(crate) fn expect_sig(
    item: &str,
    found: Option<&FuncSig>,
    params: &[CoreType],
    results: &[CoreType],
) -> Result<()> {
    match found {
        Some(sig) if sig.matches(params, results) => Ok(()),
        _ => Err(AbiMismatchError {
            item: item.to_string(),
            expected: module::describe(params, results),
            found: found.map_or_else(|| "a non-numeric signature".to_string(), FuncSig::describe),
        }
        .into()),
    }
}

struct Assembler<'a> {
    resolve: &'a Resolve,
    bindings: &'a Bindings,
    core: &'a CoreModule,
    adapters: &'a [AdapterModule<'a>],
    enc: ComponentEncoding,
    types: TypeEncoder<'a>,
    /// Imported instances by world key name.
    instances: HashMap<String, u32>,
    /// Imported world-level functions by name.
    funcs: HashMap<String, u32>,
}

impl<'a> Assembler<'a> {
    fn new(
        resolve: &'a Resolve,
        bindings: &'a Bindings,
        core: &'a CoreModule,
        adapters: &'a [AdapterModule<'a>],
    ) -> Self {
        Self {
            resolve,
            bindings,
            core,
            adapters,
            enc: ComponentEncoding::new(),
            types: TypeEncoder::new(resolve),
            instances: HashMap::new(),
            funcs: HashMap::new(),
        }
    }

    fn assemble(mut self, module: &[u8]) -> Result<Vec<u8>> {
        let world = self.resolve.world(self.bindings.world)?;
        self.encode_imports()?;
        self.define_exported_resources()?;

        let main_module = self.enc.core_module_raw(module);
        let adapter = bindgen::adapter_module(self.bindings);
        let adapter_module = adapter.as_deref().map(|bytes| self.enc.core_module_raw(bytes));
        let adapted = adapt::adapted_imports(self.core, self.adapters)?;
        let shims = bindgen::shim_modules(self.bindings, adapted);
        let shim_instance = match &shims {
            Some(shims) => {
                let shim = self.enc.core_module_raw(&shims.shim);
                Some(self.enc.instantiate(shim, Vec::<(&str, ModuleArg)>::new()))
            }
            None => None,
        };

        let main = self.instantiate_main(main_module, shims.as_ref(), shim_instance)?;
        let memory = (self.bindings.needs_memory() || self.adapters.iter().any(|a| a.needs_memory()))
            .then(|| self.enc.alias_core_item(main, ExportKind::Memory, "memory"));
        let realloc = self
            .bindings
            .needs_realloc()
            .then(|| self.enc.alias_core_item(main, ExportKind::Func, REALLOC));

        let mut adapters = HashMap::new();
        for adapter in self.adapters {
            let instance = self.instantiate_adapter(adapter, main, memory, realloc)?;
            adapters.insert(adapter.name, instance);
        }

        if let (Some(shims), Some(shim_instance)) = (&shims, shim_instance) {
            self.fixup(shims, shim_instance, &adapters, memory, realloc)?;
        }

        if let Some(adapter_module) = adapter_module {
            let adapter = self
                .enc
                .instantiate(adapter_module, [(bindgen::MAIN_INSTANCE, ModuleArg::Instance(main))]);
            let lifts = Lifts {
                adapter,
                memory,
                realloc,
            };
            for (key, item) in &world.exports {
                let name = self.resolve.name_world_key(key);
                match item {
                    WorldItem::Interface(id) => self.export_interface(&name, *id, &lifts)?,
                    WorldItem::Function(func) => {
                        let plan = self.export_plan(&func.core_export_name(None))?;
                        let index = self.lift(plan, func, &lifts)?;
                        self.enc.export(&name, ComponentExportKind::Func, index);
                    }
                    WorldItem::Type(_) => {}
                }
            }
        }

        let metadata = metadata::encode_world(self.resolve, self.bindings.world)?;
        self.enc.custom(metadata::COMPONENT_TYPE_SECTION, metadata);
        Ok(self.enc.finish())
    }

    fn encode_imports(&mut self) -> Result<()> {
        let world = self.resolve.world(self.bindings.world)?;
        for (key, item) in &world.imports {
            let name = self.resolve.name_world_key(key);
            match item {
                WorldItem::Interface(id) => {
                    let ty = instance_type(self.resolve, *id, self.types.map())?;
                    let ty = self.enc.instance_type(&ty);
                    let instance = self.enc.import(&name, ComponentTypeRef::Instance(ty));
                    let iface = self.resolve.interface(*id)?;
                    for (type_name, type_id) in &iface.types {
                        let index = self.enc.alias_type(instance, type_name);
                        self.types.insert(*type_id, index);
                    }
                    trace!(interface = %name, instance, "imported interface");
                    self.instances.insert(name, instance);
                }
                WorldItem::Function(func) => {
                    let ty = self.types.func_type(&mut self.enc, func)?;
                    let index = self.enc.import(&name, ComponentTypeRef::Func(ty));
                    self.funcs.insert(name, index);
                }
                WorldItem::Type(id) => {
                    let bounds = if self.is_resource(*id)? {
                        TypeBounds::SubResource
                    } else {
                        TypeBounds::Eq(self.types.type_index(&mut self.enc, *id)?)
                    };
                    let index = self.enc.import(&name, ComponentTypeRef::Type(bounds));
                    self.types.insert(*id, index);
                }
            }
        }
        Ok(())
    }

    fn define_exported_resources(&mut self) -> Result<()> {
        let world = self.resolve.world(self.bindings.world)?;
        for item in world.exports.values() {
            let WorldItem::Interface(id) = item else {
                continue;
            };
            for type_id in self.resolve.interface(*id)?.types.values() {
                if self.is_resource(*type_id)? {
                    let index = self.enc.resource();
                    self.types.insert(*type_id, index);
                }
            }
        }
        Ok(())
    }

    fn is_resource(&self, id: TypeId) -> Result<bool> {
        Ok(self.resolve.types.get(id)?.kind == TypeDefKind::Resource)
    }

    /// The component function a planned import lowers.
    fn imported_func(&mut self, plan: &FunctionPlan) -> Result<u32> {
        let missing = || LinkError::MissingImport {
            module: plan.core_module.clone(),
            name: plan.core_name.clone(),
        };
        match &plan.interface {
            Some(iface) => {
                let instance = *self.instances.get(iface).ok_or_else(missing)?;
                Ok(self.enc.alias_func(instance, &plan.name))
            }
            None => Ok(*self.funcs.get(&plan.name).ok_or_else(missing)?),
        }
    }

    fn intrinsic(&mut self, intrinsic: &ResourceIntrinsic) -> Result<u32> {
        let ty = self.types.get(intrinsic.resource).ok_or_else(|| {
            LinkError::encoding(format!("resource `{}` has no type", intrinsic.resource_name))
        })?;
        Ok(match intrinsic.kind {
            IntrinsicKind::New => self.enc.resource_new(ty),
            IntrinsicKind::Rep => self.enc.resource_rep(ty),
            IntrinsicKind::Drop => self.enc.resource_drop(ty),
        })
    }

    fn instantiate_main(
        &mut self,
        main_module: u32,
        shims: Option<&ShimModules<'_>>,
        shim_instance: Option<u32>,
    ) -> Result<u32> {
        let core = self.core;
        let mut args: Vec<(String, u32)> = Vec::new();
        for module in core.import_modules() {
            let mut items: Vec<(String, u32)> = Vec::new();
            for import in core.imports.iter().filter(|i| i.module == module) {
                let adapted = shims
                    .zip(shim_instance)
                    .and_then(|(s, shim)| Some((shim, s.adapted_slot(module, &import.name)?)));
                let index = if let Some((shim, slot)) = adapted {
                    self.enc
                        .alias_core_item(shim, ExportKind::Func, &ShimModules::slot_name(slot))
                } else if let Some(plan) = self.bindings.import(module, &import.name) {
                    let slot = shims.and_then(|s| {
                        s.lowerings.iter().position(|p| std::ptr::eq(*p, plan))
                    });
                    match (slot, shim_instance) {
                        (Some(slot), Some(shim)) => self.enc.alias_core_item(
                            shim,
                            ExportKind::Func,
                            &ShimModules::slot_name(slot),
                        ),
                        _ => {
                            let func = self.imported_func(plan)?;
                            self.enc.lower_func(func, [])
                        }
                    }
                } else if let Some(intrinsic) = self.bindings.intrinsic(module, &import.name) {
                    self.intrinsic(intrinsic)?
                } else {
                    return Err(LinkError::UnknownImport {
                        module: module.to_string(),
                        name: import.name.clone(),
                    }
                    .into());
                };
                items.push((import.name.clone(), index));
            }
            let instance = self.enc.instantiate_core_exports(
                items
                    .iter()
                    .map(|(name, index)| (name.as_str(), ExportKind::Func, *index)),
            );
            args.push((module.to_string(), instance));
        }
        let main = self.enc.instantiate(
            main_module,
            args.iter()
                .map(|(name, instance)| (name.as_str(), ModuleArg::Instance(*instance))),
        );
        debug!(modules = args.len(), "instantiated core module");
        Ok(main)
    }

    /// Instantiate an adapter against the core module's memory and exports
    /// and the world's lowered imports.
    fn instantiate_adapter(
        &mut self,
        adapter: &AdapterModule<'_>,
        main: u32,
        memory: Option<u32>,
        realloc: Option<u32>,
    ) -> Result<u32> {
        let module = self.enc.core_module_raw(adapter.bytes);
        let mut args: Vec<(String, u32)> = Vec::new();
        for name in adapter.core.import_modules() {
            let instance = match name {
                adapt::MAIN_MODULE => main,
                adapt::ENV_MODULE => {
                    let memory = memory.ok_or(LinkError::MissingMemory)?;
                    self.enc
                        .instantiate_core_exports([("memory", ExportKind::Memory, memory)])
                }
                _ => {
                    let mut items: Vec<(String, u32)> = Vec::new();
                    for import in adapter.core.imports.iter().filter(|i| i.module == name) {
                        let index = if let Some(plan) = self.bindings.import(name, &import.name) {
                            let func = self.imported_func(plan)?;
                            let options = canon_options(plan, memory, realloc)?;
                            self.enc.lower_func(func, options)
                        } else if let Some(intrinsic) = self.bindings.intrinsic(name, &import.name) {
                            self.intrinsic(intrinsic)?
                        } else {
                            return Err(LinkError::AdapterImport {
                                adapter: adapter.name.to_string(),
                                module: name.to_string(),
                                name: import.name.clone(),
                            }
                            .into());
                        };
                        items.push((import.name.clone(), index));
                    }
                    self.enc.instantiate_core_exports(
                        items
                            .iter()
                            .map(|(name, index)| (name.as_str(), ExportKind::Func, *index)),
                    )
                }
            };
            args.push((name.to_string(), instance));
        }
        let instance = self.enc.instantiate(
            module,
            args.iter()
                .map(|(name, instance)| (name.as_str(), ModuleArg::Instance(*instance))),
        );
        debug!(adapter = %adapter.name, modules = args.len(), "instantiated adapter");
        Ok(instance)
    }

    fn fixup(
        &mut self,
        shims: &ShimModules<'_>,
        shim_instance: u32,
        adapters: &HashMap<&str, u32>,
        memory: Option<u32>,
        realloc: Option<u32>,
    ) -> Result<()> {
        let table = self
            .enc
            .alias_core_item(shim_instance, ExportKind::Table, bindgen::SHIM_TABLE);
        let mut items = vec![(bindgen::SHIM_TABLE.to_string(), ExportKind::Table, table)];
        for (slot, plan) in shims.lowerings.iter().enumerate() {
            let func = self.imported_func(plan)?;
            let options = canon_options(plan, memory, realloc)?;
            let lowered = self.enc.lower_func(func, options);
            items.push((ShimModules::slot_name(slot), ExportKind::Func, lowered));
        }
        for import in &shims.adapted {
            let slot = shims.adapted_slot(&import.module, &import.name).ok_or_else(|| {
                LinkError::encoding(format!("`{}` has no shim slot", import.name))
            })?;
            let adapter = *adapters.get(import.module.as_str()).ok_or_else(|| {
                LinkError::encoding(format!("adapter `{}` was not instantiated", import.module))
            })?;
            let func = self.enc.alias_core_item(adapter, ExportKind::Func, &import.name);
            items.push((ShimModules::slot_name(slot), ExportKind::Func, func));
        }
        let fixup_module = self.enc.core_module_raw(&shims.fixup);
        let bag = self.enc.instantiate_core_exports(
            items
                .iter()
                .map(|(name, kind, index)| (name.as_str(), *kind, *index)),
        );
        self.enc
            .instantiate(fixup_module, [("", ModuleArg::Instance(bag))]);
        Ok(())
    }

    fn export_plan(&self, core_name: &str) -> Result<&'a FunctionPlan> {
        self.bindings
            .export(core_name)
            .ok_or_else(|| LinkError::UnknownExport(core_name.to_string()).into())
    }

    /// Export an interface as an instance of a nested component. The
    /// nested component imports the lifted functions and every named type
    /// they use, then exports them again under the interface's own names so
    /// resource functions refer to the resource they are named after.
    fn export_interface(&mut self, name: &str, id: InterfaceId, lifts: &Lifts) -> Result<()> {
        let iface = self.resolve.interface(id)?;
        let mut lifted = Vec::with_capacity(iface.functions.len());
        for func in iface.functions.values() {
            let plan = self.export_plan(&func.core_export_name(Some(name)))?;
            lifted.push((func, self.lift(plan, func, lifts)?));
        }

        let mut inner = ComponentEncoding::new();
        let mut imported = TypeEncoder::new(self.resolve);
        let mut args: Vec<(String, ComponentExportKind, u32)> = Vec::new();
        let mut taken = HashSet::new();
        let deps = self.type_deps(id)?;
        for ty in &deps {
            let def = self.resolve.types.get(*ty)?;
            let arg = unique_name(&mut taken, &format!("import-type-{}", def.name.as_deref().unwrap_or("t")));
            let (bounds, outer) = if def.kind == TypeDefKind::Resource {
                let outer = self.types.get(*ty).ok_or_else(|| {
                    LinkError::encoding(format!("resource `{arg}` has no type"))
                })?;
                (TypeBounds::SubResource, outer)
            } else {
                let local = imported.type_index(&mut inner, *ty)?;
                (TypeBounds::Eq(local), self.types.type_index(&mut self.enc, *ty)?)
            };
            let index = inner.import(&arg, ComponentTypeRef::Type(bounds));
            imported.insert(*ty, index);
            args.push((arg, ComponentExportKind::Type, outer));
        }

        let mut funcs = Vec::with_capacity(lifted.len());
        for (func, outer) in &lifted {
            let arg = import_func_name(func);
            let ty = imported.func_type(&mut inner, func)?;
            let index = inner.import(&arg, ComponentTypeRef::Func(ty));
            args.push((arg, ComponentExportKind::Func, *outer));
            funcs.push((*func, index));
        }

        // Types of other interfaces keep their imported indices; this
        // interface's types are re-exported by name.
        let owner = TypeOwner::Interface(id);
        let mut exported = TypeEncoder::new(self.resolve);
        for ty in &deps {
            if self.resolve.types.get(*ty)?.owner != owner
                && let Some(index) = imported.get(*ty)
            {
                exported.insert(*ty, index);
            }
        }
        let (resources, others): (Vec<_>, Vec<_>) = iface
            .types
            .iter()
            .partition(|(_, ty)| self.is_resource(**ty).unwrap_or(false));
        for (type_name, ty) in resources {
            let index = match exported.get(*ty) {
                Some(index) => index,
                None => imported.get(*ty).ok_or_else(|| {
                    LinkError::encoding(format!("resource `{type_name}` was not imported"))
                })?,
            };
            let index = inner.export(type_name, ComponentExportKind::Type, index);
            exported.insert(*ty, index);
        }
        for (type_name, ty) in others {
            let local = match imported.get(*ty) {
                Some(index) => index,
                // aliases
                None => exported.type_index(&mut inner, *ty)?,
            };
            let index = inner.export(type_name, ComponentExportKind::Type, local);
            exported.insert(*ty, index);
        }
        for (func, index) in funcs {
            let ty = exported.func_type(&mut inner, func)?;
            inner.export_as(
                &func.name,
                ComponentExportKind::Func,
                index,
                Some(ComponentTypeRef::Func(ty)),
            );
        }

        let component = self.enc.nested_component(inner);
        let instance = self.enc.instantiate_component(
            component,
            args.iter()
                .map(|(name, kind, index)| (name.as_str(), *kind, *index)),
        );
        self.enc.export(name, ComponentExportKind::Instance, instance);
        trace!(interface = %name, funcs = iface.functions.len(), imports = args.len(), "exported interface");
        Ok(())
    }

    /// Named types reachable from an interface's types and signatures:
    /// resources first, then the rest in definition order. Aliases are
    /// followed but not listed.
    fn type_deps(&self, id: InterfaceId) -> Result<Vec<TypeId>> {
        let iface = self.resolve.interface(id)?;
        let mut pending: Vec<Type> = iface.types.values().map(|ty| Type::Id(*ty)).collect();
        for func in iface.functions.values() {
            pending.extend(func.param_types());
            pending.extend(func.result);
        }
        let mut seen = HashSet::new();
        let mut named = Vec::new();
        while let Some(ty) = pending.pop() {
            let Type::Id(ty) = ty else { continue };
            if !seen.insert(ty) {
                continue;
            }
            let def = self.resolve.types.get(ty)?;
            pending.extend(def.kind.children());
            if def.name.is_some() && !matches!(def.kind, TypeDefKind::Type(_)) {
                named.push((def.kind != TypeDefKind::Resource, ty));
            }
        }
        named.sort();
        Ok(named.into_iter().map(|(_, ty)| ty).collect())
    }

    fn lift(&mut self, plan: &FunctionPlan, func: &Function, lifts: &Lifts) -> Result<u32> {
        let core = self
            .enc
            .alias_core_item(lifts.adapter, ExportKind::Func, &plan.core_name);
        let ty = self.types.func_type(&mut self.enc, func)?;
        let mut options = canon_options(plan, lifts.memory, lifts.realloc)?;
        if let Some(post) = plan.post_return() {
            let post = self.enc.alias_core_item(lifts.adapter, ExportKind::Func, &post);
            options.push(CanonicalOption::PostReturn(post));
        }
        Ok(self.enc.lift_func(core, ty, options))
    }
}

struct Lifts {
    adapter: u32,
    memory: Option<u32>,
    realloc: Option<u32>,
}

/// Name a nested component imports a lifted function under:
/// `import-func-f`, `import-constructor-r`, `import-method-r-f` or
/// `import-static-r-f`.
fn import_func_name(func: &Function) -> String {
    let (kind, rest) = match func.kind {
        FunctionKind::Freestanding => ("func", func.name.as_str()),
        FunctionKind::Constructor(_) => ("constructor", func.item_name()),
        FunctionKind::Method(_) => ("method", strip_bracket(&func.name)),
        FunctionKind::Static(_) => ("static", strip_bracket(&func.name)),
    };
    format!("import-{kind}-{}", rest.replace('.', "-"))
}

fn strip_bracket(name: &str) -> &str {
    name.split_once(']').map_or(name, |(_, rest)| rest)
}

/// `base`, or `base` with the smallest numeric suffix not yet taken.
fn unique_name(taken: &mut HashSet<String>, base: &str) -> String {
    let mut name = base.to_string();
    let mut n = 1;
    while !taken.insert(name.clone()) {
        name = format!("{base}{n}");
        n += 1;
    }
    name
}

fn canon_options(
    plan: &FunctionPlan,
    memory: Option<u32>,
    realloc: Option<u32>,
) -> Result<Vec<CanonicalOption>> {
    let mut options = Vec::new();
    if plan.options.memory {
        options.push(CanonicalOption::UTF8);
        options.push(CanonicalOption::Memory(memory.ok_or(LinkError::MissingMemory)?));
    }
    if plan.options.realloc {
        options.push(CanonicalOption::Realloc(realloc.ok_or(LinkError::MissingRealloc)?));
    }
    Ok(options)
}
