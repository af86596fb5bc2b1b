//! In-process model of a linked component instance.
//!
//! A [`ComponentInstance`] runs the same [`FunctionPlan`]s the linker turns
//! into wasm, against a simulated [`LinearMemory`] and [`ResourceTable`].
//! Guest export implementations and host imports are Rust closures that see
//! native [`Value`]s; everything between them and the flat core values
//! goes through the canonical ABI exactly as the adapter module would do it.
//!
//! # Example
//!
//! ```
//! use componentize::Value;
//! use componentize::bindgen::Bindings;
//! use componentize::runtime::InstanceBuilder;
//! use componentize::wit::{Features, SourceSet};
//!
//! let mut sources = SourceSet::new();
//! sources.push_str("greet.wit", "package a:b; world w { export greet: func(name: string) -> string; }");
//! let (resolve, world) = sources.resolve(&Features::default(), None).unwrap();
//! let bindings = Bindings::generate(&resolve, world).unwrap();
//!
//! let mut instance = InstanceBuilder::new(&resolve, bindings)
//!     .implement("greet", |_, args| match args.as_slice() {
//!         [Value::String(name)] => Ok(Some(Value::string(format!("hello {name}")))),
//!         _ => Err(componentize::Error::call("greet", "bad arguments")),
//!     })
//!     .instantiate()
//!     .unwrap();
//!
//! let out = instance.invoke("greet", &[Value::string("world")]).unwrap();
//! assert_eq!(out, Some(Value::string("hello world")));
//! assert_eq!(instance.memory().live_allocations(), 0);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use componentize_abi::{
    AbiError, CallGuard, CanonicalAbi, CoreType, CoreValue, InstanceId, LayoutCache,
    LinearMemory, MemoryBoundsError, Ownership, ResourceEntry, ResourceTable, TypeArena, Value,
};

use crate::bindgen::{Bindings, BoundsCheck, Cleanup, FunctionPlan, IntrinsicKind};
use crate::error::{Error, Result};
use crate::link::module::describe;
use crate::link::{AbiMismatchError, LinkError};
use crate::logging::{debug, trace, warn};
use crate::wit::Resolve;

/// An export implementation or a host function.
///
/// The instance is passed back in so implementations can use linear memory
/// and the resource table, and so that calling back into an export while
/// one is active is caught as reentrance.
pub type Func = Rc<dyn Fn(&mut ComponentInstance, Vec<Value>) -> Result<Option<Value>>>;

/// Collects export implementations and host functions for one instance.
pub struct InstanceBuilder {
    arena: TypeArena,
    bindings: Bindings,
    exports: HashMap<String, Func>,
    imports: HashMap<(String, String), Func>,
    id: InstanceId,
    pages: u32,
}

impl InstanceBuilder {
    pub fn new(resolve: &Resolve, bindings: Bindings) -> Self {
        Self {
            arena: resolve.types.clone(),
            bindings,
            exports: HashMap::new(),
            imports: HashMap::new(),
            id: InstanceId::default(),
            pages: 1,
        }
    }

    /// Provide the implementation of an export, keyed by its core name:
    /// `<interface>#<func>` or the bare function name at world level.
    pub fn implement<F>(mut self, core_name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ComponentInstance, Vec<Value>) -> Result<Option<Value>> + 'static,
    {
        self.exports.insert(core_name.into(), Rc::new(f));
        self
    }

    /// Provide a host function for the core import `module`.`name`.
    pub fn host<F>(mut self, module: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ComponentInstance, Vec<Value>) -> Result<Option<Value>> + 'static,
    {
        self.imports.insert((module.into(), name.into()), Rc::new(f));
        self
    }

    /// Owner recorded on handles created by this instance.
    pub fn id(mut self, id: InstanceId) -> Self {
        self.id = id;
        self
    }

    /// Initial size of linear memory in pages.
    pub fn pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    /// Check that every export has an implementation and every import a
    /// host function, then create the instance.
    pub fn instantiate(self) -> Result<ComponentInstance> {
        for plan in &self.bindings.exports {
            if !self.exports.contains_key(&plan.core_name) {
                return Err(LinkError::MissingImplementation(plan.core_name.clone()).into());
            }
        }
        for plan in &self.bindings.imports {
            let key = (plan.core_module.clone(), plan.core_name.clone());
            if !self.imports.contains_key(&key) {
                return Err(LinkError::MissingHostFunction {
                    module: key.0,
                    name: key.1,
                }
                .into());
            }
        }
        if let Some(name) = self
            .exports
            .keys()
            .find(|name| self.bindings.export(name).is_none())
        {
            return Err(LinkError::UnknownExport(name.clone()).into());
        }
        if let Some((module, name)) = self
            .imports
            .keys()
            .find(|(module, name)| self.bindings.import(module, name).is_none())
        {
            return Err(LinkError::UnknownImport {
                module: module.clone(),
                name: name.clone(),
            }
            .into());
        }

        debug!(
            world = %self.bindings.world_name,
            exports = self.exports.len(),
            imports = self.imports.len(),
            "instantiated component model"
        );
        let cache = LayoutCache::new(&self.arena);
        Ok(ComponentInstance {
            id: self.id,
            arena: self.arena,
            cache,
            bindings: Rc::new(self.bindings),
            exports: self.exports,
            imports: self.imports,
            memory: LinearMemory::with_pages(self.pages),
            resources: ResourceTable::new(),
            guard: CallGuard::new(),
            pending: None,
        })
    }
}

/// A result area handed out by [`ComponentInstance::call_export`] and not
/// yet released by [`ComponentInstance::post_return`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    core_name: String,
    area: u32,
}

/// One instance of a component: its memory, resource table and in-call
/// flag.
pub struct ComponentInstance {
    id: InstanceId,
    arena: TypeArena,
    cache: LayoutCache,
    bindings: Rc<Bindings>,
    exports: HashMap<String, Func>,
    imports: HashMap<(String, String), Func>,
    memory: LinearMemory,
    resources: ResourceTable,
    guard: CallGuard,
    pending: Option<Pending>,
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("world", &self.bindings.world_name)
            .field("in_call", &self.guard.active())
            .field("live_allocations", &self.memory.live_allocations())
            .field("live_handles", &self.resources.live_count())
            .finish_non_exhaustive()
    }
}

impl ComponentInstance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    /// Core name of the export currently holding the in-call flag.
    pub fn in_call(&self) -> Option<&str> {
        self.guard.active()
    }

    /// Call an export with lifted-side core arguments, as the host would
    /// call the adapter's wrapper.
    ///
    /// When the result is returned through a result area the in-call flag
    /// stays raised and the area stays allocated until
    /// [`post_return`](Self::post_return) is called with the returned
    /// pointer.
    pub fn call_export(&mut self, core_name: &str, args: &[CoreValue]) -> Result<Vec<CoreValue>> {
        let bindings = Rc::clone(&self.bindings);
        let plan = bindings
            .export(core_name)
            .ok_or_else(|| LinkError::UnknownExport(core_name.to_string()))?;
        let func = self
            .exports
            .get(core_name)
            .cloned()
            .ok_or_else(|| LinkError::MissingImplementation(core_name.to_string()))?;
        check_args(plan, &plan.lifted.params, args)?;

        self.guard.enter(core_name)?;
        self.resources.enter_call();
        match self.run_export(plan, &func, args) {
            Ok(out) => {
                if let (Some(_), Some(area)) = (plan.result_area, first_i32(&out)) {
                    trace!(export = core_name, area, "result area pending post-return");
                    self.pending = Some(Pending {
                        core_name: core_name.to_string(),
                        area,
                    });
                } else {
                    self.leave();
                }
                Ok(out)
            }
            Err(e) => {
                self.leave();
                Err(e)
            }
        }
    }

    fn run_export(
        &mut self,
        plan: &FunctionPlan,
        func: &Func,
        args: &[CoreValue],
    ) -> Result<Vec<CoreValue>> {
        for check in &plan.bounds_checks {
            self.bounds_check(check, args)?;
        }
        let params = {
            let abi = CanonicalAbi::new(&self.arena, &self.cache);
            abi.lift_params(&plan.params, args, &self.memory)?
        };
        trace!(export = %plan.core_name, params = params.len(), "calling implementation");
        let result = func(self, params)?;
        let (ty, value) = match (&plan.result, result) {
            (None, None) => return Ok(Vec::new()),
            (Some(ty), Some(value)) => (*ty, value),
            (Some(_), None) => {
                return Err(Error::call(plan.display_name(), "implementation returned no value"));
            }
            (None, Some(_)) => {
                return Err(Error::call(
                    plan.display_name(),
                    "implementation returned a value for a function without a result",
                ));
            }
        };

        let abi = CanonicalAbi::new(&self.arena, &self.cache);
        let Some(block) = plan.result_area else {
            let mut out = Vec::with_capacity(plan.lifted.results.len());
            abi.lower_flat(&value, &ty, &mut self.memory, &mut out)?;
            return Ok(out);
        };
        let area = self.memory.realloc(0, 0, block.align, block.size)?;
        if let Err(e) = abi.store(&value, &ty, &mut self.memory, area) {
            self.memory.free(area, block.size, block.align)?;
            return Err(e.into());
        }
        Ok(vec![CoreValue::I32(area as i32)])
    }

    fn bounds_check(&self, check: &BoundsCheck, args: &[CoreValue]) -> Result<()> {
        let arg = |index: u32| {
            args.get(index as usize)
                .and_then(CoreValue::as_i32)
                .map(|v| v as u32)
                .ok_or_else(|| AbiError::MissingCoreValue(format!("argument {index}")))
        };
        match *check {
            BoundsCheck::Slice {
                ptr,
                len,
                elem_size,
            } => {
                let (ptr, len) = (arg(ptr)?, arg(len)?);
                self.memory
                    .check_bounds(ptr, u64::from(len) * u64::from(elem_size))?;
            }
            BoundsCheck::Record { ptr, size } => {
                self.memory.check_bounds(arg(ptr)?, u64::from(size))?;
            }
        }
        Ok(())
    }

    /// Release the result area of the last call to `core_name`: free every
    /// buffer reachable from it, free the area and clear the in-call flag.
    pub fn post_return(&mut self, core_name: &str, area: u32) -> Result<()> {
        let bindings = Rc::clone(&self.bindings);
        let plan = bindings
            .export(core_name)
            .ok_or_else(|| LinkError::UnknownExport(core_name.to_string()))?;
        let Some(block) = plan.result_area else {
            return Err(Error::call(core_name, "export has no post-return"));
        };
        let expected = Pending {
            core_name: core_name.to_string(),
            area,
        };
        if self.pending.as_ref() != Some(&expected) {
            return Err(Error::call(
                core_name,
                format!("post-return for area {area} does not match a pending call"),
            ));
        }

        let freed = self
            .free_owned(&plan.cleanup, area)
            .and_then(|()| {
                self.memory
                    .free(area, block.size, block.align)
                    .map_err(Error::from)
            });
        self.pending = None;
        self.leave();
        trace!(export = core_name, area, "post-return complete");
        freed
    }

    fn free_owned(&mut self, entries: &[Cleanup], base: u32) -> Result<()> {
        for entry in entries {
            match entry {
                Cleanup::String { offset } => {
                    let at = self.address(base, u64::from(*offset))?;
                    let ptr = self.memory.load_u32(at)?;
                    let len = self.memory.load_u32(self.address(at, 4)?)?;
                    self.memory.free(ptr, len, 1)?;
                }
                Cleanup::List {
                    offset,
                    elem_size,
                    elem_align,
                    elem,
                } => {
                    let at = self.address(base, u64::from(*offset))?;
                    let ptr = self.memory.load_u32(at)?;
                    let len = self.memory.load_u32(self.address(at, 4)?)?;
                    if !elem.is_empty() {
                        for i in 0..len {
                            let item = self.address(ptr, u64::from(i) * u64::from(*elem_size))?;
                            self.free_owned(elem, item)?;
                        }
                    }
                    let bytes = len.checked_mul(*elem_size).ok_or(MemoryBoundsError {
                        ptr,
                        len: u64::from(len) * u64::from(*elem_size),
                        memory_size: self.memory.size(),
                    })?;
                    self.memory.free(ptr, bytes, *elem_align)?;
                }
                Cleanup::Variant {
                    offset,
                    disc_size,
                    cases,
                } => {
                    let at = self.address(base, u64::from(*offset))?;
                    let disc = match disc_size {
                        1 => u32::from(self.memory.load_u8(at)?),
                        2 => u32::from(self.memory.load_u16(at)?),
                        _ => self.memory.load_u32(at)?,
                    };
                    if let Some((_, owned)) = cases.iter().find(|(case, _)| *case == disc) {
                        self.free_owned(owned, base)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// `base + delta` as a guest address, or a bounds error when the sum
    /// leaves the 32-bit address space.
    fn address(&self, base: u32, delta: u64) -> Result<u32> {
        u64::from(base)
            .checked_add(delta)
            .and_then(|at| u32::try_from(at).ok())
            .ok_or_else(|| {
                MemoryBoundsError {
                    ptr: base,
                    len: delta,
                    memory_size: self.memory.size(),
                }
                .into()
            })
    }

    fn leave(&mut self) {
        self.resources.exit_call();
        self.guard.exit();
    }

    /// Call an export with native values: lower the arguments into memory,
    /// call, lift the result and run post-return. Argument buffers are
    /// freed afterwards.
    pub fn invoke(&mut self, core_name: &str, args: &[Value]) -> Result<Option<Value>> {
        let bindings = Rc::clone(&self.bindings);
        let plan = bindings
            .export(core_name)
            .ok_or_else(|| LinkError::UnknownExport(core_name.to_string()))?;

        let before = self.allocation_set();
        let lowered = {
            let abi = CanonicalAbi::new(&self.arena, &self.cache);
            abi.lower_params(&plan.params, args, &mut self.memory)
        };
        let temporaries: Vec<u32> = self
            .allocation_set()
            .difference(&before)
            .copied()
            .collect();
        let outcome = match lowered {
            Ok(flat) => self.invoke_lowered(plan, &flat),
            Err(e) => Err(e.into()),
        };
        self.free_all(&temporaries)?;
        outcome
    }

    fn invoke_lowered(&mut self, plan: &FunctionPlan, flat: &[CoreValue]) -> Result<Option<Value>> {
        let out = self.call_export(&plan.core_name, flat)?;
        let Some(ty) = plan.result else {
            return Ok(None);
        };
        if plan.result_area.is_none() {
            let abi = CanonicalAbi::new(&self.arena, &self.cache);
            return Ok(Some(abi.lift_flat(&ty, &mut out.into_iter(), &self.memory)?));
        }
        let area = first_i32(&out)
            .ok_or_else(|| AbiError::MissingCoreValue("result area pointer".to_string()))?;
        let loaded = {
            let abi = CanonicalAbi::new(&self.arena, &self.cache);
            abi.load(&ty, &self.memory, area)
        };
        let released = self.post_return(&plan.core_name, area);
        let value = loaded?;
        released?;
        Ok(Some(value))
    }

    /// Run an imported function as its canonical lowering would, given the
    /// lowered-side core arguments the core module passed.
    ///
    /// Arguments are lifted out of memory and handed to the host function.
    /// The result is stored through the trailing return pointer when the
    /// signature has one, and returned as flat values otherwise; buffers
    /// it owns are allocated in the instance's memory and belong to the
    /// caller.
    pub fn call_import(
        &mut self,
        module: &str,
        name: &str,
        args: &[CoreValue],
    ) -> Result<Vec<CoreValue>> {
        let bindings = Rc::clone(&self.bindings);
        let unknown = || LinkError::UnknownImport {
            module: module.to_string(),
            name: name.to_string(),
        };
        let plan = bindings.import(module, name).ok_or_else(unknown)?;
        let host = self
            .imports
            .get(&(module.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| LinkError::MissingHostFunction {
                module: module.to_string(),
                name: name.to_string(),
            })?;
        check_args(plan, &plan.lowered.params, args)?;

        let (params, retptr) = match (plan.lowered.retptr, args.split_last()) {
            (true, Some((last, rest))) => (rest, last.as_i32().map(|p| p as u32)),
            _ => (args, None),
        };
        let values = {
            let abi = CanonicalAbi::new(&self.arena, &self.cache);
            abi.lift_params(&plan.params, params, &self.memory)?
        };
        trace!(module, name, params = values.len(), "calling host function");
        let result = host(self, values)?;

        let abi = CanonicalAbi::new(&self.arena, &self.cache);
        match (&plan.result, result, retptr) {
            (None, None, _) => Ok(Vec::new()),
            (Some(ty), Some(value), Some(ptr)) => {
                abi.store(&value, ty, &mut self.memory, ptr)?;
                Ok(Vec::new())
            }
            (Some(ty), Some(value), None) => {
                let mut out = Vec::with_capacity(plan.lowered.results.len());
                abi.lower_flat(&value, ty, &mut self.memory, &mut out)?;
                Ok(out)
            }
            (Some(_), None, _) => Err(Error::call(plan.display_name(), "host returned no value")),
            (None, Some(_), _) => Err(Error::call(
                plan.display_name(),
                "host returned a value for a function without a result",
            )),
        }
    }

    /// Call an import with native values the way the core module would:
    /// lower the arguments, reserve the return area, call, read the
    /// result back and free every temporary the call allocated.
    pub fn invoke_import(
        &mut self,
        module: &str,
        name: &str,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let bindings = Rc::clone(&self.bindings);
        let plan = bindings
            .import(module, name)
            .ok_or_else(|| LinkError::UnknownImport {
                module: module.to_string(),
                name: name.to_string(),
            })?;

        let before = self.allocation_set();
        let outcome = self.invoke_import_lowered(plan, args);
        let temporaries: Vec<u32> = self
            .allocation_set()
            .difference(&before)
            .copied()
            .collect();
        self.free_all(&temporaries)?;
        debug!(import = %plan.display_name(), freed = temporaries.len(), "import call complete");
        outcome
    }

    fn invoke_import_lowered(
        &mut self,
        plan: &FunctionPlan,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let mut flat = {
            let abi = CanonicalAbi::new(&self.arena, &self.cache);
            abi.lower_params(&plan.params, args, &mut self.memory)?
        };
        let retptr = match (plan.lowered.retptr, &plan.result) {
            (true, Some(ty)) => {
                let layout = self.cache.layout(&self.arena, ty)?;
                let ptr = self
                    .memory
                    .alloc(layout.size as u32, layout.align as u32)?;
                flat.push(CoreValue::I32(ptr as i32));
                Some(ptr)
            }
            _ => None,
        };

        let out = self.call_import(&plan.core_module, &plan.core_name, &flat)?;
        let Some(ty) = plan.result else {
            return Ok(None);
        };
        let abi = CanonicalAbi::new(&self.arena, &self.cache);
        let value = match retptr {
            Some(ptr) => abi.load(&ty, &self.memory, ptr)?,
            None => abi.lift_flat(&ty, &mut out.into_iter(), &self.memory)?,
        };
        Ok(Some(value))
    }

    fn allocation_set(&self) -> BTreeSet<u32> {
        self.memory.allocations().map(|(ptr, _)| ptr).collect()
    }

    fn free_all(&mut self, ptrs: &[u32]) -> Result<()> {
        for ptr in ptrs {
            if let Some(alloc) = self.memory.allocation(*ptr) {
                self.memory.free(*ptr, alloc.size, alloc.align)?;
            }
        }
        Ok(())
    }

    /// `resource.new`: a fresh owned handle for `rep`.
    pub fn resource_new(&mut self, rep: u32) -> u32 {
        let handle = self.resources.new_handle(self.id, Ownership::Own, rep);
        trace!(handle, rep, "resource.new");
        handle
    }

    /// `resource.rep`: the representation behind `handle`.
    pub fn resource_rep(&self, handle: u32) -> Result<u32> {
        Ok(self.resources.rep(handle)?)
    }

    /// `resource.drop`: retire `handle`. Fails while it is borrowed.
    pub fn resource_drop(&mut self, handle: u32) -> Result<ResourceEntry> {
        let entry = self.resources.drop_handle(handle)?;
        trace!(handle, rep = entry.rep, "resource.drop");
        Ok(entry)
    }

    /// Borrow `handle` for the remainder of the active call.
    pub fn resource_borrow(&mut self, handle: u32) -> Result<u32> {
        Ok(self.resources.borrow(handle)?)
    }

    /// Dispatch a resource built-in imported by the core module, such as
    /// `[export]a:b/api` `[resource-new]counter`.
    pub fn call_intrinsic(
        &mut self,
        module: &str,
        name: &str,
        args: &[CoreValue],
    ) -> Result<Vec<CoreValue>> {
        let bindings = Rc::clone(&self.bindings);
        let intrinsic = bindings
            .intrinsic(module, name)
            .ok_or_else(|| LinkError::UnknownImport {
                module: module.to_string(),
                name: name.to_string(),
            })?;
        let arg = match args {
            [CoreValue::I32(v)] => *v as u32,
            _ => {
                return Err(AbiMismatchError {
                    item: format!("{module}.{name}"),
                    expected: describe(&[CoreType::I32], &[]),
                    found: describe(&args.iter().map(CoreValue::ty).collect::<Vec<_>>(), &[]),
                }
                .into());
            }
        };
        match intrinsic.kind {
            IntrinsicKind::New => Ok(vec![CoreValue::I32(self.resource_new(arg) as i32)]),
            IntrinsicKind::Rep => Ok(vec![CoreValue::I32(self.resource_rep(arg)? as i32)]),
            IntrinsicKind::Drop => {
                self.resource_drop(arg)?;
                Ok(Vec::new())
            }
        }
    }

    /// Tear the instance down: drop every live handle and clear the
    /// in-call flag. Returns the owned handles that were never dropped.
    pub fn teardown(&mut self) -> Vec<(u32, ResourceEntry)> {
        let leaked = self.resources.teardown();
        if !leaked.is_empty() {
            warn!(
                instance = %self.id,
                handles = ?leaked.iter().map(|(h, _)| *h).collect::<Vec<_>>(),
                "owned handles leaked at teardown"
            );
        }
        self.pending = None;
        self.guard.exit();
        leaked
    }
}

fn first_i32(values: &[CoreValue]) -> Option<u32> {
    values.first().and_then(CoreValue::as_i32).map(|v| v as u32)
}

fn check_args(plan: &FunctionPlan, expected: &[CoreType], args: &[CoreValue]) -> Result<()> {
    let found: Vec<CoreType> = args.iter().map(CoreValue::ty).collect();
    if found != expected {
        return Err(AbiMismatchError {
            item: plan.display_name(),
            expected: describe(expected, &[]),
            found: describe(&found, &[]),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use componentize_abi::ResourceError;

    use super::*;
    use crate::wit::{Features, SourceSet};

    fn builder(wit: &str) -> InstanceBuilder {
        let mut set = SourceSet::new();
        set.push_str("t.wit", wit);
        let (resolve, world) = set.resolve(&Features::default(), None).unwrap();
        let bindings = Bindings::generate(&resolve, world).unwrap();
        InstanceBuilder::new(&resolve, bindings)
    }

    const GREET: &str = "package a:b;
        interface greet { hello: func(name: string) -> string; }
        world w { export greet; }";

    fn hello(_: &mut ComponentInstance, args: Vec<Value>) -> Result<Option<Value>> {
        match args.as_slice() {
            [Value::String(name)] => Ok(Some(Value::string(format!("Hello, {name}!")))),
            other => Err(Error::call("hello", format!("unexpected {other:?}"))),
        }
    }

    #[test]
    fn missing_implementation_fails_instantiation() {
        let err = builder(GREET).instantiate().unwrap_err();
        assert!(matches!(
            err,
            Error::Link(LinkError::MissingImplementation(ref name)) if name == "a:b/greet#hello"
        ));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn string_round_trip_frees_everything() {
        let mut instance = builder(GREET)
            .implement("a:b/greet#hello", hello)
            .instantiate()
            .unwrap();
        let out = instance
            .invoke("a:b/greet#hello", &[Value::string("World")])
            .unwrap();
        assert_eq!(out, Some(Value::string("Hello, World!")));
        assert_eq!(instance.memory().live_allocations(), 0);
        assert_eq!(instance.in_call(), None);
    }

    #[test]
    fn result_area_stays_live_until_post_return() {
        let mut instance = builder(GREET)
            .implement("a:b/greet#hello", hello)
            .instantiate()
            .unwrap();
        let ptr = instance.memory_mut().alloc(2, 1).unwrap();
        instance.memory_mut().write(ptr, b"Al").unwrap();
        let out = instance
            .call_export("a:b/greet#hello", &[CoreValue::I32(ptr as i32), CoreValue::I32(2)])
            .unwrap();
        let area = first_i32(&out).unwrap();
        assert_eq!(instance.in_call(), Some("a:b/greet#hello"));
        // area plus the returned string plus the argument
        assert_eq!(instance.memory().live_allocations(), 3);

        let err = instance
            .call_export("a:b/greet#hello", &[CoreValue::I32(ptr as i32), CoreValue::I32(2)])
            .unwrap_err();
        assert!(matches!(err, Error::Reentrance(_)));

        instance.post_return("a:b/greet#hello", area).unwrap();
        assert_eq!(instance.in_call(), None);
        assert_eq!(instance.memory().live_allocations(), 1);
        assert!(instance.post_return("a:b/greet#hello", area).is_err());
    }

    #[test]
    fn cleanup_offsets_past_the_address_space_are_bounds_errors() {
        let mut instance = builder(GREET)
            .implement("a:b/greet#hello", hello)
            .instantiate()
            .unwrap();
        let err = instance
            .free_owned(&[Cleanup::String { offset: 8 }], u32::MAX - 4)
            .unwrap_err();
        assert!(matches!(err, Error::MemoryBounds(MemoryBoundsError { ptr, .. }) if ptr == u32::MAX - 4));

        // a list whose byte length does not fit in 32 bits
        let ptr = instance.memory_mut().alloc(8, 4).unwrap();
        instance.memory_mut().store_u32(ptr, 16).unwrap();
        instance.memory_mut().store_u32(ptr + 4, u32::MAX).unwrap();
        let list = Cleanup::List {
            offset: 0,
            elem_size: 8,
            elem_align: 4,
            elem: Vec::new(),
        };
        let err = instance.free_owned(&[list], ptr).unwrap_err();
        assert!(matches!(err, Error::MemoryBounds(MemoryBoundsError { ptr: 16, .. })));
    }

    #[test]
    fn out_of_bounds_slice_traps_before_the_implementation() {
        let called = Rc::new(Cell::new(false));
        let seen = Rc::clone(&called);
        let mut instance = builder(GREET)
            .implement("a:b/greet#hello", move |i, args| {
                seen.set(true);
                hello(i, args)
            })
            .instantiate()
            .unwrap();
        let size = instance.memory().size() as i32;
        let err = instance
            .call_export("a:b/greet#hello", &[CoreValue::I32(size - 4), CoreValue::I32(16)])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MemoryBounds(MemoryBoundsError { len: 16, .. })
        ));
        assert!(!called.get());
        assert_eq!(instance.in_call(), None);
    }

    #[test]
    fn host_reentering_an_export_is_rejected() {
        let mut instance = builder(
            "package a:b;
             world w {
                 import notify: func();
                 export run: func() -> u32;
             }",
        )
        .host("$root", "notify", |i, _| {
            i.invoke("run", &[])?;
            Ok(None)
        })
        .implement("run", |i, _| {
            i.invoke_import("$root", "notify", &[])?;
            Ok(Some(Value::U32(1)))
        })
        .instantiate()
        .unwrap();
        let err = instance.invoke("run", &[]).unwrap_err();
        match err {
            Error::Reentrance(e) => {
                assert_eq!(e.active, "run");
                assert_eq!(e.attempted, "run");
            }
            other => panic!("expected reentrance, got {other:?}"),
        }
        assert_eq!(instance.in_call(), None);
    }

    #[test]
    fn import_temporaries_are_freed() {
        let mut instance = builder(
            "package a:b;
             world w {
                 import lookup: func(keys: list<string>) -> option<string>;
                 export run: func();
             }",
        )
        .host("$root", "lookup", |_, args| match args.as_slice() {
            [Value::List(keys)] => Ok(Some(Value::Option(
                keys.first().cloned().map(Box::new),
            ))),
            other => Err(Error::call("lookup", format!("unexpected {other:?}"))),
        })
        .implement("run", |_, _| Ok(None))
        .instantiate()
        .unwrap();

        let out = instance
            .invoke_import(
                "$root",
                "lookup",
                &[Value::List(vec![Value::string("k1"), Value::string("k2")])],
            )
            .unwrap();
        assert_eq!(out, Some(Value::Option(Some(Box::new(Value::string("k1"))))));
        assert_eq!(instance.memory().live_allocations(), 0);
    }

    #[test]
    fn resource_intrinsics_follow_handle_rules() {
        let mut instance = builder(
            "package a:b;
             interface api { resource counter { get: func() -> u32; } }
             world w { export api; }",
        )
        .implement("a:b/api#[method]counter.get", |i, args| match args.as_slice() {
            [Value::Borrow(handle)] => {
                let rep = i.resource_borrow(*handle)?;
                Ok(Some(Value::U32(rep)))
            }
            other => Err(Error::call("get", format!("unexpected {other:?}"))),
        })
        .instantiate()
        .unwrap();

        let module = "[export]a:b/api";
        let out = instance
            .call_intrinsic(module, "[resource-new]counter", &[CoreValue::I32(42)])
            .unwrap();
        assert_eq!(out, vec![CoreValue::I32(1)]);
        let rep = instance
            .call_intrinsic(module, "[resource-rep]counter", &[CoreValue::I32(1)])
            .unwrap();
        assert_eq!(rep, vec![CoreValue::I32(42)]);

        let got = instance
            .invoke("a:b/api#[method]counter.get", &[Value::Borrow(1)])
            .unwrap();
        assert_eq!(got, Some(Value::U32(42)));
        assert_eq!(instance.resources().get(1).unwrap().borrows, 0);

        instance
            .call_intrinsic(module, "[resource-drop]counter", &[CoreValue::I32(1)])
            .unwrap();
        assert!(matches!(
            instance.resource_rep(1),
            Err(Error::Resource(ResourceError::UseAfterDrop(1)))
        ));
    }

    #[test]
    fn teardown_reports_leaked_handles() {
        let mut instance = builder("package a:b; world w { export run: func(); }")
            .implement("run", |_, _| Ok(None))
            .instantiate()
            .unwrap();
        let kept = instance.resource_new(7);
        let dropped = instance.resource_new(8);
        instance.resource_drop(dropped).unwrap();
        let leaked = instance.teardown();
        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked[0].0, kept);
        assert_eq!(instance.resources().live_count(), 0);
    }

    #[test]
    fn unknown_host_function_is_rejected() {
        let err = builder("package a:b; world w { export run: func(); }")
            .implement("run", |_, _| Ok(None))
            .host("$root", "nope", |_, _| Ok(None))
            .instantiate()
            .unwrap_err();
        assert!(matches!(err, Error::Link(LinkError::UnknownImport { .. })));
    }
}
