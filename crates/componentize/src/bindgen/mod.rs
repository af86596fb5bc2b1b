//! Adapter plans for a world and the wasm glue modules built from them.
//!
//! [`Bindings::generate`] walks every import and export of a world and
//! records, per function, the flattened core signatures on both sides of the
//! boundary, the canonical options the lift or lower needs, the bounds
//! checks run on incoming pointers and the memory the post-return function
//! must release. The linker turns the plans into wasm; the runtime model in
//! [`crate::runtime`] executes the same plans directly.

mod adapter;
mod plan;
mod shim;

use std::fmt::Write;

use componentize_abi::{LayoutCache, TypeDefKind, TypeId};

pub use adapter::{MAIN_INSTANCE, adapter_module};
pub use plan::{
    Block, BoundsCheck, CanonOptions, Cleanup, Direction, FunctionPlan, ROOT_MODULE,
};
pub use shim::{AdaptedImport, SHIM_TABLE, ShimModules, shim_modules};

use crate::error::Result;
use crate::logging::{debug, trace};
use crate::wit::{Resolve, WorldId, WorldItem};

/// Canonical built-in for a resource handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicKind {
    New,
    Rep,
    Drop,
}

impl IntrinsicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntrinsicKind::New => "resource-new",
            IntrinsicKind::Rep => "resource-rep",
            IntrinsicKind::Drop => "resource-drop",
        }
    }
}

/// A resource built-in the core module may import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIntrinsic {
    pub kind: IntrinsicKind,
    /// Core import module: the interface name, prefixed with `[export]`
    /// for resources the component defines itself.
    pub module: String,
    /// Core import field, e.g. `[resource-drop]counter`.
    pub name: String,
    pub resource: TypeId,
    /// Name of the resource inside its interface.
    pub resource_name: String,
    /// Whether the resource is defined by the host.
    pub imported: bool,
}

/// All adapter plans for one world.
#[derive(Debug, Clone, PartialEq)]
pub struct Bindings {
    pub world: WorldId,
    pub world_name: String,
    pub imports: Vec<FunctionPlan>,
    pub exports: Vec<FunctionPlan>,
    pub intrinsics: Vec<ResourceIntrinsic>,
}

impl Bindings {
    /// Plan every function of `world`.
    pub fn generate(resolve: &Resolve, world: WorldId) -> Result<Self> {
        let cache = LayoutCache::new(&resolve.types);
        let w = resolve.world(world)?;
        let world_name = resolve.world_id(world).unwrap_or_else(|| w.name.clone());
        let mut bindings = Bindings {
            world,
            world_name,
            imports: Vec::new(),
            exports: Vec::new(),
            intrinsics: Vec::new(),
        };

        for (direction, items) in [(Direction::Import, &w.imports), (Direction::Export, &w.exports)] {
            for (key, item) in items {
                match item {
                    WorldItem::Interface(id) => {
                        let name = resolve.name_world_key(key);
                        let iface = resolve.interface(*id)?;
                        for func in iface.functions.values() {
                            let plan = FunctionPlan::new(
                                &resolve.types,
                                &cache,
                                direction,
                                Some(&name),
                                func,
                            )?;
                            bindings.push(plan);
                        }
                        for (ty_name, ty) in &iface.types {
                            if resolve.types.get(*ty)?.kind == TypeDefKind::Resource {
                                bindings.push_resource(direction, &name, ty_name, *ty);
                            }
                        }
                    }
                    WorldItem::Function(func) => {
                        let plan =
                            FunctionPlan::new(&resolve.types, &cache, direction, None, func)?;
                        bindings.push(plan);
                    }
                    WorldItem::Type(_) => {}
                }
            }
        }

        debug!(
            world = %bindings.world_name,
            imports = bindings.imports.len(),
            exports = bindings.exports.len(),
            intrinsics = bindings.intrinsics.len(),
            "planned bindings"
        );
        Ok(bindings)
    }

    fn push(&mut self, plan: FunctionPlan) {
        trace!(func = %plan.display_name(), lowered = %plan.lowered, "planned function");
        match plan.direction {
            Direction::Import => self.imports.push(plan),
            Direction::Export => self.exports.push(plan),
        }
    }

    fn push_resource(&mut self, direction: Direction, iface: &str, name: &str, resource: TypeId) {
        let (module, kinds): (String, &[IntrinsicKind]) = match direction {
            Direction::Import => (iface.to_string(), &[IntrinsicKind::Drop]),
            Direction::Export => (
                format!("[export]{iface}"),
                &[IntrinsicKind::New, IntrinsicKind::Rep, IntrinsicKind::Drop],
            ),
        };
        for kind in kinds {
            self.intrinsics.push(ResourceIntrinsic {
                kind: *kind,
                module: module.clone(),
                name: format!("[{}]{name}", kind.as_str()),
                resource,
                resource_name: name.to_string(),
                imported: direction == Direction::Import,
            });
        }
    }

    pub fn export(&self, core_name: &str) -> Option<&FunctionPlan> {
        self.exports.iter().find(|p| p.core_name == core_name)
    }

    pub fn import(&self, module: &str, name: &str) -> Option<&FunctionPlan> {
        self.imports
            .iter()
            .find(|p| p.core_module == module && p.core_name == name)
    }

    pub fn intrinsic(&self, module: &str, name: &str) -> Option<&ResourceIntrinsic> {
        self.intrinsics
            .iter()
            .find(|i| i.module == module && i.name == name)
    }

    /// Whether the adapter module needs the core module's memory.
    pub fn adapter_needs_memory(&self) -> bool {
        self.exports
            .iter()
            .any(|p| !p.bounds_checks.is_empty() || p.result_area.is_some())
    }

    /// Whether the adapter module allocates result areas.
    pub fn adapter_needs_realloc(&self) -> bool {
        self.exports.iter().any(|p| p.result_area.is_some())
    }

    /// Whether the core module must export `memory`.
    pub fn needs_memory(&self) -> bool {
        self.adapter_needs_memory()
            || self
                .imports
                .iter()
                .chain(&self.exports)
                .any(|p| p.options.memory)
    }

    /// Whether the core module must export `cabi_realloc`.
    pub fn needs_realloc(&self) -> bool {
        self.adapter_needs_realloc()
            || self
                .imports
                .iter()
                .chain(&self.exports)
                .any(|p| p.options.realloc)
    }

    /// Human-readable listing of every plan.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "world {}", self.world_name);
        for plan in self.imports.iter().chain(&self.exports) {
            let direction = match plan.direction {
                Direction::Import => "import",
                Direction::Export => "export",
            };
            let _ = writeln!(out, "{direction} {}", plan.display_name());
            match plan.direction {
                Direction::Import => {
                    let _ = writeln!(out, "  core import: {}.{}", plan.core_module, plan.core_name);
                }
                Direction::Export => {
                    let _ = writeln!(out, "  core export: {}", plan.core_name);
                }
            }
            let _ = writeln!(out, "  lifted:  {}", plan.lifted);
            let _ = writeln!(out, "  lowered: {}", plan.lowered);
            if let Some(spill) = plan.spill {
                let _ = writeln!(
                    out,
                    "  params spill to memory: {} bytes, align {}",
                    spill.size, spill.align
                );
            }
            if let Some(area) = plan.result_area {
                let _ = writeln!(
                    out,
                    "  result area: {} bytes, align {}",
                    area.size, area.align
                );
            }
            let post = match plan.post_return() {
                Some(name) => format!(
                    "{name}, frees {} buffer(s)",
                    Cleanup::buffers(&plan.cleanup)
                ),
                None => "none".to_string(),
            };
            let _ = writeln!(out, "  post-return: {post}");
        }
        for intrinsic in &self.intrinsics {
            let _ = writeln!(out, "intrinsic {}.{}", intrinsic.module, intrinsic.name);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wit::{Features, SourceSet};

    fn bindings(wit: &str) -> Bindings {
        let mut set = SourceSet::new();
        set.push_str("t.wit", wit);
        let (resolve, world) = set.resolve(&Features::default(), None).unwrap();
        Bindings::generate(&resolve, world).unwrap()
    }

    #[test]
    fn plans_interface_functions_with_core_names() {
        let b = bindings(
            "package a:b;
             interface greet { hello: func(name: string) -> string; }
             world w { import log: func(msg: string); export greet; }",
        );
        let import = b.import("$root", "log").unwrap();
        assert!(import.is_indirect_lowering());
        let export = b.export("a:b/greet#hello").unwrap();
        assert_eq!(export.interface.as_deref(), Some("a:b/greet"));
        assert!(b.needs_memory());
        assert!(b.needs_realloc());
        let text = b.describe();
        assert!(text.contains("post-return: cabi_post_a:b/greet#hello, frees 1 buffer(s)"), "{text}");
    }

    #[test]
    fn resource_intrinsics_per_direction() {
        let b = bindings(
            "package a:b;
             interface host { resource file { read: func() -> u32; } }
             interface api { resource counter { constructor(start: u32); get: func() -> u32; } }
             world w { import host; export api; }",
        );
        assert!(b.intrinsic("a:b/host", "[resource-drop]file").is_some());
        assert!(b.intrinsic("a:b/host", "[resource-new]file").is_none());
        for name in ["[resource-new]counter", "[resource-rep]counter", "[resource-drop]counter"] {
            let i = b.intrinsic("[export]a:b/api", name).unwrap();
            assert!(!i.imported);
        }
        assert!(b.import("a:b/host", "[method]file.read").is_some());
        assert!(b.export("a:b/api#[constructor]counter").is_some());
    }

    #[test]
    fn scalar_world_needs_neither_memory_nor_realloc() {
        let b = bindings("package a:b; world w { export add: func(a: u32, b: u32) -> u32; }");
        assert!(!b.needs_memory());
        assert!(!b.needs_realloc());
        assert!(b.imports.is_empty());
    }
}
