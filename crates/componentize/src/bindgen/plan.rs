//! Per-function adapter plans.

use componentize_abi::{
    AbiVariant, CoreSignature, LayoutCache, Type, TypeArena, TypeDefKind, discriminant_size,
};

use crate::error::Result;
use crate::wit::Function;

/// Which side of the component boundary a function sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Provided by the host, called by the core module.
    Import,
    /// Implemented by the core module, called by the host.
    Export,
}

/// Size and alignment of a block of linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub size: u32,
    pub align: u32,
}

/// Range check run on incoming parameters before the implementation sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheck {
    /// `(ptr, len)` pair of a top-level string or list parameter.
    Slice { ptr: u32, len: u32, elem_size: u32 },
    /// The packed parameter record when parameters spill to memory.
    Record { ptr: u32, size: u32 },
}

/// Memory owned by a returned value, freed by post-return.
///
/// Offsets are relative to the base address of the value being cleaned:
/// the result area for top-level entries, one list element for the
/// entries nested in [`Cleanup::List`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    String {
        offset: u32,
    },
    List {
        offset: u32,
        elem_size: u32,
        elem_align: u32,
        elem: Vec<Cleanup>,
    },
    Variant {
        offset: u32,
        disc_size: u32,
        cases: Vec<(u32, Vec<Cleanup>)>,
    },
}

impl Cleanup {
    /// Number of buffers this entry frees for one value, not counting
    /// per-element buffers of lists.
    pub fn buffers(entries: &[Cleanup]) -> usize {
        entries
            .iter()
            .map(|c| match c {
                Cleanup::String { .. } | Cleanup::List { .. } => 1,
                Cleanup::Variant { cases, .. } => cases
                    .iter()
                    .map(|(_, sub)| Cleanup::buffers(sub))
                    .max()
                    .unwrap_or(0),
            })
            .sum()
    }
}

/// Canonical options a lift or lower of this function needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonOptions {
    pub memory: bool,
    pub realloc: bool,
}

/// Everything the linker and the runtime need to know to cross the
/// boundary for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionPlan {
    pub direction: Direction,
    /// Component-level name of the owning interface, `None` at world level.
    pub interface: Option<String>,
    /// Component-level function name.
    pub name: String,
    /// Core import module (`$root` at world level). Empty for exports.
    pub core_module: String,
    /// Core import field, or the name of the implementing core export.
    pub core_name: String,
    pub params: Vec<Type>,
    pub result: Option<Type>,
    /// Signature of the lifted side: what the adapter exports.
    pub lifted: CoreSignature,
    /// Signature of the lowered side: what the core module imports or
    /// implements.
    pub lowered: CoreSignature,
    /// Layout of the packed parameter record when parameters spill.
    pub spill: Option<Block>,
    /// Layout of the result area when the result is returned by pointer.
    pub result_area: Option<Block>,
    pub bounds_checks: Vec<BoundsCheck>,
    pub cleanup: Vec<Cleanup>,
    pub options: CanonOptions,
}

impl FunctionPlan {
    pub(crate) fn new(
        arena: &TypeArena,
        cache: &LayoutCache,
        direction: Direction,
        interface: Option<&str>,
        func: &Function,
    ) -> Result<Self> {
        let params = func.param_types();
        let result = func.result;
        let lifted = cache.signature(arena, &params, result.as_ref(), AbiVariant::GuestExport)?;
        let lowered = cache.signature(arena, &params, result.as_ref(), AbiVariant::GuestImport)?;

        let spill = if lifted.indirect_params {
            let layout = cache.record_layout(arena, &params)?;
            Some(block(layout.size, layout.align))
        } else {
            None
        };
        let result_area = match result {
            Some(ty) if lifted.retptr => {
                let layout = cache.layout(arena, &ty)?;
                Some(block(layout.size, layout.align))
            }
            _ => None,
        };

        let mut params_need_memory = false;
        for ty in &params {
            params_need_memory |= cache.needs_memory(arena, ty)?;
        }
        let result_needs_memory = match &result {
            Some(ty) => cache.needs_memory(arena, ty)?,
            None => false,
        };

        let (core_module, core_name, options) = match direction {
            Direction::Import => (
                interface.unwrap_or(ROOT_MODULE).to_string(),
                func.name.clone(),
                CanonOptions {
                    memory: params_need_memory
                        || result_needs_memory
                        || lowered.indirect_params
                        || lowered.retptr,
                    realloc: result_needs_memory,
                },
            ),
            Direction::Export => (
                String::new(),
                func.core_export_name(interface),
                CanonOptions {
                    memory: params_need_memory
                        || result_needs_memory
                        || lifted.indirect_params
                        || lifted.retptr,
                    realloc: params_need_memory || lifted.indirect_params,
                },
            ),
        };

        let bounds_checks = match direction {
            Direction::Export => bounds_checks(arena, cache, &params, spill)?,
            Direction::Import => Vec::new(),
        };
        let mut cleanup = Vec::new();
        if let (Direction::Export, Some(ty), Some(_)) = (direction, result, result_area) {
            collect_cleanup(arena, cache, &ty, 0, &mut cleanup)?;
        }

        Ok(Self {
            direction,
            interface: interface.map(str::to_string),
            name: func.name.clone(),
            core_module,
            core_name,
            params,
            result,
            lifted,
            lowered,
            spill,
            result_area,
            bounds_checks,
            cleanup,
            options,
        })
    }

    /// Name of the post-return export, present when the result is
    /// returned through a result area.
    pub fn post_return(&self) -> Option<String> {
        match (self.direction, self.result_area) {
            (Direction::Export, Some(_)) => Some(format!("cabi_post_{}", self.core_name)),
            _ => None,
        }
    }

    /// `iface#name` or the bare name, for messages.
    pub fn display_name(&self) -> String {
        match &self.interface {
            Some(iface) => format!("{iface}#{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Imports that move data through memory are lowered through the
    /// shim table.
    pub fn is_indirect_lowering(&self) -> bool {
        self.direction == Direction::Import && self.options.memory
    }
}

/// Core import module of world-level functions.
pub const ROOT_MODULE: &str = "$root";

fn block(size: usize, align: usize) -> Block {
    Block {
        size: size as u32,
        align: align as u32,
    }
}

fn bounds_checks(
    arena: &TypeArena,
    cache: &LayoutCache,
    params: &[Type],
    spill: Option<Block>,
) -> Result<Vec<BoundsCheck>> {
    if let Some(spill) = spill {
        return Ok(vec![BoundsCheck::Record {
            ptr: 0,
            size: spill.size,
        }]);
    }
    let mut checks = Vec::new();
    let mut pos = 0u32;
    for ty in params {
        let width = cache.layout(arena, ty)?.core_count() as u32;
        let elem_size = match arena.dealias(*ty)? {
            Type::String => Some(1),
            Type::Id(id) => match &arena.get(id)?.kind {
                TypeDefKind::List(elem) => Some(cache.layout(arena, elem)?.size as u32),
                _ => None,
            },
            _ => None,
        };
        if let Some(elem_size) = elem_size {
            checks.push(BoundsCheck::Slice {
                ptr: pos,
                len: pos + 1,
                elem_size,
            });
        }
        pos += width;
    }
    Ok(checks)
}

/// Append the cleanup entries for a value of type `ty` stored at `offset`.
pub(crate) fn collect_cleanup(
    arena: &TypeArena,
    cache: &LayoutCache,
    ty: &Type,
    offset: u32,
    out: &mut Vec<Cleanup>,
) -> Result<()> {
    let id = match arena.dealias(*ty)? {
        Type::String => {
            out.push(Cleanup::String { offset });
            return Ok(());
        }
        Type::Id(id) => id,
        _ => return Ok(()),
    };
    let kind = &arena.get(id)?.kind;
    match kind {
        TypeDefKind::Record(r) => {
            let types: Vec<Type> = r.fields.iter().map(|f| f.ty).collect();
            fields_cleanup(arena, cache, &types, offset, out)?;
        }
        TypeDefKind::Tuple(t) => fields_cleanup(arena, cache, &t.types, offset, out)?,
        TypeDefKind::List(elem) => {
            let layout = cache.layout(arena, elem)?;
            let mut nested = Vec::new();
            collect_cleanup(arena, cache, elem, 0, &mut nested)?;
            out.push(Cleanup::List {
                offset,
                elem_size: layout.size as u32,
                elem_align: layout.align as u32,
                elem: nested,
            });
        }
        _ => {
            let Some(cases) = kind.cases() else {
                return Ok(());
            };
            let payload = offset + cache.payload_offset(arena, &cases)? as u32;
            let mut owned = Vec::new();
            for (i, case) in cases.iter().enumerate() {
                let Some(case) = case else { continue };
                let mut sub = Vec::new();
                collect_cleanup(arena, cache, case, payload, &mut sub)?;
                if !sub.is_empty() {
                    owned.push((i as u32, sub));
                }
            }
            if !owned.is_empty() {
                out.push(Cleanup::Variant {
                    offset,
                    disc_size: discriminant_size(cases.len()) as u32,
                    cases: owned,
                });
            }
        }
    }
    Ok(())
}

fn fields_cleanup(
    arena: &TypeArena,
    cache: &LayoutCache,
    types: &[Type],
    offset: u32,
    out: &mut Vec<Cleanup>,
) -> Result<()> {
    let offsets = cache.field_offsets(arena, types)?;
    for (ty, field) in types.iter().zip(offsets) {
        collect_cleanup(arena, cache, ty, offset + field as u32, out)?;
    }
    Ok(())
}
