//! Canonical ABI layout calculation.
//!
//! [`LayoutCache`] computes the flattened core representation, byte size and
//! alignment of every type in a [`TypeArena`], remembering each result so
//! later lookups of the same [`TypeId`] are free. Function signatures are
//! derived from the per-type layouts with [`LayoutCache::signature`].

use std::fmt;
use std::sync::OnceLock;

use crate::AbiError;
use crate::buffer::align_to;
use crate::types::{Handle, Type, TypeArena, TypeDefKind, TypeId};

/// Maximum number of flat core parameters before parameters spill to memory.
pub const MAX_FLAT_PARAMS: usize = 16;
/// Maximum number of flat core results before the result spills to memory.
pub const MAX_FLAT_RESULTS: usize = 1;

/// Core WebAssembly value type used in a flattened signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    I32,
    I64,
    F32,
    F64,
}

impl CoreType {
    pub fn bits(self) -> u32 {
        match self {
            CoreType::I32 | CoreType::F32 => 32,
            CoreType::I64 | CoreType::F64 => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoreType::I32 => "i32",
            CoreType::I64 => "i64",
            CoreType::F32 => "f32",
            CoreType::F64 => "f64",
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join two core types occupying the same slot of a flattened variant.
pub fn join(a: CoreType, b: CoreType) -> CoreType {
    match (a, b) {
        (a, b) if a == b => a,
        (CoreType::I32, CoreType::F32) | (CoreType::F32, CoreType::I32) => CoreType::I32,
        _ => CoreType::I64,
    }
}

/// Whether a value travels as flat core values or through linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flattening {
    Direct,
    Indirect,
}

/// Derived Canonical ABI facts about one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiLayout {
    pub flat: Vec<CoreType>,
    pub size: usize,
    pub align: usize,
    pub flattening: Flattening,
}

impl AbiLayout {
    fn new(flat: Vec<CoreType>, size: usize, align: usize) -> Self {
        let flattening = if flat.len() > MAX_FLAT_PARAMS {
            Flattening::Indirect
        } else {
            Flattening::Direct
        };
        Self {
            flat,
            size,
            align,
            flattening,
        }
    }

    /// Number of flat core values this type occupies.
    pub fn core_count(&self) -> usize {
        self.flat.len()
    }

    pub fn is_indirect(&self) -> bool {
        self.flattening == Flattening::Indirect
    }
}

/// Which side of the boundary a core signature is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiVariant {
    /// A function the core module imports: indirect results use a return pointer parameter.
    GuestImport,
    /// A function the core module exports: indirect results are returned as a pointer.
    GuestExport,
}

/// Flattened core signature of a component function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSignature {
    pub params: Vec<CoreType>,
    pub results: Vec<CoreType>,
    /// Parameters are passed as a single pointer to a packed record.
    pub indirect_params: bool,
    /// The result is written to linear memory and addressed by pointer.
    pub retptr: bool,
}

impl fmt::Display for CoreSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self.params.iter().map(|t| t.as_str()).collect();
        let results: Vec<_> = self.results.iter().map(|t| t.as_str()).collect();
        write!(f, "({}) -> ({})", params.join(", "), results.join(", "))
    }
}

/// Memoized layouts for every type of an arena.
///
/// Each slot is written at most once; concurrent callers computing the same
/// layout race benignly and the first stored value wins.
#[derive(Debug, Default)]
pub struct LayoutCache {
    slots: Vec<OnceLock<AbiLayout>>,
}

impl LayoutCache {
    /// Create a cache sized for `arena`. Types allocated later are computed
    /// on demand without being remembered.
    pub fn new(arena: &TypeArena) -> Self {
        Self {
            slots: (0..arena.len()).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Number of layouts computed so far.
    pub fn cached(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    pub fn layout(&self, arena: &TypeArena, ty: &Type) -> Result<AbiLayout, AbiError> {
        match ty {
            Type::Bool | Type::U8 | Type::S8 => Ok(AbiLayout::new(vec![CoreType::I32], 1, 1)),
            Type::U16 | Type::S16 => Ok(AbiLayout::new(vec![CoreType::I32], 2, 2)),
            Type::U32 | Type::S32 | Type::Char => Ok(AbiLayout::new(vec![CoreType::I32], 4, 4)),
            Type::U64 | Type::S64 => Ok(AbiLayout::new(vec![CoreType::I64], 8, 8)),
            Type::F32 => Ok(AbiLayout::new(vec![CoreType::F32], 4, 4)),
            Type::F64 => Ok(AbiLayout::new(vec![CoreType::F64], 8, 8)),
            Type::String => Ok(AbiLayout::new(vec![CoreType::I32, CoreType::I32], 8, 4)),
            Type::Id(id) => self.layout_of(arena, *id),
        }
    }

    fn layout_of(&self, arena: &TypeArena, id: TypeId) -> Result<AbiLayout, AbiError> {
        let Some(slot) = self.slots.get(id.index()) else {
            return self.compute(arena, id);
        };
        if let Some(layout) = slot.get() {
            return Ok(layout.clone());
        }
        let layout = self.compute(arena, id)?;
        // Insert-if-absent: a concurrent writer may have beaten us here.
        let _ = slot.set(layout.clone());
        Ok(slot.get().cloned().unwrap_or(layout))
    }

    fn compute(&self, arena: &TypeArena, id: TypeId) -> Result<AbiLayout, AbiError> {
        let def = arena.get(id)?;
        let empty = match &def.kind {
            TypeDefKind::Record(r) => r.fields.is_empty(),
            TypeDefKind::Tuple(t) => t.types.is_empty(),
            TypeDefKind::Flags(f) => f.flags.is_empty(),
            TypeDefKind::Enum(e) => e.cases.is_empty(),
            TypeDefKind::Variant(v) => v.cases.is_empty(),
            _ => false,
        };
        if empty {
            return Err(AbiError::EmptyType {
                id,
                kind: def.kind.as_str(),
            });
        }
        match &def.kind {
            TypeDefKind::Type(t) => self.layout(arena, t),
            TypeDefKind::Record(r) => {
                let types: Vec<_> = r.fields.iter().map(|f| f.ty).collect();
                self.record_layout(arena, &types)
            }
            TypeDefKind::Tuple(t) => self.record_layout(arena, &t.types),
            TypeDefKind::Flags(f) => Ok(flags_layout(f.flags.len())),
            TypeDefKind::Enum(e) => {
                let cases = vec![None; e.cases.len()];
                self.variant_layout(arena, &cases)
            }
            TypeDefKind::Variant(v) => {
                let cases: Vec<_> = v.cases.iter().map(|c| c.ty).collect();
                self.variant_layout(arena, &cases)
            }
            TypeDefKind::Option(t) => self.variant_layout(arena, &[None, Some(*t)]),
            TypeDefKind::Result(r) => self.variant_layout(arena, &[r.ok, r.err]),
            TypeDefKind::List(_) => Ok(AbiLayout::new(vec![CoreType::I32, CoreType::I32], 8, 4)),
            TypeDefKind::Resource | TypeDefKind::Handle(_) => {
                Ok(AbiLayout::new(vec![CoreType::I32], 4, 4))
            }
            TypeDefKind::Unknown => Err(AbiError::UnresolvedType(id)),
        }
    }

    /// Layout of an anonymous record made of `types`, used for records,
    /// tuples and spilled parameter lists.
    pub fn record_layout(&self, arena: &TypeArena, types: &[Type]) -> Result<AbiLayout, AbiError> {
        let mut flat = Vec::new();
        let mut offset = 0;
        let mut align = 1;
        for ty in types {
            let field = self.layout(arena, ty)?;
            offset = align_to(offset, field.align) + field.size;
            align = align.max(field.align);
            flat.extend(field.flat);
        }
        Ok(AbiLayout::new(flat, align_to(offset, align), align))
    }

    /// Byte offsets of each field of a record made of `types`.
    pub fn field_offsets(&self, arena: &TypeArena, types: &[Type]) -> Result<Vec<usize>, AbiError> {
        let mut offsets = Vec::with_capacity(types.len());
        let mut offset = 0;
        for ty in types {
            let field = self.layout(arena, ty)?;
            offset = align_to(offset, field.align);
            offsets.push(offset);
            offset += field.size;
        }
        Ok(offsets)
    }

    fn variant_layout(
        &self,
        arena: &TypeArena,
        cases: &[Option<Type>],
    ) -> Result<AbiLayout, AbiError> {
        let disc = discriminant_size(cases.len());
        let mut payload_size = 0;
        let mut payload_align = 1;
        let mut payload_flat: Vec<CoreType> = Vec::new();
        for ty in cases.iter().flatten() {
            let case = self.layout(arena, ty)?;
            payload_size = payload_size.max(case.size);
            payload_align = payload_align.max(case.align);
            for (i, core) in case.flat.iter().enumerate() {
                match payload_flat.get_mut(i) {
                    Some(slot) => *slot = join(*slot, *core),
                    None => payload_flat.push(*core),
                }
            }
        }
        let align = disc.max(payload_align);
        let size = align_to(align_to(disc, payload_align) + payload_size, align);
        let mut flat = vec![CoreType::I32];
        flat.extend(payload_flat);
        Ok(AbiLayout::new(flat, size, align))
    }

    /// Offset of a variant's payload from the start of the variant.
    pub fn payload_offset(&self, arena: &TypeArena, cases: &[Option<Type>]) -> Result<usize, AbiError> {
        let mut payload_align = 1;
        for ty in cases.iter().flatten() {
            payload_align = payload_align.max(self.layout(arena, ty)?.align);
        }
        Ok(align_to(discriminant_size(cases.len()), payload_align))
    }

    /// Flat core signature of a function.
    pub fn signature(
        &self,
        arena: &TypeArena,
        params: &[Type],
        result: Option<&Type>,
        variant: AbiVariant,
    ) -> Result<CoreSignature, AbiError> {
        let mut flat_params = Vec::new();
        for ty in params {
            flat_params.extend(self.layout(arena, ty)?.flat);
        }
        let indirect_params = flat_params.len() > MAX_FLAT_PARAMS;
        if indirect_params {
            flat_params = vec![CoreType::I32];
        }

        let mut flat_results = match result {
            Some(ty) => self.layout(arena, ty)?.flat,
            None => Vec::new(),
        };
        let retptr = flat_results.len() > MAX_FLAT_RESULTS;
        if retptr {
            match variant {
                AbiVariant::GuestImport => {
                    flat_params.push(CoreType::I32);
                    flat_results = Vec::new();
                }
                AbiVariant::GuestExport => flat_results = vec![CoreType::I32],
            }
        }

        Ok(CoreSignature {
            params: flat_params,
            results: flat_results,
            indirect_params,
            retptr,
        })
    }

    /// True when values of this type reference linear memory.
    pub fn needs_memory(&self, arena: &TypeArena, ty: &Type) -> Result<bool, AbiError> {
        let mut visiting = Vec::new();
        needs_memory(arena, ty, &mut visiting)
    }
}

fn needs_memory(arena: &TypeArena, ty: &Type, visiting: &mut Vec<TypeId>) -> Result<bool, AbiError> {
    let id = match ty {
        Type::String => return Ok(true),
        Type::Id(id) => *id,
        _ => return Ok(false),
    };
    if visiting.contains(&id) {
        return Ok(false);
    }
    visiting.push(id);
    let found = match &arena.get(id)?.kind {
        TypeDefKind::List(_) => true,
        TypeDefKind::Type(t) | TypeDefKind::Option(t) => needs_memory(arena, t, visiting)?,
        TypeDefKind::Record(r) => any(arena, r.fields.iter().map(|f| f.ty), visiting)?,
        TypeDefKind::Tuple(t) => any(arena, t.types.iter().copied(), visiting)?,
        TypeDefKind::Variant(v) => any(arena, v.cases.iter().filter_map(|c| c.ty), visiting)?,
        TypeDefKind::Result(r) => any(arena, r.ok.into_iter().chain(r.err), visiting)?,
        TypeDefKind::Enum(_)
        | TypeDefKind::Flags(_)
        | TypeDefKind::Resource
        | TypeDefKind::Handle(Handle::Own(_) | Handle::Borrow(_))
        | TypeDefKind::Unknown => false,
    };
    visiting.pop();
    Ok(found)
}

fn any(
    arena: &TypeArena,
    types: impl Iterator<Item = Type>,
    visiting: &mut Vec<TypeId>,
) -> Result<bool, AbiError> {
    for ty in types {
        if needs_memory(arena, &ty, visiting)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Size in bytes of a discriminant able to distinguish `cases` cases.
pub fn discriminant_size(cases: usize) -> usize {
    match cases {
        0..=0x100 => 1,
        0x101..=0x10000 => 2,
        _ => 4,
    }
}

fn flags_layout(count: usize) -> AbiLayout {
    let words = count.div_ceil(32);
    let flat = vec![CoreType::I32; words];
    match count {
        0 => AbiLayout::new(flat, 0, 1),
        1..=8 => AbiLayout::new(flat, 1, 1),
        9..=16 => AbiLayout::new(flat, 2, 2),
        _ => AbiLayout::new(flat, 4 * words, 4),
    }
}
