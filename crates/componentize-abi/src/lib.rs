//! Canonical ABI support for WIT components.
//!
//! This crate holds the index-addressed type model shared by the resolver and
//! the linker, computes Canonical ABI layouts, and implements lifting and
//! lowering of values against a simulated linear memory.
//!
//! # Module Organization
//!
//! - [`types`]: Type arena and type definitions
//! - [`layout`]: Flattening, size and alignment, memoized per type
//! - [`memory`]: Linear memory with a `cabi_realloc` style allocator
//! - [`value`]: Native and flat core values
//! - [`resources`]: Resource handle table
//! - [`guard`]: In-call reentrance flag
//! - `lower` / `lift`: conversions implemented on [`CanonicalAbi`]

mod buffer;
pub mod error;
pub mod guard;
pub mod layout;
mod lift;
mod lower;
pub mod memory;
pub mod resources;
pub mod types;
pub mod value;

pub use buffer::align_to;
pub use error::{AbiError, MemoryBoundsError, ReentranceError, ResourceError};
pub use guard::CallGuard;
pub use layout::{
    AbiLayout, AbiVariant, CoreSignature, CoreType, Flattening, LayoutCache, MAX_FLAT_PARAMS,
    MAX_FLAT_RESULTS, discriminant_size,
};
pub use memory::{Allocation, LinearMemory, PAGE_SIZE};
pub use resources::{InstanceId, Ownership, ResourceEntry, ResourceTable};
pub use types::{Handle, Type, TypeArena, TypeDef, TypeDefKind, TypeId, TypeOwner};
pub use value::{CoreValue, Value};

/// Lifts and lowers values of the types in one arena.
///
/// # Example
///
/// ```
/// use componentize_abi::{CanonicalAbi, LayoutCache, LinearMemory, Type, TypeArena, Value};
///
/// let arena = TypeArena::new();
/// let cache = LayoutCache::new(&arena);
/// let abi = CanonicalAbi::new(&arena, &cache);
/// let mut memory = LinearMemory::new();
///
/// let flat = abi.lower_params(&[Type::String], &[Value::string("hi")], &mut memory).unwrap();
/// assert_eq!(flat.len(), 2);
/// let lifted = abi.lift_params(&[Type::String], &flat, &memory).unwrap();
/// assert_eq!(lifted, vec![Value::string("hi")]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CanonicalAbi<'a> {
    pub(crate) arena: &'a TypeArena,
    pub(crate) cache: &'a LayoutCache,
}

impl<'a> CanonicalAbi<'a> {
    pub fn new(arena: &'a TypeArena, cache: &'a LayoutCache) -> Self {
        Self { arena, cache }
    }

    pub fn arena(&self) -> &'a TypeArena {
        self.arena
    }

    pub fn layout(&self, ty: &Type) -> Result<AbiLayout, AbiError> {
        self.cache.layout(self.arena, ty)
    }

    pub(crate) fn check_alignment(&self, ty: &Type, ptr: u32) -> Result<(), AbiError> {
        let align = self.cache.layout(self.arena, ty)?.align as u32;
        if align > 1 && ptr % align != 0 {
            return Err(AbiError::Misaligned { ptr, align });
        }
        Ok(())
    }

    pub(crate) fn mismatch(&self, ty: &Type, value: &Value) -> AbiError {
        AbiError::TypeMismatch {
            expected: self.arena.describe(ty),
            got: value.kind().to_string(),
        }
    }
}
