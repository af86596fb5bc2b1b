//! Error types for canonical ABI operations.

use thiserror::Error;

use crate::types::TypeId;

/// Errors that can occur while computing layouts, lowering or lifting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbiError {
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Invalid discriminant {discriminant} for variant with {num_cases} cases")]
    InvalidDiscriminant { discriminant: u32, num_cases: usize },

    #[error("Invalid char value: {0}")]
    InvalidChar(u32),

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Unknown type {0}")]
    UnknownType(TypeId),

    #[error("Type {0} is still a forward reference")]
    UnresolvedType(TypeId),

    #[error("Type {id} is an empty {kind}, which has no canonical ABI representation")]
    EmptyType { id: TypeId, kind: &'static str },

    #[error("Misaligned pointer {ptr:#x}: expected alignment {align}")]
    Misaligned { ptr: u32, align: u32 },

    #[error("Ran out of flattened core values while lifting {0}")]
    MissingCoreValue(String),

    #[error(transparent)]
    MemoryBounds(#[from] MemoryBoundsError),

    #[error("Invalid reallocation of {ptr:#x}: {reason}")]
    InvalidRealloc { ptr: u32, reason: &'static str },
}

/// A pointer/length pair fell outside the instance's linear memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Out of bounds memory access: {ptr:#x} with length {len} exceeds memory size {memory_size}")]
pub struct MemoryBoundsError {
    pub ptr: u32,
    pub len: u64,
    pub memory_size: u64,
}

/// Misuse of a resource handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Unknown resource handle {0}")]
    UnknownHandle(u32),

    #[error("Resource handle {0} used after it was dropped")]
    UseAfterDrop(u32),

    #[error("Resource handle {handle} dropped while {borrows} borrow(s) are outstanding")]
    Borrowed { handle: u32, borrows: u32 },

    #[error("Resource handle {handle} is a borrow and cannot be {action}")]
    NotOwned { handle: u32, action: &'static str },

    #[error("No call frame is active to scope a borrow of handle {0}")]
    NoActiveFrame(u32),
}

/// An export was re-entered before the outer call returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot re-enter instance while `{active}` is executing (attempted `{attempted}`)")]
pub struct ReentranceError {
    pub active: String,
    pub attempted: String,
}
