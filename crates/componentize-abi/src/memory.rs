//! Linear memory model with a realloc-style allocator.

use std::collections::BTreeMap;

use crate::buffer::{align_to, read_array, read_slice, write_slice};
use crate::error::{AbiError, MemoryBoundsError};

/// Size of a WebAssembly page in bytes.
pub const PAGE_SIZE: u64 = 65536;

/// Addresses below this are never handed out: `0` stays a null pointer and
/// the aligned addresses returned for zero-sized blocks never collide with a
/// live allocation.
const HEAP_BASE: usize = 16;

/// A live allocation made through [`LinearMemory::realloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub size: u32,
    pub align: u32,
}

/// Simulated linear memory of a component instance.
///
/// Memory is sized in whole pages like a real WebAssembly memory and
/// allocations follow the `cabi_realloc(old_ptr, old_size, align, new_size)`
/// convention: a null `old_ptr` allocates, a zero `new_size` frees. Live
/// allocations are tracked so tests can assert that adapters release
/// everything they allocate.
///
/// # Example
///
/// ```
/// use componentize_abi::LinearMemory;
///
/// let mut mem = LinearMemory::new();
/// let ptr = mem.realloc(0, 0, 4, 16).unwrap();
/// mem.store_u32(ptr, 7).unwrap();
/// assert_eq!(mem.load_u32(ptr).unwrap(), 7);
/// mem.realloc(ptr, 16, 4, 0).unwrap();
/// assert_eq!(mem.live_allocations(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearMemory {
    data: Vec<u8>,
    next: usize,
    live: BTreeMap<u32, Allocation>,
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::with_pages(1)
    }
}

impl LinearMemory {
    /// Create a memory of one page.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: u32) -> Self {
        Self {
            data: vec![0; pages as usize * PAGE_SIZE as usize],
            next: HEAP_BASE,
            live: BTreeMap::new(),
        }
    }

    /// Current size in bytes (`memory.size * 65536`).
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn pages(&self) -> u32 {
        (self.size() / PAGE_SIZE) as u32
    }

    /// Grow by `delta` pages, returning the previous page count.
    pub fn grow(&mut self, delta: u32) -> u32 {
        let old = self.pages();
        let new_len = self.data.len() + delta as usize * PAGE_SIZE as usize;
        self.data.resize(new_len, 0);
        old
    }

    /// Allocate, resize or free a block.
    pub fn realloc(
        &mut self,
        old_ptr: u32,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> Result<u32, AbiError> {
        if !align.is_power_of_two() {
            return Err(AbiError::InvalidRealloc {
                ptr: old_ptr,
                reason: "alignment is not a power of two",
            });
        }

        if old_ptr != 0 {
            match self.live.get(&old_ptr) {
                Some(alloc) if alloc.size == old_size => {}
                Some(_) => {
                    return Err(AbiError::InvalidRealloc {
                        ptr: old_ptr,
                        reason: "size does not match the original allocation",
                    });
                }
                // Zero sized blocks are never tracked, freeing them is a no-op.
                None if old_size == 0 => {}
                None => {
                    return Err(AbiError::InvalidRealloc {
                        ptr: old_ptr,
                        reason: "not a live allocation",
                    });
                }
            }
        } else if old_size != 0 {
            return Err(AbiError::InvalidRealloc {
                ptr: old_ptr,
                reason: "null pointer with a non-zero size",
            });
        }

        let new_ptr = if new_size == 0 {
            0
        } else {
            self.bump(new_size, align)?
        };

        if old_ptr != 0 {
            if new_ptr != 0 {
                let keep = old_size.min(new_size) as usize;
                let bytes = self.read(old_ptr, keep as u32)?.to_vec();
                self.write(new_ptr, &bytes)?;
            }
            self.live.remove(&old_ptr);
        }

        if new_ptr == 0 && old_ptr == 0 {
            // Zero sized allocation: any aligned non-null address will do.
            return Ok(align);
        }
        Ok(new_ptr)
    }

    fn bump(&mut self, size: u32, align: u32) -> Result<u32, AbiError> {
        let start = align_to(self.next, align as usize);
        let end = start + size as usize;
        if end > self.data.len() {
            let missing = (end - self.data.len()) as u64;
            self.grow(missing.div_ceil(PAGE_SIZE) as u32);
        }
        let ptr = u32::try_from(start).map_err(|_| MemoryBoundsError {
            ptr: u32::MAX,
            len: u64::from(size),
            memory_size: self.size(),
        })?;
        self.next = end;
        self.live.insert(ptr, Allocation { size, align });
        Ok(ptr)
    }

    /// Shorthand for `realloc(0, 0, align, size)`.
    pub fn alloc(&mut self, size: u32, align: u32) -> Result<u32, AbiError> {
        self.realloc(0, 0, align, size)
    }

    /// Shorthand for `realloc(ptr, size, align, 0)`.
    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<(), AbiError> {
        self.realloc(ptr, size, align, 0).map(|_| ())
    }

    /// Number of allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn allocation(&self, ptr: u32) -> Option<Allocation> {
        self.live.get(&ptr).copied()
    }

    /// Live allocations in address order.
    pub fn allocations(&self) -> impl Iterator<Item = (u32, Allocation)> + '_ {
        self.live.iter().map(|(ptr, alloc)| (*ptr, *alloc))
    }

    /// Check that `[ptr, ptr + len)` lies inside the memory.
    pub fn check_bounds(&self, ptr: u32, len: u64) -> Result<(), MemoryBoundsError> {
        if u64::from(ptr) + len > self.size() {
            return Err(MemoryBoundsError {
                ptr,
                len,
                memory_size: self.size(),
            });
        }
        Ok(())
    }

    pub fn read(&self, ptr: u32, len: u32) -> Result<&[u8], AbiError> {
        self.check_bounds(ptr, u64::from(len))?;
        read_slice(&self.data, ptr as usize, len as usize)
    }

    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), AbiError> {
        self.check_bounds(ptr, bytes.len() as u64)?;
        write_slice(&mut self.data, ptr as usize, bytes)
    }

    fn load<const N: usize>(&self, ptr: u32) -> Result<[u8; N], AbiError> {
        self.check_bounds(ptr, N as u64)?;
        read_array(&self.data, ptr as usize)
    }

    pub fn load_u8(&self, ptr: u32) -> Result<u8, AbiError> {
        Ok(u8::from_le_bytes(self.load(ptr)?))
    }

    pub fn load_u16(&self, ptr: u32) -> Result<u16, AbiError> {
        Ok(u16::from_le_bytes(self.load(ptr)?))
    }

    pub fn load_u32(&self, ptr: u32) -> Result<u32, AbiError> {
        Ok(u32::from_le_bytes(self.load(ptr)?))
    }

    pub fn load_u64(&self, ptr: u32) -> Result<u64, AbiError> {
        Ok(u64::from_le_bytes(self.load(ptr)?))
    }

    pub fn store_u8(&mut self, ptr: u32, value: u8) -> Result<(), AbiError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn store_u16(&mut self, ptr: u32, value: u16) -> Result<(), AbiError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn store_u32(&mut self, ptr: u32, value: u32) -> Result<(), AbiError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn store_u64(&mut self, ptr: u32, value: u64) -> Result<(), AbiError> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// Get the raw bytes of the linear memory.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for LinearMemory {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
