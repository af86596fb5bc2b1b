//! Per-instance resource handle table.
//!
//! Handles are small non-zero integers indexing into a slot vector. Dropped
//! slots are remembered on a free list and handed out again by later
//! [`ResourceTable::new_handle`] calls. Borrows are scoped to call frames:
//! [`ResourceTable::enter_call`] opens a frame, [`ResourceTable::borrow`]
//! records a borrow in the innermost frame, and [`ResourceTable::exit_call`]
//! releases every borrow the frame recorded.

use std::fmt;

use crate::error::ResourceError;

/// Identifies the component instance that owns a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Own,
    Borrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Live,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub owner: InstanceId,
    /// Guest representation, usually a pointer into linear memory.
    pub rep: u32,
    pub ownership: Ownership,
    pub state: HandleState,
    pub borrows: u32,
}

impl ResourceEntry {
    pub fn is_live(&self) -> bool {
        self.state == HandleState::Live
    }
}

#[derive(Debug, Default)]
pub struct ResourceTable {
    // Slot `i` holds handle `i + 1`.
    slots: Vec<ResourceEntry>,
    free: Vec<u32>,
    frames: Vec<Vec<u32>>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle for `rep`, reusing a retired slot when one exists.
    pub fn new_handle(&mut self, owner: InstanceId, ownership: Ownership, rep: u32) -> u32 {
        let entry = ResourceEntry {
            owner,
            rep,
            ownership,
            state: HandleState::Live,
            borrows: 0,
        };
        if let Some(handle) = self.free.pop()
            && let Some(slot) = self.slot_mut(handle)
        {
            *slot = entry;
            return handle;
        }
        self.slots.push(entry);
        self.slots.len() as u32
    }

    pub fn get(&self, handle: u32) -> Result<&ResourceEntry, ResourceError> {
        let entry = self.slot(handle).ok_or(ResourceError::UnknownHandle(handle))?;
        if !entry.is_live() {
            return Err(ResourceError::UseAfterDrop(handle));
        }
        Ok(entry)
    }

    /// Representation behind a live handle.
    pub fn rep(&self, handle: u32) -> Result<u32, ResourceError> {
        self.get(handle).map(|e| e.rep)
    }

    /// Borrow `handle` for the rest of the innermost call frame.
    pub fn borrow(&mut self, handle: u32) -> Result<u32, ResourceError> {
        self.get(handle)?;
        let frame = self
            .frames
            .last_mut()
            .ok_or(ResourceError::NoActiveFrame(handle))?;
        frame.push(handle);
        let entry = self.live_mut(handle)?;
        entry.borrows += 1;
        Ok(entry.rep)
    }

    pub fn enter_call(&mut self) {
        self.frames.push(Vec::new());
    }

    /// Close the innermost frame, releasing the borrows it recorded.
    pub fn exit_call(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        for handle in frame {
            if let Some(entry) = self.slot_mut(handle)
                && entry.is_live()
            {
                entry.borrows = entry.borrows.saturating_sub(1);
            }
        }
    }

    /// Depth of nested call frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Drop a handle, returning its entry so the caller can run a destructor.
    pub fn drop_handle(&mut self, handle: u32) -> Result<ResourceEntry, ResourceError> {
        let entry = self.live_mut(handle)?;
        if entry.borrows > 0 {
            return Err(ResourceError::Borrowed {
                handle,
                borrows: entry.borrows,
            });
        }
        entry.state = HandleState::Dropped;
        let dropped = entry.clone();
        self.free.push(handle);
        Ok(dropped)
    }

    /// Move ownership out of the table, as when an `own` handle is lifted.
    pub fn take(&mut self, handle: u32) -> Result<u32, ResourceError> {
        let entry = self.get(handle)?;
        if entry.ownership != Ownership::Own {
            return Err(ResourceError::NotOwned {
                handle,
                action: "transferred",
            });
        }
        self.drop_handle(handle).map(|e| e.rep)
    }

    /// Number of handles not yet dropped.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|e| e.is_live()).count()
    }

    /// Force-drop every live handle and report the owned ones that leaked.
    pub fn teardown(&mut self) -> Vec<(u32, ResourceEntry)> {
        self.frames.clear();
        let mut leaked = Vec::new();
        for (i, entry) in self.slots.iter_mut().enumerate() {
            if !entry.is_live() {
                continue;
            }
            entry.state = HandleState::Dropped;
            entry.borrows = 0;
            let handle = i as u32 + 1;
            self.free.push(handle);
            if entry.ownership == Ownership::Own {
                leaked.push((handle, entry.clone()));
            }
        }
        leaked
    }

    fn slot(&self, handle: u32) -> Option<&ResourceEntry> {
        let index = (handle as usize).checked_sub(1)?;
        self.slots.get(index)
    }

    fn slot_mut(&mut self, handle: u32) -> Option<&mut ResourceEntry> {
        let index = (handle as usize).checked_sub(1)?;
        self.slots.get_mut(index)
    }

    fn live_mut(&mut self, handle: u32) -> Result<&mut ResourceEntry, ResourceError> {
        let entry = self
            .slot_mut(handle)
            .ok_or(ResourceError::UnknownHandle(handle))?;
        if !entry.is_live() {
            return Err(ResourceError::UseAfterDrop(handle));
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTANCE: InstanceId = InstanceId(0);

    #[test]
    fn handles_start_at_one() {
        let mut table = ResourceTable::new();
        assert_eq!(table.new_handle(INSTANCE, Ownership::Own, 100), 1);
        assert_eq!(table.new_handle(INSTANCE, Ownership::Own, 200), 2);
        assert_eq!(table.get(0), Err(ResourceError::UnknownHandle(0)));
    }

    #[test]
    fn dropped_slots_are_reused() -> Result<(), ResourceError> {
        let mut table = ResourceTable::new();
        let a = table.new_handle(INSTANCE, Ownership::Own, 1);
        let _b = table.new_handle(INSTANCE, Ownership::Own, 2);
        table.drop_handle(a)?;
        let c = table.new_handle(INSTANCE, Ownership::Own, 3);
        assert_eq!(c, a);
        assert_eq!(table.rep(c)?, 3);
        Ok(())
    }

    #[test]
    fn double_drop_is_use_after_drop() -> Result<(), ResourceError> {
        let mut table = ResourceTable::new();
        let h = table.new_handle(INSTANCE, Ownership::Own, 7);
        table.drop_handle(h)?;
        assert_eq!(table.drop_handle(h), Err(ResourceError::UseAfterDrop(h)));
        assert_eq!(table.rep(h), Err(ResourceError::UseAfterDrop(h)));
        Ok(())
    }

    #[test]
    fn borrows_block_drop_until_frame_exits() -> Result<(), ResourceError> {
        let mut table = ResourceTable::new();
        let h = table.new_handle(INSTANCE, Ownership::Own, 7);
        assert_eq!(table.borrow(h), Err(ResourceError::NoActiveFrame(h)));

        table.enter_call();
        assert_eq!(table.borrow(h)?, 7);
        assert_eq!(
            table.drop_handle(h),
            Err(ResourceError::Borrowed { handle: h, borrows: 1 })
        );
        table.exit_call();

        table.drop_handle(h)?;
        assert_eq!(table.live_count(), 0);
        Ok(())
    }

    #[test]
    fn borrowed_handles_cannot_be_transferred() {
        let mut table = ResourceTable::new();
        let h = table.new_handle(INSTANCE, Ownership::Borrow, 7);
        assert_eq!(
            table.take(h),
            Err(ResourceError::NotOwned { handle: h, action: "transferred" })
        );
    }

    #[test]
    fn teardown_reports_owned_handles() {
        let mut table = ResourceTable::new();
        let owned = table.new_handle(INSTANCE, Ownership::Own, 1);
        let _lent = table.new_handle(INSTANCE, Ownership::Borrow, 2);
        table.enter_call();
        let leaked = table.teardown();
        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked.first().map(|(h, _)| *h), Some(owned));
        assert_eq!(table.live_count(), 0);
        assert_eq!(table.frame_depth(), 0);
    }
}
