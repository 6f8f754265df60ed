//! Handle table mapping mutator [`Ref`]s to object addresses.

use super::object::{Addr, NULL, Ref};

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    addr: Addr,
    generation: u32,
}

/// Slot table of object addresses.
///
/// A released slot keeps its entry with a bumped generation and is reused
/// by the next insertion.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: Vec<HandleEntry>,
    free_slots: Vec<u32>,
    live: usize,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr` and return a fresh reference to it.
    pub fn insert(&mut self, addr: Addr) -> Ref {
        debug_assert_ne!(addr, NULL);
        self.live += 1;
        if let Some(slot) = self.free_slots.pop() {
            let entry = &mut self.entries[slot as usize];
            entry.addr = addr;
            return Ref {
                slot,
                generation: entry.generation,
            };
        }

        let slot = self.entries.len() as u32;
        self.entries.push(HandleEntry {
            addr,
            generation: 0,
        });
        Ref {
            slot,
            generation: 0,
        }
    }

    /// Current address of `r`, or `None` if its object was reclaimed.
    pub fn resolve(&self, r: Ref) -> Option<Addr> {
        let entry = self.entries.get(r.slot as usize)?;
        (entry.generation == r.generation && entry.addr != NULL).then_some(entry.addr)
    }

    /// Address currently registered in `slot` (`NULL` if released).
    pub fn addr_of_slot(&self, slot: u32) -> Addr {
        self.entries
            .get(slot as usize)
            .map_or(NULL, |entry| entry.addr)
    }

    /// Current reference for a registered slot.
    pub fn ref_for_slot(&self, slot: u32) -> Ref {
        let generation = self
            .entries
            .get(slot as usize)
            .map_or(0, |entry| entry.generation);
        Ref { slot, generation }
    }

    /// Release `slot`; outstanding references to it become stale.
    pub fn release(&mut self, slot: u32) {
        let entry = &mut self.entries[slot as usize];
        debug_assert_ne!(entry.addr, NULL, "handle slot released twice");
        entry.addr = NULL;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_slots.push(slot);
        self.live -= 1;
    }

    /// Rewrite every registered address through `forward`. Entries for which
    /// `forward` returns `None` are released.
    pub fn remap(&mut self, mut forward: impl FnMut(Addr) -> Option<Addr>) {
        for slot in 0..self.entries.len() {
            let addr = self.entries[slot].addr;
            if addr == NULL {
                continue;
            }
            match forward(addr) {
                Some(new_addr) => self.entries[slot].addr = new_addr,
                None => self.release(slot as u32),
            }
        }
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_resolve() {
        let mut table = HandleTable::new();
        let a = table.insert(16);
        let b = table.insert(48);
        assert_eq!(table.resolve(a), Some(16));
        assert_eq!(table.resolve(b), Some(48));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_release_makes_ref_stale() {
        let mut table = HandleTable::new();
        let a = table.insert(16);
        table.release(a.slot());
        assert_eq!(table.resolve(a), None);

        // Slot is reused with a new generation
        let b = table.insert(80);
        assert_eq!(b.slot(), a.slot());
        assert_ne!(b.generation(), a.generation());
        assert_eq!(table.resolve(a), None);
        assert_eq!(table.resolve(b), Some(80));
    }

    #[test]
    fn test_remap() {
        let mut table = HandleTable::new();
        let a = table.insert(16);
        let b = table.insert(48);
        table.remap(|addr| (addr == 16).then_some(1024));
        assert_eq!(table.resolve(a), Some(1024));
        assert_eq!(table.resolve(b), None);
        assert_eq!(table.len(), 1);
    }
}
