//! Sliding mark-compaction.
//!
//! Objects are bump allocated in a single fixed arena. When it fills up, a
//! collection marks the reachable objects, slides them toward the arena
//! base in address order and moves the bump cursor to the end of the
//! compacted region. The arena never has holes, so it can be parsed block by
//! block from its start.

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace, WORD};

use super::{Collector, CollectorKind, pop_pair_operands};

// =============================================================================
// Header Layout (64 bits)
// =============================================================================
//
// +--------+--------------------------------------------------+
// | marked | forwarding address (byte offset, 0 = not yet)    |
// | bit 63 | bits 0-62                                        |
// +--------+--------------------------------------------------+

const HEADER: usize = 0;
const HEADER_MARKED_BIT: u64 = 1 << 63;
const HEADER_FORWARD_MASK: u64 = !HEADER_MARKED_BIT;

pub struct MarkCompact {
    space: ObjectSpace,
}

impl MarkCompact {
    pub fn new(config: &HeapConfig) -> Self {
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        let arena = Arena::fixed(config.arena_bytes);
        Self {
            space: ObjectSpace::new(arena, 1, config.stack_capacity, policy),
        }
    }

    /// Bytes between the arena base and the bump cursor.
    pub fn used_bytes(&self) -> usize {
        self.space.arena.cursor() - self.space.arena.start()
    }

    fn is_marked(&self, addr: Addr) -> bool {
        self.space.header(addr, HEADER) & HEADER_MARKED_BIT != 0
    }

    fn forwarding(&self, addr: Addr) -> Addr {
        (self.space.header(addr, HEADER) & HEADER_FORWARD_MASK) as Addr
    }

    fn reserve(&mut self, kind: ObjectKind) -> GcResult<usize> {
        let size = self.space.block_size(kind);
        if !self.space.arena.fits(size) {
            self.collect();
        }
        self.space
            .arena
            .bump(size)
            .ok_or_else(|| self.space.out_of_memory(kind))
    }

    /// Blocks in address order: `(block, object, size)`.
    fn blocks(&self) -> Vec<(usize, Addr, usize)> {
        let mut blocks = Vec::with_capacity(self.space.objcnt());
        let mut block = self.space.arena.start();
        while block < self.space.arena.cursor() {
            let addr = self.space.object_in(block);
            let size = self.space.block_size(self.space.kind(addr));
            blocks.push((block, addr, size));
            block += size;
        }
        blocks
    }

    fn mark(&mut self) {
        let mut worklist = Vec::new();
        for root in self.space.roots.as_slice().to_vec() {
            if root != NULL && !self.is_marked(root) {
                self.space.set_header(root, HEADER, HEADER_MARKED_BIT);
                worklist.push(root);
            }
        }
        while let Some(addr) = worklist.pop() {
            log::trace!("mark {:#x}", addr);
            for child in self.space.children(addr) {
                if child != NULL && !self.is_marked(child) {
                    self.space.set_header(child, HEADER, HEADER_MARKED_BIT);
                    worklist.push(child);
                }
            }
        }
    }

    /// Assign every marked object its destination. Returns the new cursor.
    fn compute_forwarding(&mut self, blocks: &[(usize, Addr, usize)]) -> usize {
        let mut free = self.space.arena.start();
        for &(_, addr, size) in blocks {
            if self.is_marked(addr) {
                let destination = self.space.object_in(free) as u64;
                self.space
                    .set_header(addr, HEADER, HEADER_MARKED_BIT | destination);
                free += size;
            }
        }
        free
    }

    fn update_references(&mut self, blocks: &[(usize, Addr, usize)]) {
        for i in 0..self.space.roots.len() {
            let root = self.space.roots.as_slice()[i];
            if root != NULL {
                self.space.roots.as_mut_slice()[i] = self.forwarding(root);
            }
        }

        for &(_, addr, _) in blocks {
            if !self.is_marked(addr) || !self.space.is_pair(addr) {
                continue;
            }
            let [head, tail] = self.space.children(addr);
            if head != NULL {
                let head = self.forwarding(head);
                self.space.set_head(addr, head);
            }
            if tail != NULL {
                let tail = self.forwarding(tail);
                self.space.set_tail(addr, tail);
            }
        }

        self.space.remap_handles(|arena, addr| {
            let header = arena.read_word(addr - WORD);
            (header & HEADER_MARKED_BIT != 0).then_some((header & HEADER_FORWARD_MASK) as Addr)
        });
    }

    /// Slide marked objects to their destinations, lowest address first.
    fn relocate(&mut self, blocks: &[(usize, Addr, usize)]) -> usize {
        let mut survivors = 0;
        for &(block, addr, size) in blocks {
            if !self.is_marked(addr) {
                continue;
            }
            let destination = self.forwarding(addr);
            let target = self.space.block_of(destination);
            if target != block {
                self.space.arena.copy_block(block, target, size);
            }
            self.space.set_header(destination, HEADER, 0);
            survivors += 1;
        }
        survivors
    }

    /// Thread the allocation list through the compacted region so the most
    /// recently allocated object comes first.
    fn rebuild_list(&mut self) {
        let mut start = NULL;
        let mut block = self.space.arena.start();
        while block < self.space.arena.cursor() {
            let addr = self.space.object_in(block);
            self.space.set_next(addr, start);
            start = addr;
            block += self.space.block_size(self.space.kind(addr));
        }
        self.space.set_start(start);
    }
}

impl Collector for MarkCompact {
    fn kind(&self) -> CollectorKind {
        CollectorKind::MarkCompact
    }

    fn space(&self) -> &ObjectSpace {
        &self.space
    }

    fn space_mut(&mut self) -> &mut ObjectSpace {
        &mut self.space
    }

    fn alloc_scalar(&mut self, value: i64) -> GcResult<Addr> {
        let block = self.reserve(ObjectKind::Scalar)?;
        let addr = self.space.init_scalar(block, value);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn alloc_pair(&mut self) -> GcResult<Addr> {
        let block = self.reserve(ObjectKind::Pair)?;
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn collect(&mut self) {
        let scope = self.space.begin_collection();

        self.mark();
        let blocks = self.blocks();
        let end = self.compute_forwarding(&blocks);
        self.update_references(&blocks);
        let survivors = self.relocate(&blocks);

        self.space.arena.set_cursor(end);
        self.rebuild_list();
        self.space.set_objcnt(survivors);

        self.space.finish_collection(self.kind().name(), scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(arena_bytes: usize) -> MarkCompact {
        let config = HeapConfig {
            arena_bytes,
            ..HeapConfig::for_collector(CollectorKind::MarkCompact)
        };
        MarkCompact::new(&config)
    }

    #[test]
    fn test_compaction_slides_survivors_down() {
        let mut gc = collector(4096);
        gc.alloc_scalar(1).unwrap();
        gc.pop_root().unwrap();
        gc.alloc_scalar(2).unwrap();
        gc.pop_root().unwrap();
        let c = gc.alloc_scalar(3).unwrap();
        let handle = gc.space().handle_of(c);

        gc.collect();
        let moved = gc.space().roots.as_slice()[0];
        assert_eq!(moved, gc.space().object_in(gc.space().arena.start()));
        assert_eq!(gc.space().scalar_value(moved), 3);
        assert_eq!(gc.space().resolve(handle), Ok(moved));
        assert_eq!(gc.used_bytes(), 4 * WORD);
    }

    #[test]
    fn test_compacted_arena_is_dense() {
        let mut gc = collector(4096);
        let mut expected = Vec::new();
        for i in 0..10 {
            gc.alloc_scalar(i).unwrap();
            if i % 2 == 0 {
                gc.pop_root().unwrap();
            } else {
                expected.push(i);
            }
        }

        gc.collect();
        assert_eq!(gc.space().objcnt(), 5);
        assert_eq!(gc.used_bytes(), 5 * 4 * WORD);
        let mut values: Vec<i64> = gc
            .space()
            .objects()
            .map(|addr| gc.space().scalar_value(addr))
            .collect();
        values.reverse();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_pair_fields_rewritten() {
        let mut gc = collector(4096);
        gc.alloc_scalar(0).unwrap();
        gc.pop_root().unwrap();
        let h = gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        let p = gc.alloc_pair().unwrap();
        gc.set_pair(p, None, Some(p));
        let head_handle = gc.space().handle_of(h);

        gc.collect();
        let p = gc.space().roots.as_slice()[0];
        let head = gc.space().head(p);
        assert_eq!(gc.space().tail(p), p);
        assert_eq!(gc.space().scalar_value(head), 1);
        assert_eq!(gc.space().resolve(head_handle), Ok(head));
        assert_eq!(gc.space().objcnt(), 2);
    }

    #[test]
    fn test_exhaustion_triggers_collection() {
        // Room for four scalars
        let mut gc = collector(16 * WORD);
        for i in 0..4 {
            gc.alloc_scalar(i).unwrap();
        }
        gc.pop_root().unwrap();
        gc.alloc_scalar(4).unwrap();
        assert_eq!(gc.space().stats.collections, 1);
        assert_eq!(gc.space().objcnt(), 4);

        let err = gc.alloc_scalar(5).unwrap_err();
        assert!(matches!(err, crate::GcError::OutOfMemory { .. }));
    }
}
