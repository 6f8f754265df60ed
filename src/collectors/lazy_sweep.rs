//! Mark with lazy sweeping.
//!
//! Allocation takes a block from the free list or the bump cursor of a fixed
//! arena. When both fail, the collector continues a pending sweep, or marks
//! from the roots and starts a new one. The sweep walks the allocation list,
//! returning each unmarked object to the arena, and stops as soon as the
//! pending request fits. The remainder is swept by later allocations.
//!
//! Marks are epoch numbers: an object is marked when its header word equals
//! the current epoch, so starting a new mark phase needs no clearing pass.
//! Objects allocated while a sweep is pending get the current epoch and are
//! kept by it.

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace};

use super::{Collector, CollectorKind, pop_pair_operands};

const MARK: usize = 0;

pub struct LazySweep {
    space: ObjectSpace,
    /// Mark epoch of the last mark phase (never 0)
    epoch: u64,
    /// Next object to sweep, `NULL` when no sweep is pending
    sweep_cursor: Addr,
    /// Last survivor passed by the sweep
    sweep_prev: Addr,
    sweeping: bool,
    /// Objects marked by the last mark phase
    marked: usize,
    /// Objects reclaimed by sweep steps not yet recorded in the stats
    swept: usize,
}

impl LazySweep {
    pub fn new(config: &HeapConfig) -> Self {
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        let arena = Arena::fixed(config.arena_bytes);
        Self {
            space: ObjectSpace::new(arena, 1, config.stack_capacity, policy),
            epoch: 1,
            sweep_cursor: NULL,
            sweep_prev: NULL,
            sweeping: false,
            marked: 0,
            swept: 0,
        }
    }

    /// Whether part of the last sweep is still outstanding.
    pub fn sweep_pending(&self) -> bool {
        self.sweeping
    }

    fn is_marked(&self, addr: Addr) -> bool {
        self.space.header(addr, MARK) == self.epoch
    }

    /// Find a block for `kind`, sweeping and marking as needed.
    fn reserve(&mut self, kind: ObjectKind) -> GcResult<usize> {
        let size = self.space.block_size(kind);
        if let Some(block) = self.space.arena.allocate(size) {
            return Ok(block);
        }
        if self.sweeping {
            let block = self.sweep(Some(size));
            self.record_deferred_sweep();
            if let Some(block) = block {
                return Ok(block);
            }
        }

        let scope = self.space.begin_collection();
        self.mark();
        let block = self.sweep(Some(size));
        self.swept = 0;
        self.space
            .finish_collection_with(self.kind().name(), scope, self.marked);
        block.ok_or_else(|| self.space.out_of_memory(kind))
    }

    /// Add objects reclaimed by sweep steps outside a collection to the stats.
    fn record_deferred_sweep(&mut self) {
        let swept = std::mem::take(&mut self.swept);
        self.space.stats.record_deferred(swept);
    }

    fn mark(&mut self) {
        debug_assert!(!self.sweeping, "mark started with a sweep pending");
        self.epoch = match self.epoch.wrapping_add(1) {
            0 => 1,
            epoch => epoch,
        };

        let mut worklist = Vec::new();
        self.marked = 0;
        for root in self.space.roots.as_slice().to_vec() {
            if root != NULL && !self.is_marked(root) {
                self.space.set_header(root, MARK, self.epoch);
                self.marked += 1;
                worklist.push(root);
            }
        }
        while let Some(addr) = worklist.pop() {
            log::trace!("mark {:#x}", addr);
            for child in self.space.children(addr) {
                if child != NULL && !self.is_marked(child) {
                    self.space.set_header(child, MARK, self.epoch);
                    self.marked += 1;
                    worklist.push(child);
                }
            }
        }

        self.sweep_cursor = self.space.start();
        self.sweep_prev = NULL;
        self.sweeping = true;
    }

    /// Sweep until a block of `request` bytes can be allocated, or to the end
    /// of the list when `request` is `None`.
    fn sweep(&mut self, request: Option<usize>) -> Option<usize> {
        while self.sweep_cursor != NULL {
            let addr = self.sweep_cursor;
            let next = self.space.next(addr);
            self.sweep_cursor = next;

            if self.is_marked(addr) {
                self.sweep_prev = addr;
                continue;
            }

            if self.sweep_prev == NULL {
                // Objects allocated since the mark sit in front of the sweep.
                self.space.unlink(addr);
            } else {
                self.space.set_next(self.sweep_prev, next);
            }
            self.space.reclaim(addr);
            self.swept += 1;

            if let Some(size) = request {
                if let Some(block) = self.space.arena.allocate(size) {
                    return Some(block);
                }
            }
        }

        self.sweeping = false;
        self.sweep_prev = NULL;
        None
    }

    fn init_header(&mut self, addr: Addr) {
        self.space.set_header(addr, MARK, self.epoch);
    }
}

impl Collector for LazySweep {
    fn kind(&self) -> CollectorKind {
        CollectorKind::LazySweep
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
        self.init_header(addr);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn alloc_pair(&mut self) -> GcResult<Addr> {
        let block = self.reserve(ObjectKind::Pair)?;
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.init_header(addr);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn collect(&mut self) {
        if self.sweeping {
            self.sweep(None);
            self.record_deferred_sweep();
        }
        let scope = self.space.begin_collection();
        self.mark();
        self.sweep(None);
        self.swept = 0;
        self.space.finish_collection(self.kind().name(), scope);
    }

    fn condemned(&self, addr: Addr) -> bool {
        self.sweeping && !self.is_marked(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::WORD;

    const SCALAR_BLOCK: usize = 4 * WORD;

    fn collector(arena_bytes: usize) -> LazySweep {
        let config = HeapConfig {
            arena_bytes,
            ..HeapConfig::for_collector(CollectorKind::LazySweep)
        };
        LazySweep::new(&config)
    }

    #[test]
    fn test_collect_sweeps_everything() {
        let mut gc = collector(4096);
        for i in 0..6 {
            gc.alloc_scalar(i).unwrap();
        }
        gc.pop_root().unwrap();
        gc.pop_root().unwrap();

        gc.collect();
        assert!(!gc.sweep_pending());
        assert_eq!(gc.space().objcnt(), 4);
        assert_eq!(gc.space().stats.last_reclaimed, 2);
    }

    #[test]
    fn test_freed_block_reused() {
        let mut gc = collector(4096);
        gc.alloc_scalar(1).unwrap();
        let garbage = gc.alloc_scalar(2).unwrap();
        gc.pop_root().unwrap();
        gc.alloc_scalar(3).unwrap();

        gc.collect();
        assert_eq!(gc.space().arena.free_block_count(), 1);
        let reused = gc.alloc_scalar(4).unwrap();
        assert_eq!(reused, garbage);
        assert_eq!(gc.space().arena.free_block_count(), 0);
    }

    #[test]
    fn test_sweep_coalesces_with_cursor() {
        let mut gc = collector(4096);
        gc.alloc_scalar(1).unwrap();
        let cursor_before = gc.space().arena.cursor();
        gc.alloc_scalar(2).unwrap();
        gc.alloc_scalar(3).unwrap();
        gc.pop_root().unwrap();
        gc.pop_root().unwrap();

        gc.collect();
        assert_eq!(gc.space().arena.cursor(), cursor_before);
        assert_eq!(gc.space().arena.free_block_count(), 0);
    }

    #[test]
    fn test_sweep_stops_once_request_fits() {
        // Room for four scalars
        let mut gc = collector(4 * SCALAR_BLOCK);
        for i in 0..4 {
            gc.alloc_scalar(i).unwrap();
            gc.pop_root().unwrap();
        }

        gc.alloc_scalar(4).unwrap();
        assert_eq!(gc.space().stats.collections, 1);
        assert!(gc.sweep_pending());
        // The sweep reclaimed one object (the most recent) and stopped.
        assert_eq!(gc.space().objcnt(), 4);

        gc.alloc_scalar(5).unwrap();
        assert_eq!(gc.space().stats.collections, 1);
        assert_eq!(gc.space().objcnt(), 4);
    }

    #[test]
    fn test_deferred_sweep_counted_in_stats() {
        let mut gc = collector(4 * SCALAR_BLOCK);
        for i in 0..4 {
            gc.alloc_scalar(i).unwrap();
            gc.pop_root().unwrap();
        }
        gc.alloc_scalar(4).unwrap();
        assert_eq!(gc.space().stats.last_reclaimed, 1);
        assert_eq!(gc.space().stats.last_survivors, 0);

        gc.alloc_scalar(5).unwrap();
        assert_eq!(gc.space().stats.objects_reclaimed, 2);
        assert_eq!(gc.space().stats.last_reclaimed, 2);

        // The two objects left unswept are counted before the new collection
        gc.collect();
        assert_eq!(gc.space().stats.collections, 2);
        assert_eq!(gc.space().stats.objects_reclaimed, 4);
        assert_eq!(gc.space().stats.last_reclaimed, 0);
        assert_eq!(gc.space().objcnt(), 2);
    }

    #[test]
    fn test_mixed_churn_reuses_split_blocks() {
        // Scalars reuse blocks freed by pairs, leaving one-word holes
        let mut gc = collector(8 * SCALAR_BLOCK);
        let root = gc.alloc_scalar(-1).unwrap();
        let cursor_after_root = gc.space().arena.cursor();
        for i in 0..300 {
            if i % 2 == 0 {
                gc.alloc_scalar(i).unwrap();
                gc.alloc_scalar(-i).unwrap();
                gc.alloc_pair().unwrap();
            } else {
                gc.alloc_scalar(i).unwrap();
            }
            gc.pop_root().unwrap();
        }
        assert!(gc.space().stats.collections > 1);

        gc.collect();
        assert_eq!(gc.space().objcnt(), 1);
        assert_eq!(gc.space().scalar_value(root), -1);
        assert_eq!(gc.space().arena.cursor(), cursor_after_root);
        assert_eq!(gc.space().arena.free_bytes(), 0);
    }

    #[test]
    fn test_unswept_garbage_is_condemned() {
        let mut gc = collector(4 * SCALAR_BLOCK);
        let mut garbage = Vec::new();
        for i in 0..4 {
            garbage.push(gc.alloc_scalar(i).unwrap());
            gc.pop_root().unwrap();
        }
        let fresh = gc.alloc_scalar(4).unwrap();
        assert!(gc.sweep_pending());
        assert!(!gc.condemned(fresh));
        assert!(gc.condemned(garbage[0]));

        gc.collect();
        assert!(!gc.sweep_pending());
        assert!(!gc.condemned(fresh));
        assert_eq!(gc.space().objcnt(), 1);
    }

    #[test]
    fn test_out_of_memory_when_everything_is_live() {
        let mut gc = collector(4 * SCALAR_BLOCK);
        for i in 0..4 {
            gc.alloc_scalar(i).unwrap();
        }
        let err = gc.alloc_scalar(4).unwrap_err();
        assert!(matches!(err, crate::GcError::OutOfMemory { .. }));
        assert!(!gc.sweep_pending());
    }

    #[test]
    fn test_pair_from_swept_blocks() {
        // A pair needs five words, so one reclaimed scalar block is not enough
        let mut gc = collector(4 * SCALAR_BLOCK);
        gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        gc.alloc_scalar(3).unwrap();
        gc.pop_root().unwrap();
        gc.alloc_scalar(4).unwrap();
        gc.pop_root().unwrap();
        // Roots: [1, 2]; arena full
        let p = gc.alloc_pair().unwrap();
        assert_eq!(gc.space().scalar_value(gc.space().head(p)), 1);
        assert_eq!(gc.space().scalar_value(gc.space().tail(p)), 2);
        assert_eq!(gc.space().objcnt(), 3);
    }
}
