//! Semispace copying collectors.
//!
//! One fixed arena is split into two equal halves. Objects are bump
//! allocated in the active half; a collection flips the halves and copies
//! every reachable object into the new active half, leaving a forwarding
//! address in the header word of the old copy. The old half is abandoned
//! wholesale.

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace, WORD, arena};

use super::{Collector, CollectorKind, pop_pair_operands};

const FORWARDING: usize = 0;

/// Order in which reachable objects are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOrder {
    /// Depth-first, children forwarded by recursion
    Recursive,
    /// Breadth-first, a scan cursor walks the new half
    Cheney,
}

pub struct Semispace {
    space: ObjectSpace,
    order: CopyOrder,
    /// Bytes per half
    semispace_bytes: usize,
    /// Whether the lower half is the active one
    lower_active: bool,
    /// Head of the allocation list being rebuilt
    copied_start: Addr,
    copied: usize,
}

impl Semispace {
    pub fn new(config: &HeapConfig, order: CopyOrder) -> Self {
        let semispace_bytes = arena::align_up(config.arena_bytes);
        let mut heap = Arena::fixed(2 * semispace_bytes);
        heap.reset_region(WORD, WORD + semispace_bytes);
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        Self {
            space: ObjectSpace::new(heap, 1, config.stack_capacity, policy),
            order,
            semispace_bytes,
            lower_active: true,
            copied_start: NULL,
            copied: 0,
        }
    }

    /// Start of the active half.
    pub fn tospace(&self) -> usize {
        if self.lower_active {
            WORD
        } else {
            WORD + self.semispace_bytes
        }
    }

    /// Bytes in use in the active half.
    pub fn used_bytes(&self) -> usize {
        self.space.arena.cursor() - self.space.arena.start()
    }

    /// Allocate a block, collecting once if the active half is full.
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

    fn flip(&mut self) {
        self.lower_active = !self.lower_active;
        let start = self.tospace();
        self.space
            .arena
            .reset_region(start, start + self.semispace_bytes);
        log::debug!(
            "{}: flipped to half at {:#x} ({} bytes)",
            self.kind(),
            start,
            self.semispace_bytes
        );
    }

    fn forwarding(&self, addr: Addr) -> Addr {
        self.space.header(addr, FORWARDING) as Addr
    }

    /// Copy `addr` into the active half unless it was already copied, and
    /// return its new address.
    fn forward(&mut self, addr: Addr) -> Addr {
        if addr == NULL {
            return NULL;
        }
        let forwarded = self.forwarding(addr);
        if forwarded != NULL {
            return forwarded;
        }

        let size = self.space.block_size(self.space.kind(addr));
        let Some(block) = self.space.arena.bump(size) else {
            unreachable!("survivors cannot exceed a semispace");
        };
        let source = self.space.block_of(addr);
        self.space.arena.copy_block(source, block, size);
        let copy = self.space.object_in(block);
        self.space.set_header(copy, FORWARDING, 0);
        self.space.set_header(addr, FORWARDING, copy as u64);

        self.space.set_next(copy, self.copied_start);
        self.copied_start = copy;
        self.copied += 1;
        copy
    }

    /// Forward a copied object's children depth-first.
    fn copy_children_recursive(&mut self, copy: Addr) {
        if !self.space.is_pair(copy) {
            return;
        }
        let head = self.space.head(copy);
        if head != NULL {
            let (new_head, fresh) = self.forward_fresh(head);
            self.space.set_head(copy, new_head);
            if fresh {
                self.copy_children_recursive(new_head);
            }
        }
        let tail = self.space.tail(copy);
        if tail != NULL {
            let (new_tail, fresh) = self.forward_fresh(tail);
            self.space.set_tail(copy, new_tail);
            if fresh {
                self.copy_children_recursive(new_tail);
            }
        }
    }

    /// Forward and report whether this call made the copy.
    fn forward_fresh(&mut self, addr: Addr) -> (Addr, bool) {
        let fresh = self.forwarding(addr) == NULL;
        (self.forward(addr), fresh)
    }

    /// Forward the fields of every copied object, scanning the active half.
    fn scan_cheney(&mut self, mut scan: usize) {
        while scan < self.space.arena.cursor() {
            let copy = self.space.object_in(scan);
            let kind = self.space.kind(copy);
            if kind == ObjectKind::Pair {
                let [head, tail] = self.space.children(copy);
                let head = self.forward(head);
                self.space.set_head(copy, head);
                let tail = self.forward(tail);
                self.space.set_tail(copy, tail);
            }
            scan += self.space.block_size(kind);
        }
    }
}

impl Collector for Semispace {
    fn kind(&self) -> CollectorKind {
        match self.order {
            CopyOrder::Recursive => CollectorKind::SemispaceCopy,
            CopyOrder::Cheney => CollectorKind::CheneyCopy,
        }
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
        // Reserve first: a collection moves the operands still on the stack.
        let block = self.reserve(ObjectKind::Pair)?;
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn collect(&mut self) {
        let scope = self.space.begin_collection();
        self.flip();
        self.copied_start = NULL;
        self.copied = 0;
        let scan = self.space.arena.start();

        for i in 0..self.space.roots.len() {
            let root = self.space.roots.as_slice()[i];
            let copy = match self.order {
                CopyOrder::Recursive => {
                    let (copy, fresh) = if root == NULL {
                        (NULL, false)
                    } else {
                        self.forward_fresh(root)
                    };
                    if fresh {
                        self.copy_children_recursive(copy);
                    }
                    copy
                }
                CopyOrder::Cheney => self.forward(root),
            };
            self.space.roots.as_mut_slice()[i] = copy;
        }
        if self.order == CopyOrder::Cheney {
            self.scan_cheney(scan);
        }

        self.space.remap_handles(|arena, addr| {
            let forwarded = arena.read_word(addr - WORD) as Addr;
            (forwarded != NULL).then_some(forwarded)
        });
        self.space.set_start(self.copied_start);
        self.space.set_objcnt(self.copied);
        self.space.finish_collection(self.kind().name(), scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: [CopyOrder; 2] = [CopyOrder::Recursive, CopyOrder::Cheney];

    fn collector(order: CopyOrder, arena_bytes: usize) -> Semispace {
        let config = HeapConfig {
            arena_bytes,
            ..HeapConfig::default()
        };
        Semispace::new(&config, order)
    }

    #[test]
    fn test_collect_moves_to_other_half() {
        for order in ORDERS {
            let mut gc = collector(order, 1024);
            let a = gc.alloc_scalar(7).unwrap();
            let handle = gc.space().handle_of(a);
            assert_eq!(gc.tospace(), WORD);

            gc.collect();
            assert_eq!(gc.tospace(), WORD + 1024);
            let moved = gc.space().roots.as_slice()[0];
            assert_ne!(moved, a);
            assert!(moved >= WORD + 1024);
            assert_eq!(gc.space().scalar_value(moved), 7);
            assert_eq!(gc.space().resolve(handle), Ok(moved));
        }
    }

    #[test]
    fn test_shared_object_copied_once() {
        for order in ORDERS {
            let mut gc = collector(order, 1024);
            let shared = gc.alloc_scalar(1).unwrap();
            gc.alloc_scalar(2).unwrap();
            let q = gc.alloc_pair().unwrap();
            gc.set_pair(q, None, Some(shared));

            gc.collect();
            let q = gc.space().roots.as_slice()[0];
            assert_eq!(gc.space().head(q), gc.space().tail(q), "{:?}", order);
            assert_eq!(gc.space().objcnt(), 2);
        }
    }

    #[test]
    fn test_garbage_not_copied() {
        for order in ORDERS {
            let mut gc = collector(order, 1024);
            gc.alloc_scalar(1).unwrap();
            let garbage = gc.alloc_scalar(2).unwrap();
            let handle = gc.space().handle_of(garbage);
            gc.pop_root().unwrap();

            gc.collect();
            assert_eq!(gc.space().objcnt(), 1);
            assert_eq!(gc.used_bytes(), 4 * WORD);
            assert!(gc.space().resolve(handle).is_err());
        }
    }

    #[test]
    fn test_exhaustion_triggers_collection() {
        for order in ORDERS {
            // Room for four scalars per half
            let mut gc = collector(order, 4 * 4 * WORD);
            for i in 0..4 {
                gc.alloc_scalar(i).unwrap();
                gc.pop_root().unwrap();
            }
            assert_eq!(gc.space().stats.collections, 0);
            gc.alloc_scalar(4).unwrap();
            assert_eq!(gc.space().stats.collections, 1);
            assert_eq!(gc.space().stats.last_reclaimed, 4);
            assert_eq!(gc.space().objcnt(), 1);
        }
    }

    #[test]
    fn test_out_of_memory_when_live_data_fills_half() {
        for order in ORDERS {
            let mut gc = collector(order, 4 * 4 * WORD);
            for i in 0..4 {
                gc.alloc_scalar(i).unwrap();
            }
            let err = gc.alloc_scalar(4).unwrap_err();
            assert!(matches!(err, crate::GcError::OutOfMemory { .. }));
            assert_eq!(gc.space().objcnt(), 4);
        }
    }

    #[test]
    fn test_pair_operands_survive_triggered_collection() {
        for order in ORDERS {
            // Two scalars and one pair fit exactly: 4 + 4 + 5 words
            let mut gc = collector(order, 13 * WORD);
            gc.alloc_scalar(10).unwrap();
            gc.alloc_scalar(20).unwrap();
            gc.alloc_scalar(99).unwrap();
            gc.pop_root().unwrap();
            let p = gc.alloc_pair().unwrap();
            assert_eq!(gc.space().stats.collections, 1);
            assert_eq!(gc.space().scalar_value(gc.space().head(p)), 10);
            assert_eq!(gc.space().scalar_value(gc.space().tail(p)), 20);
        }
    }
}
