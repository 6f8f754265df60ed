//! Mark-sweep collectors.
//!
//! Three marking strategies share one sweep over the allocation list:
//! - `Recursive`: trace by native recursion, mark bit in a header word
//! - `Worklist`: explicit LIFO worklist, mark bit in a header word
//! - `Bitmap`: no header words, one mark bit per arena word in a side bitmap

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace, WORD};

use super::{Collector, CollectorKind, pop_pair_operands};

const MARK: usize = 0;
const MARKED: u64 = 1;

/// How the mark phase traverses the object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStrategy {
    Recursive,
    Worklist,
    Bitmap,
}

impl MarkStrategy {
    fn header_words(self) -> usize {
        match self {
            MarkStrategy::Recursive | MarkStrategy::Worklist => 1,
            MarkStrategy::Bitmap => 0,
        }
    }
}

// =============================================================================
// MarkBitmap
// =============================================================================

/// Side mark bitmap with one bit per arena word.
///
/// The bitmap is grown to cover the whole arena before each mark phase, so
/// the index `addr / WORD mod len` never aliases two objects.
#[derive(Debug, Default)]
pub struct MarkBitmap {
    bits: Vec<u64>,
}

impl MarkBitmap {
    /// Make room for an arena of `arena_bytes` bytes.
    pub fn cover(&mut self, arena_bytes: usize) {
        let words = arena_bytes.div_ceil(WORD);
        let needed = words.div_ceil(64);
        if needed > self.bits.len() {
            self.bits.resize(needed, 0);
        }
    }

    /// Number of addressable bits.
    pub fn len(&self) -> usize {
        self.bits.len() * 64
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    fn index(&self, addr: Addr) -> (usize, u64) {
        let bit = (addr / WORD) % self.len();
        (bit / 64, 1 << (bit % 64))
    }

    pub fn is_set(&self, addr: Addr) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        let (word, mask) = self.index(addr);
        self.bits[word] & mask != 0
    }

    pub fn set(&mut self, addr: Addr) {
        let (word, mask) = self.index(addr);
        self.bits[word] |= mask;
    }

    pub fn clear(&mut self, addr: Addr) {
        if self.bits.is_empty() {
            return;
        }
        let (word, mask) = self.index(addr);
        self.bits[word] &= !mask;
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }
}

// =============================================================================
// MarkSweep
// =============================================================================

pub struct MarkSweep {
    space: ObjectSpace,
    strategy: MarkStrategy,
    bitmap: MarkBitmap,
}

impl MarkSweep {
    pub fn new(config: &HeapConfig, strategy: MarkStrategy) -> Self {
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        Self {
            space: ObjectSpace::new(
                Arena::growable(),
                strategy.header_words(),
                config.stack_capacity,
                policy,
            ),
            strategy,
            bitmap: MarkBitmap::default(),
        }
    }

    pub fn strategy(&self) -> MarkStrategy {
        self.strategy
    }

    pub fn bitmap(&self) -> &MarkBitmap {
        &self.bitmap
    }

    fn maybe_collect(&mut self) {
        if self.space.policy.should_collect(self.space.objcnt()) {
            self.collect();
        }
    }

    fn is_marked(&self, addr: Addr) -> bool {
        match self.strategy {
            MarkStrategy::Bitmap => self.bitmap.is_set(addr),
            _ => self.space.header(addr, MARK) == MARKED,
        }
    }

    fn set_marked(&mut self, addr: Addr) {
        log::trace!("mark {:#x}", addr);
        match self.strategy {
            MarkStrategy::Bitmap => self.bitmap.set(addr),
            _ => self.space.set_header(addr, MARK, MARKED),
        }
    }

    fn clear_mark(&mut self, addr: Addr) {
        match self.strategy {
            MarkStrategy::Bitmap => self.bitmap.clear(addr),
            _ => self.space.set_header(addr, MARK, 0),
        }
    }

    fn mark_roots(&mut self) {
        if self.strategy == MarkStrategy::Bitmap {
            self.bitmap.cover(self.space.arena.len());
        }

        let roots = self.space.roots.as_slice().to_vec();
        match self.strategy {
            MarkStrategy::Recursive => {
                for root in roots {
                    self.mark_recursive(root);
                }
            }
            MarkStrategy::Worklist | MarkStrategy::Bitmap => self.mark_worklist(roots),
        }
    }

    fn mark_recursive(&mut self, addr: Addr) {
        if addr == NULL || self.is_marked(addr) {
            return;
        }
        self.set_marked(addr);
        let [head, tail] = self.space.children(addr);
        self.mark_recursive(head);
        self.mark_recursive(tail);
    }

    /// Children are marked when pushed, so each object enters the worklist once.
    fn mark_worklist(&mut self, roots: Vec<Addr>) {
        let mut worklist = Vec::new();
        for root in roots {
            if root != NULL && !self.is_marked(root) {
                self.set_marked(root);
                worklist.push(root);
            }

            while let Some(addr) = worklist.pop() {
                for child in self.space.children(addr) {
                    if child != NULL && !self.is_marked(child) {
                        self.set_marked(child);
                        worklist.push(child);
                    }
                }
            }
        }
    }

    /// Free unmarked objects and clear the marks of the rest.
    fn sweep(&mut self) {
        let mut prev = NULL;
        let mut current = self.space.start();
        while current != NULL {
            let next = self.space.next(current);
            if self.is_marked(current) {
                self.clear_mark(current);
                prev = current;
            } else {
                if prev == NULL {
                    self.space.set_start(next);
                } else {
                    self.space.set_next(prev, next);
                }
                self.space.reclaim(current);
            }
            current = next;
        }
    }
}

impl Collector for MarkSweep {
    fn kind(&self) -> CollectorKind {
        match self.strategy {
            MarkStrategy::Recursive => CollectorKind::Marks,
            MarkStrategy::Worklist => CollectorKind::WorklistMarks,
            MarkStrategy::Bitmap => CollectorKind::BitmapMarks,
        }
    }

    fn space(&self) -> &ObjectSpace {
        &self.space
    }

    fn space_mut(&mut self) -> &mut ObjectSpace {
        &mut self.space
    }

    fn alloc_scalar(&mut self, value: i64) -> GcResult<Addr> {
        self.maybe_collect();
        let block = self.space.alloc_block(ObjectKind::Scalar)?;
        let addr = self.space.init_scalar(block, value);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn alloc_pair(&mut self) -> GcResult<Addr> {
        self.maybe_collect();
        let block = self.space.alloc_block(ObjectKind::Pair)?;
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn collect(&mut self) {
        let scope = self.space.begin_collection();
        self.mark_roots();
        self.sweep();
        self.space.finish_collection(self.kind().name(), scope);
    }
}
