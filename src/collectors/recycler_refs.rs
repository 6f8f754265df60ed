//! Reference counting with synchronous cycle collection.
//!
//! Counts behave as in immediate reference counting. A decrement that leaves
//! an object alive makes it a purple cycle candidate. A collection then
//! trial-deletes the candidates' subgraphs: internal references are
//! subtracted (grey), subgraphs with outside references are restored
//! (black), and what remains (white) is garbage cycles.

use rustc_hash::FxHashSet;

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace};

use super::{Collector, CollectorKind, pop_pair_operands};

// =============================================================================
// Header Layout (64 bits)
// =============================================================================
//
// +---------------+-------------------+-------------------------+
// | colour (2)    | reserved          | reference count (32)    |
// | bits 62-63    | bits 32-61        | bits 0-31               |
// +---------------+-------------------+-------------------------+

const HEADER: usize = 0;
const COLOUR_SHIFT: u32 = 62;
const COUNT_MASK: u64 = 0xFFFF_FFFF;

/// Colour of an object during cycle collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Colour {
    /// In use or free
    Black = 0,
    /// Possible root of a garbage cycle
    Purple = 1,
    /// Possible member of a garbage cycle
    Grey = 2,
    /// Member of a garbage cycle
    White = 3,
}

impl Colour {
    fn from_bits(bits: u64) -> Self {
        match bits {
            1 => Colour::Purple,
            2 => Colour::Grey,
            3 => Colour::White,
            _ => Colour::Black,
        }
    }
}

fn encode_header(count: u64, colour: Colour) -> u64 {
    ((colour as u64) << COLOUR_SHIFT) | (count & COUNT_MASK)
}

pub struct Recycler {
    space: ObjectSpace,
    /// Buffered cycle candidates
    candidates: FxHashSet<Addr>,
}

impl Recycler {
    pub fn new(config: &HeapConfig) -> Self {
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        Self {
            space: ObjectSpace::new(Arena::growable(), 1, config.stack_capacity, policy),
            candidates: FxHashSet::default(),
        }
    }

    pub fn refcnt(&self, addr: Addr) -> u64 {
        self.space.header(addr, HEADER) & COUNT_MASK
    }

    pub fn colour(&self, addr: Addr) -> Colour {
        Colour::from_bits(self.space.header(addr, HEADER) >> COLOUR_SHIFT)
    }

    /// Number of buffered cycle candidates.
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    fn set_refcnt(&mut self, addr: Addr, count: u64) {
        let colour = self.colour(addr);
        self.space
            .set_header(addr, HEADER, encode_header(count, colour));
    }

    fn set_colour(&mut self, addr: Addr, colour: Colour) {
        let count = self.refcnt(addr);
        self.space
            .set_header(addr, HEADER, encode_header(count, colour));
    }

    fn maybe_collect(&mut self) {
        if self.space.policy.should_collect(self.space.objcnt()) {
            self.collect();
        }
    }

    fn new_object(&mut self, addr: Addr) -> GcResult<Addr> {
        self.space
            .set_header(addr, HEADER, encode_header(1, Colour::Black));
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn addref(&mut self, addr: Addr) {
        if addr != NULL {
            let count = self.refcnt(addr) + 1;
            self.space
                .set_header(addr, HEADER, encode_header(count, Colour::Black));
        }
    }

    fn possible_root(&mut self, addr: Addr) {
        if self.colour(addr) != Colour::Purple {
            self.set_colour(addr, Colour::Purple);
            self.candidates.insert(addr);
        }
    }

    /// Drop one reference. Objects reaching zero release their children and
    /// are freed unless buffered; buffered ones wait for the next collection.
    fn delref(&mut self, addr: Addr) {
        let mut pending = vec![addr];
        while let Some(addr) = pending.pop() {
            if addr == NULL {
                continue;
            }
            let count = self.refcnt(addr);
            debug_assert!(count > 0, "refcount underflow at {:#x}", addr);
            let count = count.saturating_sub(1);
            self.set_refcnt(addr, count);
            if count > 0 {
                self.possible_root(addr);
                continue;
            }

            pending.extend(self.space.children(addr));
            self.set_colour(addr, Colour::Black);
            if !self.candidates.contains(&addr) {
                self.space.free_object(addr);
            }
        }
    }

    // =========================================================================
    // Cycle collection
    // =========================================================================

    fn mark_candidates(&mut self) {
        let candidates: Vec<Addr> = self.candidates.iter().copied().collect();
        for addr in candidates {
            if self.colour(addr) == Colour::Purple {
                self.mark_grey(addr);
            } else {
                self.candidates.remove(&addr);
                if self.colour(addr) == Colour::Black && self.refcnt(addr) == 0 {
                    self.space.free_object(addr);
                }
            }
        }
    }

    /// Subtract internal references of the subgraph under `root`.
    fn mark_grey(&mut self, root: Addr) {
        if self.colour(root) == Colour::Grey {
            return;
        }
        self.set_colour(root, Colour::Grey);
        let mut worklist = vec![root];
        while let Some(addr) = worklist.pop() {
            for child in self.space.children(addr) {
                if child == NULL {
                    continue;
                }
                let count = self.refcnt(child).saturating_sub(1);
                self.set_refcnt(child, count);
                if self.colour(child) != Colour::Grey {
                    self.set_colour(child, Colour::Grey);
                    worklist.push(child);
                }
            }
        }
    }

    /// Whiten grey nodes without outside references; restore the rest.
    fn scan(&mut self, root: Addr) {
        let mut worklist = vec![root];
        while let Some(addr) = worklist.pop() {
            if self.colour(addr) != Colour::Grey {
                continue;
            }
            if self.refcnt(addr) > 0 {
                self.scan_black(addr);
            } else {
                self.set_colour(addr, Colour::White);
                worklist.extend(self.space.children(addr).into_iter().filter(|&c| c != NULL));
            }
        }
    }

    /// Re-add the internal references of a subgraph that is still in use.
    fn scan_black(&mut self, root: Addr) {
        self.set_colour(root, Colour::Black);
        let mut worklist = vec![root];
        while let Some(addr) = worklist.pop() {
            for child in self.space.children(addr) {
                if child == NULL {
                    continue;
                }
                let count = self.refcnt(child) + 1;
                self.set_refcnt(child, count);
                if self.colour(child) != Colour::Black {
                    self.set_colour(child, Colour::Black);
                    worklist.push(child);
                }
            }
        }
    }

    /// Gather the white subgraph under `root` into `garbage`.
    fn collect_white(&mut self, root: Addr, garbage: &mut Vec<Addr>) {
        let mut worklist = vec![root];
        while let Some(addr) = worklist.pop() {
            self.candidates.remove(&addr);
            if self.colour(addr) == Colour::White {
                self.set_colour(addr, Colour::Black);
                worklist.extend(self.space.children(addr).into_iter().filter(|&c| c != NULL));
                garbage.push(addr);
            }
        }
    }
}

impl Collector for Recycler {
    fn kind(&self) -> CollectorKind {
        CollectorKind::RecyclerRefs
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
        self.new_object(addr)
    }

    fn alloc_pair(&mut self) -> GcResult<Addr> {
        self.maybe_collect();
        let block = self.space.alloc_block(ObjectKind::Pair)?;
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.new_object(addr)
    }

    fn set_pair(&mut self, pair: Addr, head: Option<Addr>, tail: Option<Addr>) {
        if let Some(head) = head {
            self.addref(head);
            let old = self.space.head(pair);
            self.space.set_head(pair, head);
            self.delref(old);
        }
        if let Some(tail) = tail {
            self.addref(tail);
            let old = self.space.tail(pair);
            self.space.set_tail(pair, tail);
            self.delref(old);
        }
    }

    fn pop_root(&mut self) -> GcResult<()> {
        let addr = self.space.roots.pop()?;
        self.delref(addr);
        Ok(())
    }

    fn collect(&mut self) {
        let scope = self.space.begin_collection();

        self.mark_candidates();

        let candidates: Vec<Addr> = self.candidates.iter().copied().collect();
        for &addr in &candidates {
            self.scan(addr);
        }

        let mut garbage = Vec::new();
        for &addr in &candidates {
            self.collect_white(addr, &mut garbage);
        }
        self.space.free_objects(&garbage);

        self.space.finish_collection(self.kind().name(), scope);
    }

    /// Buffered objects whose count dropped to zero wait for the next
    /// collection but are already garbage.
    fn condemned(&self, addr: Addr) -> bool {
        self.refcnt(addr) == 0
    }
}
