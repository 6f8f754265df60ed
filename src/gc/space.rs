//! Object space: the state every collector manages.
//!
//! An `ObjectSpace` owns the arena, the root stack, the handle table and the
//! intrusive allocation list threaded through each object's `next` word.
//! Collectors decide where blocks come from and when they are reclaimed; the
//! space knows how objects are laid out inside a block.

use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::error::{GcError, GcResult};

use super::arena::{Arena, WORD};
use super::handles::HandleTable;
use super::object::{
    Addr, DESC_OFFSET, HEAD_OFFSET, NEXT_OFFSET, NULL, ObjectKind, Ref, TAIL_OFFSET,
    VALUE_OFFSET, decode_kind, decode_slot, encode_desc,
};
use super::policy::GrowthPolicy;
use super::roots::RootStack;
use super::stats::GcStats;

/// Bookkeeping for a collection in progress.
#[must_use]
pub struct CollectionScope {
    started: Instant,
    objects_before: usize,
}

pub struct ObjectSpace {
    pub arena: Arena,
    pub roots: RootStack,
    pub handles: HandleTable,
    pub policy: GrowthPolicy,
    pub stats: GcStats,
    /// Collector header words in front of every object
    header_words: usize,
    /// Most recently linked object (head of the allocation list)
    start: Addr,
    /// Number of objects on the allocation list
    objcnt: usize,
    collecting: bool,
}

impl ObjectSpace {
    pub fn new(
        arena: Arena,
        header_words: usize,
        stack_capacity: usize,
        policy: GrowthPolicy,
    ) -> Self {
        Self {
            arena,
            roots: RootStack::new(stack_capacity),
            handles: HandleTable::new(),
            policy,
            stats: GcStats::default(),
            header_words,
            start: NULL,
            objcnt: 0,
            collecting: false,
        }
    }

    // =========================================================================
    // Sizes and allocation
    // =========================================================================

    pub fn header_words(&self) -> usize {
        self.header_words
    }

    /// Block size in bytes of an object of `kind`, header included.
    pub fn block_size(&self, kind: ObjectKind) -> usize {
        (self.header_words + kind.body_words()) * WORD
    }

    /// Block start of the object at `addr`.
    pub fn block_of(&self, addr: Addr) -> usize {
        addr - self.header_words * WORD
    }

    /// Object address inside the block starting at `block`.
    pub fn object_in(&self, block: usize) -> Addr {
        block + self.header_words * WORD
    }

    /// Error for a request the arena cannot hold.
    pub fn out_of_memory(&self, kind: ObjectKind) -> GcError {
        GcError::OutOfMemory {
            requested: self.block_size(kind),
            capacity: self.arena.capacity(),
        }
    }

    /// Take a block for `kind` from the free list or the bump cursor.
    pub fn alloc_block(&mut self, kind: ObjectKind) -> GcResult<usize> {
        let size = self.block_size(kind);
        self.arena
            .allocate(size)
            .ok_or_else(|| self.out_of_memory(kind))
    }

    /// Initialise a scalar in `block`, register its handle and link it.
    pub fn init_scalar(&mut self, block: usize, value: i64) -> Addr {
        let addr = self.place(block, ObjectKind::Scalar);
        self.arena.write_word(addr + VALUE_OFFSET, value as u64);
        addr
    }

    /// Initialise a pair in `block`, register its handle and link it.
    pub fn init_pair(&mut self, block: usize, head: Addr, tail: Addr) -> Addr {
        let addr = self.place(block, ObjectKind::Pair);
        self.arena.write_word(addr + HEAD_OFFSET, head as u64);
        self.arena.write_word(addr + TAIL_OFFSET, tail as u64);
        addr
    }

    fn place(&mut self, block: usize, kind: ObjectKind) -> Addr {
        self.arena.clear_words(block, self.header_words);
        let addr = self.object_in(block);
        let handle = self.handles.insert(addr);
        self.arena
            .write_word(addr + DESC_OFFSET, encode_desc(kind, handle.slot()));
        self.arena.write_word(addr + NEXT_OFFSET, self.start as u64);
        self.start = addr;
        self.objcnt += 1;
        addr
    }

    // =========================================================================
    // Object accessors
    // =========================================================================

    /// Kind of a live object.
    pub fn kind(&self, addr: Addr) -> ObjectKind {
        let kind = decode_kind(self.arena.read_word(addr + DESC_OFFSET));
        debug_assert!(kind.is_some(), "no object at {:#x}", addr);
        kind.unwrap_or(ObjectKind::Scalar)
    }

    pub fn is_pair(&self, addr: Addr) -> bool {
        self.kind(addr) == ObjectKind::Pair
    }

    /// Handle slot recorded in the object's descriptor.
    pub fn slot(&self, addr: Addr) -> u32 {
        decode_slot(self.arena.read_word(addr + DESC_OFFSET))
    }

    pub fn next(&self, addr: Addr) -> Addr {
        self.arena.read_word(addr + NEXT_OFFSET) as Addr
    }

    pub fn set_next(&mut self, addr: Addr, next: Addr) {
        self.arena.write_word(addr + NEXT_OFFSET, next as u64);
    }

    pub fn scalar_value(&self, addr: Addr) -> i64 {
        self.arena.read_word(addr + VALUE_OFFSET) as i64
    }

    pub fn head(&self, addr: Addr) -> Addr {
        self.arena.read_word(addr + HEAD_OFFSET) as Addr
    }

    pub fn tail(&self, addr: Addr) -> Addr {
        self.arena.read_word(addr + TAIL_OFFSET) as Addr
    }

    pub fn set_head(&mut self, addr: Addr, head: Addr) {
        self.arena.write_word(addr + HEAD_OFFSET, head as u64);
    }

    pub fn set_tail(&mut self, addr: Addr, tail: Addr) {
        self.arena.write_word(addr + TAIL_OFFSET, tail as u64);
    }

    /// Head and tail of a pair, `[NULL, NULL]` for a scalar.
    pub fn children(&self, addr: Addr) -> [Addr; 2] {
        if self.is_pair(addr) {
            [self.head(addr), self.tail(addr)]
        } else {
            [NULL, NULL]
        }
    }

    /// Collector header word `index` of the object at `addr`.
    pub fn header(&self, addr: Addr, index: usize) -> u64 {
        self.arena.read_word(self.header_addr(addr, index))
    }

    pub fn set_header(&mut self, addr: Addr, index: usize, value: u64) {
        let offset = self.header_addr(addr, index);
        self.arena.write_word(offset, value);
    }

    fn header_addr(&self, addr: Addr, index: usize) -> usize {
        debug_assert!(index < self.header_words);
        addr - (self.header_words - index) * WORD
    }

    // =========================================================================
    // Allocation list
    // =========================================================================

    /// Head of the allocation list.
    pub fn start(&self) -> Addr {
        self.start
    }

    pub fn set_start(&mut self, start: Addr) {
        self.start = start;
    }

    /// Number of allocated objects.
    pub fn objcnt(&self) -> usize {
        self.objcnt
    }

    pub fn set_objcnt(&mut self, objcnt: usize) {
        self.objcnt = objcnt;
    }

    /// Walk the allocation list.
    pub fn objects(&self) -> impl Iterator<Item = Addr> + '_ {
        let mut current = self.start;
        std::iter::from_fn(move || {
            if current == NULL {
                return None;
            }
            let addr = current;
            current = self.next(addr);
            Some(addr)
        })
    }

    /// Remove `addr` from the allocation list without reclaiming it.
    pub fn unlink(&mut self, addr: Addr) {
        let next = self.next(addr);
        if self.start == addr {
            self.start = next;
            return;
        }

        let mut prev = self.start;
        while prev != NULL {
            let current = self.next(prev);
            if current == addr {
                self.set_next(prev, next);
                return;
            }
            prev = current;
        }
        debug_assert!(false, "{:#x} is not on the allocation list", addr);
    }

    /// Release an object's handle and storage. The caller has already
    /// unlinked it from the allocation list.
    pub fn reclaim(&mut self, addr: Addr) {
        let kind = self.kind(addr);
        let slot = self.slot(addr);
        log::debug!("reclaim {} at {:#x} (slot {})", kind, addr, slot);

        self.handles.release(slot);
        self.arena.write_word(addr + DESC_OFFSET, 0);
        let block = self.block_of(addr);
        let size = self.block_size(kind);
        self.arena.release(block, size);
        self.objcnt -= 1;
    }

    /// Unlink and reclaim an object.
    pub fn free_object(&mut self, addr: Addr) {
        self.unlink(addr);
        self.reclaim(addr);
    }

    /// Unlink and reclaim a batch of objects in one pass over the list.
    pub fn free_objects(&mut self, addrs: &[Addr]) {
        if addrs.is_empty() {
            return;
        }
        let doomed: FxHashSet<Addr> = addrs.iter().copied().collect();

        let mut prev = NULL;
        let mut current = self.start;
        while current != NULL {
            let next = self.next(current);
            if doomed.contains(&current) {
                if prev == NULL {
                    self.start = next;
                } else {
                    self.set_next(prev, next);
                }
            } else {
                prev = current;
            }
            current = next;
        }

        for &addr in &doomed {
            self.reclaim(addr);
        }
    }

    /// Whether `addr` currently denotes an allocated object.
    pub fn is_live(&self, addr: Addr) -> bool {
        if addr == NULL || addr + 2 * WORD > self.arena.len() {
            return false;
        }
        let desc = self.arena.read_word(addr + DESC_OFFSET);
        decode_kind(desc).is_some() && self.handles.addr_of_slot(decode_slot(desc)) == addr
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Current reference to the object at `addr`.
    pub fn handle_of(&self, addr: Addr) -> Ref {
        self.handles.ref_for_slot(self.slot(addr))
    }

    /// Address named by `r`.
    pub fn resolve(&self, r: Ref) -> GcResult<Addr> {
        self.handles.resolve(r).ok_or(GcError::DanglingRef(r))
    }

    /// References to every allocated object, most recent first.
    pub fn live_objects(&self) -> Vec<Ref> {
        self.objects().map(|addr| self.handle_of(addr)).collect()
    }

    /// Rewrite the handle table after objects moved. `forward` maps an old
    /// address to its new one, or `None` if the object did not survive.
    pub fn remap_handles(&mut self, mut forward: impl FnMut(&Arena, Addr) -> Option<Addr>) {
        let arena = &self.arena;
        self.handles.remap(|addr| forward(arena, addr));
    }

    // =========================================================================
    // Collection bookkeeping
    // =========================================================================

    /// Mark the start of a collection.
    pub fn begin_collection(&mut self) -> CollectionScope {
        debug_assert!(!self.collecting, "collection started while collecting");
        self.collecting = true;
        CollectionScope {
            started: Instant::now(),
            objects_before: self.objcnt,
        }
    }

    /// Record statistics, update the threshold and log the outcome.
    pub fn finish_collection(&mut self, name: &str, scope: CollectionScope) {
        self.finish_collection_with(name, scope, self.objcnt);
    }

    /// Like [`finish_collection`](Self::finish_collection), for collectors
    /// that leave unreachable objects allocated after the collection ends.
    /// `survivors` is the number of objects found reachable.
    pub fn finish_collection_with(&mut self, name: &str, scope: CollectionScope, survivors: usize) {
        self.collecting = false;
        let reclaimed = scope.objects_before.saturating_sub(self.objcnt);
        self.stats
            .record(reclaimed, survivors, scope.started.elapsed());
        self.policy.update(survivors);
        log::info!(
            "{} collected [{}] objects, [{}] remaining",
            name,
            reclaimed,
            survivors
        );
    }
}
