//! Coalesced (log-based) deferred reference counting.
//!
//! The first mutation of a pair in an epoch appends the pair's current
//! children and then the pair itself to the log, marking the pair dirty with
//! its log slot. A collection replays the log and sweeps the zero-count
//! table.
//!
//! This collector is a known-incorrect reference example and is reported as
//! unsound by [`CollectorKind::is_sound`]:
//! - the replay increments and then decrements the pair's *current* fields,
//!   so an overwritten child is never decremented and leaks;
//! - root references are never counted, so an object referenced only from
//!   the root stack is reclaimed by the next collection.
//!
//! After each collection, root entries and pair fields that point at
//! reclaimed objects are cleared to null so the heap stays walkable.

use rustc_hash::FxHashSet;

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace};

use super::{Collector, CollectorKind, pop_pair_operands};

const REFCNT: usize = 0;
const DIRTY: usize = 1;

/// Dirty word of a pair that is not in the log.
const CLEAN: u64 = u64::MAX;

pub struct CoalescedRefCounting {
    space: ObjectSpace,
    zct: FxHashSet<Addr>,
    log: Vec<Addr>,
}

impl CoalescedRefCounting {
    pub fn new(config: &HeapConfig) -> Self {
        // Collections are rare: the threshold starts and stays at the ceiling.
        let policy = GrowthPolicy::new(config.max_threshold, config.max_threshold);
        Self {
            space: ObjectSpace::new(Arena::growable(), 2, config.stack_capacity, policy),
            zct: FxHashSet::default(),
            log: Vec::new(),
        }
    }

    pub fn refcnt(&self, addr: Addr) -> u64 {
        self.space.header(addr, REFCNT)
    }

    pub fn is_dirty(&self, addr: Addr) -> bool {
        self.space.header(addr, DIRTY) != CLEAN
    }

    /// Number of entries in the mutation log.
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    fn maybe_collect(&mut self) {
        if self.space.policy.should_collect(self.space.objcnt()) {
            self.collect();
        }
    }

    fn new_object(&mut self, addr: Addr) {
        self.space.set_header(addr, REFCNT, 0);
        self.space.set_header(addr, DIRTY, CLEAN);
        self.zct.insert(addr);
    }

    fn log_pair(&mut self, pair: Addr) {
        for child in self.space.children(pair) {
            if child != NULL {
                self.log.push(child);
            }
        }
        if !self.is_dirty(pair) {
            let slot = self.log.len();
            self.log.push(pair);
            self.space.set_header(pair, DIRTY, slot as u64);
        }
    }

    fn live_children(&self, addr: Addr) -> Vec<Addr> {
        self.space
            .children(addr)
            .into_iter()
            .filter(|&child| child != NULL && self.space.is_live(child))
            .collect()
    }

    fn process_log(&mut self) {
        let log = std::mem::take(&mut self.log);
        for (index, &addr) in log.iter().enumerate() {
            if !self.space.is_live(addr) {
                log::warn!("log entry {} at {:#x} no longer denotes an object", index, addr);
                continue;
            }
            if !self.is_dirty(addr) {
                continue;
            }
            self.space.set_header(addr, DIRTY, CLEAN);

            // Increment the new children.
            for child in self.live_children(addr) {
                let count = self.refcnt(child) + 1;
                self.space.set_header(child, REFCNT, count);
            }

            // Decrement the old children of the same entry.
            if self.refcnt(addr) > 0 {
                for child in self.live_children(addr) {
                    let count = self.refcnt(child).saturating_sub(1);
                    self.space.set_header(child, REFCNT, count);
                    if count == 0 {
                        self.zct.insert(child);
                    }
                }
            }
        }
    }

    /// Drop one reference and free on zero.
    fn delref(&mut self, addr: Addr) {
        let mut pending = vec![addr];
        while let Some(addr) = pending.pop() {
            if addr == NULL {
                continue;
            }
            if !self.space.is_live(addr) {
                log::warn!("skipping release of reclaimed object at {:#x}", addr);
                continue;
            }
            let count = self.refcnt(addr);
            if count == 0 {
                log::warn!("refcount underflow at {:#x}", addr);
                continue;
            }
            self.space.set_header(addr, REFCNT, count - 1);
            if count == 1 {
                pending.extend(self.space.children(addr));
                self.space.free_object(addr);
            }
        }
    }

    fn sweep_zct(&mut self) {
        let zct: Vec<Addr> = self.zct.drain().collect();
        for addr in zct {
            if !self.space.is_live(addr) {
                log::warn!("skipping double free of {:#x}", addr);
                continue;
            }
            if self.refcnt(addr) == 0 {
                for child in self.space.children(addr) {
                    self.delref(child);
                }
                self.space.free_object(addr);
            }
        }
    }

    /// Clear roots and pair fields that point at reclaimed objects.
    fn clear_dangling(&mut self) {
        for i in 0..self.space.roots.len() {
            let root = self.space.roots.as_slice()[i];
            if root != NULL && !self.space.is_live(root) {
                log::warn!("root {} at {:#x} was reclaimed", i, root);
                self.space.roots.as_mut_slice()[i] = NULL;
            }
        }

        let pairs: Vec<Addr> = self
            .space
            .objects()
            .filter(|&addr| self.space.is_pair(addr))
            .collect();
        for pair in pairs {
            let [head, tail] = self.space.children(pair);
            if head != NULL && !self.space.is_live(head) {
                self.space.set_head(pair, NULL);
            }
            if tail != NULL && !self.space.is_live(tail) {
                self.space.set_tail(pair, NULL);
            }
        }
    }
}

impl Collector for CoalescedRefCounting {
    fn kind(&self) -> CollectorKind {
        CollectorKind::CoalescedRefs
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
        self.new_object(addr);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn alloc_pair(&mut self) -> GcResult<Addr> {
        self.maybe_collect();
        let block = self.space.alloc_block(ObjectKind::Pair)?;
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.new_object(addr);
        self.space.roots.push(addr)?;
        self.log_pair(addr);
        Ok(addr)
    }

    fn set_pair(&mut self, pair: Addr, head: Option<Addr>, tail: Option<Addr>) {
        if !self.is_dirty(pair) {
            self.log_pair(pair);
        }
        if let Some(head) = head {
            self.space.set_head(pair, head);
        }
        if let Some(tail) = tail {
            self.space.set_tail(pair, tail);
        }
    }

    fn collect(&mut self) {
        let scope = self.space.begin_collection();
        self.process_log();
        self.sweep_zct();
        self.clear_dangling();
        self.space.finish_collection(self.kind().name(), scope);
    }
}
