//! Immediate reference counting.
//!
//! Each object carries one header word holding its reference count. Root
//! stack entries count as references: a new object starts at 1, popping a
//! root decrements. An object is freed as soon as its count reaches zero.
//! Cycles are never reclaimed.

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace};

use super::{Collector, CollectorKind, pop_pair_operands};

const REFCNT: usize = 0;

pub struct RefCounting {
    space: ObjectSpace,
}

impl RefCounting {
    pub fn new(config: &HeapConfig) -> Self {
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        Self {
            space: ObjectSpace::new(Arena::growable(), 1, config.stack_capacity, policy),
        }
    }

    /// Current reference count of `addr`.
    pub fn refcnt(&self, addr: Addr) -> u64 {
        self.space.header(addr, REFCNT)
    }

    fn maybe_collect(&mut self) {
        if self.space.policy.should_collect(self.space.objcnt()) {
            self.collect();
        }
    }

    fn addref(&mut self, addr: Addr) {
        if addr != NULL {
            let count = self.space.header(addr, REFCNT);
            self.space.set_header(addr, REFCNT, count + 1);
        }
    }

    /// Drop one reference, freeing everything whose count reaches zero.
    fn delref(&mut self, addr: Addr) {
        let mut pending = vec![addr];
        while let Some(addr) = pending.pop() {
            if addr == NULL {
                continue;
            }
            let count = self.space.header(addr, REFCNT);
            debug_assert!(count > 0, "refcount underflow at {:#x}", addr);
            let count = count.saturating_sub(1);
            self.space.set_header(addr, REFCNT, count);
            if count == 0 {
                pending.extend(self.space.children(addr));
                self.space.free_object(addr);
            }
        }
    }
}

impl Collector for RefCounting {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Refs
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
        self.space.set_header(addr, REFCNT, 1);
        self.space.roots.push(addr)?;
        Ok(addr)
    }

    fn alloc_pair(&mut self) -> GcResult<Addr> {
        self.maybe_collect();
        let block = self.space.alloc_block(ObjectKind::Pair)?;
        // The operands' root references move into the pair's fields.
        let (head, tail) = pop_pair_operands(&mut self.space)?;
        let addr = self.space.init_pair(block, head, tail);
        self.space.set_header(addr, REFCNT, 1);
        self.space.roots.push(addr)?;
        Ok(addr)
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
        // Garbage is freed eagerly; a collection only updates the threshold.
        let scope = self.space.begin_collection();
        self.space.finish_collection(self.kind().name(), scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> RefCounting {
        RefCounting::new(&HeapConfig::for_collector(CollectorKind::Refs))
    }

    #[test]
    fn test_pop_frees_immediately() {
        let mut gc = collector();
        gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        gc.alloc_pair().unwrap();
        assert_eq!(gc.space().objcnt(), 3);

        gc.pop_root().unwrap();
        assert_eq!(gc.space().objcnt(), 0);
        assert!(gc.space().handles.is_empty());
    }

    #[test]
    fn test_pair_takes_over_root_references() {
        let mut gc = collector();
        let a = gc.alloc_scalar(1).unwrap();
        let b = gc.alloc_scalar(2).unwrap();
        let p = gc.alloc_pair().unwrap();
        assert_eq!(gc.refcnt(a), 1);
        assert_eq!(gc.refcnt(b), 1);
        assert_eq!(gc.refcnt(p), 1);
    }

    #[test]
    fn test_set_pair_frees_overwritten_child() {
        let mut gc = collector();
        gc.alloc_scalar(1).unwrap();
        let old = gc.alloc_scalar(2).unwrap();
        let p = gc.alloc_pair().unwrap();
        let new = gc.alloc_scalar(3).unwrap();

        gc.set_pair(p, None, Some(new));
        assert!(!gc.space().is_live(old));
        assert_eq!(gc.refcnt(new), 2);
        assert_eq!(gc.space().tail(p), new);
    }

    #[test]
    fn test_self_assignment_keeps_child() {
        let mut gc = collector();
        let a = gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        let p = gc.alloc_pair().unwrap();
        gc.set_pair(p, Some(a), None);
        assert!(gc.space().is_live(a));
        assert_eq!(gc.refcnt(a), 1);
    }

    #[test]
    fn test_cycle_leaks() {
        let mut gc = collector();
        gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        let a = gc.alloc_pair().unwrap();
        gc.alloc_scalar(3).unwrap();
        gc.alloc_scalar(4).unwrap();
        let b = gc.alloc_pair().unwrap();
        gc.set_pair(a, Some(b), None);
        gc.set_pair(b, Some(a), None);
        gc.pop_root().unwrap();
        gc.pop_root().unwrap();

        gc.collect();
        assert_eq!(gc.space().objcnt(), 4);
        assert_eq!(gc.space().stats.last_reclaimed, 0);
    }
}
