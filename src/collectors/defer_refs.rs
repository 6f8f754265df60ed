//! Deferred reference counting with a zero-count table (ZCT).
//!
//! Only heap references are counted; root pushes and pops are free. An object
//! whose count is zero sits in the ZCT until the next collection, which
//! temporarily counts the roots and reclaims whatever is still at zero.

use rustc_hash::FxHashSet;

use crate::config::HeapConfig;
use crate::error::GcResult;
use crate::gc::{Addr, Arena, GrowthPolicy, NULL, ObjectKind, ObjectSpace};

use super::{Collector, CollectorKind, pop_pair_operands};

const REFCNT: usize = 0;

pub struct DeferredRefCounting {
    space: ObjectSpace,
    /// Objects whose count is zero
    zct: FxHashSet<Addr>,
}

impl DeferredRefCounting {
    pub fn new(config: &HeapConfig) -> Self {
        let policy = GrowthPolicy::new(config.initial_threshold, config.max_threshold);
        Self {
            space: ObjectSpace::new(Arena::growable(), 1, config.stack_capacity, policy),
            zct: FxHashSet::default(),
        }
    }

    pub fn refcnt(&self, addr: Addr) -> u64 {
        self.space.header(addr, REFCNT)
    }

    /// Whether `addr` is waiting in the zero-count table.
    pub fn in_zct(&self, addr: Addr) -> bool {
        self.zct.contains(&addr)
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
            self.zct.remove(&addr);
        }
    }

    /// Drop one reference; an object reaching zero waits in the ZCT.
    fn delref_to_zct(&mut self, addr: Addr) {
        if addr != NULL {
            let count = self.space.header(addr, REFCNT).saturating_sub(1);
            self.space.set_header(addr, REFCNT, count);
            if count == 0 {
                self.zct.insert(addr);
            }
        }
    }

    /// Drop one reference and free immediately on zero.
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
                self.zct.remove(&addr);
                self.space.free_object(addr);
            }
        }
    }

    fn new_object(&mut self, addr: Addr) -> GcResult<Addr> {
        self.space.set_header(addr, REFCNT, 0);
        self.zct.insert(addr);
        self.space.roots.push(addr)?;
        Ok(addr)
    }
}

impl Collector for DeferredRefCounting {
    fn kind(&self) -> CollectorKind {
        CollectorKind::DeferRefs
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
        self.addref(head);
        self.addref(tail);
        self.new_object(addr)
    }

    fn set_pair(&mut self, pair: Addr, head: Option<Addr>, tail: Option<Addr>) {
        if let Some(head) = head {
            self.addref(head);
            let old = self.space.head(pair);
            self.delref_to_zct(old);
            self.space.set_head(pair, head);
        }
        if let Some(tail) = tail {
            self.addref(tail);
            let old = self.space.tail(pair);
            self.delref_to_zct(old);
            self.space.set_tail(pair, tail);
        }
    }

    fn collect(&mut self) {
        let scope = self.space.begin_collection();

        let roots = self.space.roots.as_slice().to_vec();
        for &root in &roots {
            self.addref(root);
        }

        let zct: Vec<Addr> = self.zct.drain().collect();
        for addr in zct {
            if !self.space.is_live(addr) || self.space.header(addr, REFCNT) != 0 {
                continue;
            }
            for child in self.space.children(addr) {
                self.delref(child);
            }
            self.space.free_object(addr);
        }

        for &root in &roots {
            self.delref_to_zct(root);
        }

        self.space.finish_collection(self.kind().name(), scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> DeferredRefCounting {
        DeferredRefCounting::new(&HeapConfig::for_collector(CollectorKind::DeferRefs))
    }

    #[test]
    fn test_new_objects_enter_zct() {
        let mut gc = collector();
        let a = gc.alloc_scalar(1).unwrap();
        assert_eq!(gc.refcnt(a), 0);
        assert!(gc.in_zct(a));
    }

    #[test]
    fn test_pair_fields_leave_zct() {
        let mut gc = collector();
        let a = gc.alloc_scalar(1).unwrap();
        let b = gc.alloc_scalar(2).unwrap();
        let p = gc.alloc_pair().unwrap();
        assert_eq!(gc.refcnt(a), 1);
        assert!(!gc.in_zct(a));
        assert!(!gc.in_zct(b));
        assert!(gc.in_zct(p));
    }

    #[test]
    fn test_pop_is_deferred_until_collect() {
        let mut gc = collector();
        gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        gc.alloc_pair().unwrap();
        gc.pop_root().unwrap();
        assert_eq!(gc.space().objcnt(), 3);

        gc.collect();
        assert_eq!(gc.space().objcnt(), 0);
        assert_eq!(gc.space().stats.last_reclaimed, 3);
    }

    #[test]
    fn test_rooted_objects_survive_and_return_to_zct() {
        let mut gc = collector();
        let a = gc.alloc_scalar(1).unwrap();
        gc.alloc_scalar(2).unwrap();
        gc.pop_root().unwrap();

        gc.collect();
        assert_eq!(gc.space().objcnt(), 1);
        assert!(gc.space().is_live(a));
        assert_eq!(gc.refcnt(a), 0);
        assert!(gc.in_zct(a));
    }

    #[test]
    fn test_overwritten_child_reclaimed_by_collect() {
        let mut gc = collector();
        gc.alloc_scalar(1).unwrap();
        let old = gc.alloc_scalar(2).unwrap();
        let p = gc.alloc_pair().unwrap();
        let new = gc.alloc_scalar(3).unwrap();
        gc.set_pair(p, None, Some(new));
        assert!(gc.in_zct(old));
        gc.pop_root().unwrap();

        gc.collect();
        assert!(!gc.space().is_live(old));
        assert!(gc.space().is_live(new));
        assert_eq!(gc.space().objcnt(), 3);
    }
}
