//! Public heap facade.
//!
//! A [`Heap`] owns one collector and exposes the collector-agnostic mutator
//! API. Mutator references are [`Ref`] handles; every operation resolves them
//! first, so a reference to a reclaimed object is reported as
//! [`GcError::DanglingRef`] instead of touching reused memory.

use crate::collectors::{Collector, CollectorKind, create_collector};
use crate::config::HeapConfig;
use crate::error::{GcError, GcResult};
use crate::gc::{Addr, GcStats, HeapObject, NULL, ObjectKind, Ref};

pub struct Heap {
    collector: Box<dyn Collector>,
    config: HeapConfig,
}

impl Heap {
    /// Create a heap managed by the collector registered as `name`.
    pub fn create(name: &str) -> GcResult<Self> {
        let kind: CollectorKind = name.parse()?;
        Self::with_config(&HeapConfig::for_collector(kind))
    }

    pub fn with_config(config: &HeapConfig) -> GcResult<Self> {
        config.validate()?;
        log::debug!("creating {} heap", config.collector);
        Ok(Self {
            collector: create_collector(config),
            config: config.clone(),
        })
    }

    /// Run a final collection and release the heap.
    pub fn destroy(mut self) -> GcStats {
        self.collector.collect();
        self.collector.space().stats.clone()
    }

    // =========================================================================
    // Mutator operations
    // =========================================================================

    /// Allocate a scalar and push it onto the root stack.
    pub fn alloc_scalar(&mut self, value: i64) -> GcResult<Ref> {
        let roots = &self.collector.space().roots;
        if roots.is_full() {
            return Err(GcError::StackOverflow(roots.capacity()));
        }
        let addr = self.collector.alloc_scalar(value)?;
        Ok(self.collector.space().handle_of(addr))
    }

    /// Pop tail then head, allocate a pair of them and push it.
    pub fn alloc_pair(&mut self) -> GcResult<Ref> {
        if self.collector.space().roots.len() < 2 {
            return Err(GcError::StackUnderflow);
        }
        let addr = self.collector.alloc_pair()?;
        Ok(self.collector.space().handle_of(addr))
    }

    /// Update the given fields of `pair`; `None` leaves a field unchanged.
    pub fn set_pair_fields(
        &mut self,
        pair: Ref,
        head: Option<Ref>,
        tail: Option<Ref>,
    ) -> GcResult<()> {
        let pair_addr = self.resolve(pair)?;
        if self.collector.space().kind(pair_addr) != ObjectKind::Pair {
            return Err(GcError::NotAPair(pair));
        }
        let head = head.map(|r| self.resolve(r)).transpose()?;
        let tail = tail.map(|r| self.resolve(r)).transpose()?;
        self.collector.set_pair(pair_addr, head, tail);
        Ok(())
    }

    /// Remove the top root.
    pub fn pop_root(&mut self) -> GcResult<()> {
        self.collector.pop_root()
    }

    /// Run a full collection now.
    pub fn force_collect(&mut self) {
        self.collector.collect();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn collector(&self) -> CollectorKind {
        self.collector.kind()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn is_live(&self, r: Ref) -> bool {
        self.resolve(r).is_ok()
    }

    pub fn kind_of(&self, r: Ref) -> GcResult<ObjectKind> {
        let addr = self.resolve(r)?;
        Ok(self.collector.space().kind(addr))
    }

    /// Decode the object named by `r`.
    pub fn object(&self, r: Ref) -> GcResult<HeapObject> {
        let addr = self.resolve(r)?;
        let space = self.collector.space();
        Ok(match space.kind(addr) {
            ObjectKind::Scalar => HeapObject::Scalar(space.scalar_value(addr)),
            ObjectKind::Pair => HeapObject::Pair {
                head: self.field_ref(space.head(addr)),
                tail: self.field_ref(space.tail(addr)),
            },
        })
    }

    /// Debug rendering, e.g. `Scalar(42)` or `Pair(#3, nil)`.
    pub fn describe(&self, r: Ref) -> GcResult<String> {
        Ok(self.object(r)?.to_string())
    }

    pub fn scalar_value(&self, r: Ref) -> GcResult<i64> {
        match self.object(r)? {
            HeapObject::Scalar(value) => Ok(value),
            HeapObject::Pair { .. } => Err(GcError::NotAScalar(r)),
        }
    }

    pub fn head(&self, r: Ref) -> GcResult<Option<Ref>> {
        match self.object(r)? {
            HeapObject::Pair { head, .. } => Ok(head),
            HeapObject::Scalar(_) => Err(GcError::NotAPair(r)),
        }
    }

    pub fn tail(&self, r: Ref) -> GcResult<Option<Ref>> {
        match self.object(r)? {
            HeapObject::Pair { tail, .. } => Ok(tail),
            HeapObject::Scalar(_) => Err(GcError::NotAPair(r)),
        }
    }

    /// Number of allocated objects.
    pub fn object_count(&self) -> usize {
        self.collector.space().objcnt()
    }

    /// Object count that triggers the next threshold collection.
    pub fn threshold(&self) -> usize {
        self.collector.space().policy.threshold()
    }

    pub fn root_count(&self) -> usize {
        self.collector.space().roots.len()
    }

    /// Objects on the root stack, bottom first. Entries cleared by a
    /// collection are skipped.
    pub fn roots(&self) -> Vec<Ref> {
        let space = self.collector.space();
        space
            .roots
            .as_slice()
            .iter()
            .filter(|&&addr| addr != NULL)
            .map(|&addr| space.handle_of(addr))
            .collect()
    }

    /// Every allocated object, most recently linked first.
    pub fn live_objects(&self) -> Vec<Ref> {
        let space = self.collector.space();
        space
            .objects()
            .filter(|&addr| !self.collector.condemned(addr))
            .map(|addr| space.handle_of(addr))
            .collect()
    }

    pub fn stats(&self) -> &GcStats {
        &self.collector.space().stats
    }

    fn resolve(&self, r: Ref) -> GcResult<Addr> {
        let addr = self.collector.space().resolve(r)?;
        if self.collector.condemned(addr) {
            return Err(GcError::DanglingRef(r));
        }
        Ok(addr)
    }

    fn field_ref(&self, addr: Addr) -> Option<Ref> {
        (addr != NULL).then(|| self.collector.space().handle_of(addr))
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("collector", &self.collector.kind())
            .field("objects", &self.object_count())
            .field("threshold", &self.threshold())
            .field("roots", &self.root_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_unknown_collector() {
        let err = Heap::create("reference_counting").unwrap_err();
        assert_eq!(err, GcError::UnknownCollector("reference_counting".into()));
    }

    #[test]
    fn test_describe() {
        let mut heap = Heap::create("marks").unwrap();
        let a = heap.alloc_scalar(42).unwrap();
        heap.alloc_scalar(7).unwrap();
        let p = heap.alloc_pair().unwrap();
        assert_eq!(heap.describe(a).unwrap(), "Scalar(42)");
        assert_eq!(heap.describe(p).unwrap(), format!("Pair({}, #1)", a));
        assert_eq!(heap.kind_of(p).unwrap(), ObjectKind::Pair);
    }

    #[test]
    fn test_shape_errors() {
        let mut heap = Heap::create("worklist_marks").unwrap();
        let a = heap.alloc_scalar(1).unwrap();
        assert_eq!(heap.head(a), Err(GcError::NotAPair(a)));
        assert_eq!(
            heap.set_pair_fields(a, Some(a), None),
            Err(GcError::NotAPair(a))
        );
        heap.alloc_scalar(2).unwrap();
        let p = heap.alloc_pair().unwrap();
        assert_eq!(heap.scalar_value(p), Err(GcError::NotAScalar(p)));
    }

    #[test]
    fn test_stack_errors() {
        let mut heap = Heap::with_config(&HeapConfig {
            stack_capacity: 2,
            ..HeapConfig::default()
        })
        .unwrap();
        assert_eq!(heap.pop_root(), Err(GcError::StackUnderflow));
        heap.alloc_scalar(1).unwrap();
        assert_eq!(heap.alloc_pair(), Err(GcError::StackUnderflow));
        heap.alloc_scalar(2).unwrap();
        assert_eq!(heap.alloc_scalar(3), Err(GcError::StackOverflow(2)));
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_dangling_ref() {
        let mut heap = Heap::create("refs").unwrap();
        let a = heap.alloc_scalar(1).unwrap();
        heap.pop_root().unwrap();
        assert!(!heap.is_live(a));
        assert_eq!(heap.scalar_value(a), Err(GcError::DanglingRef(a)));
    }

    #[test]
    fn test_destroy_returns_stats() {
        let mut heap = Heap::create("cheney_copy").unwrap();
        heap.alloc_scalar(1).unwrap();
        heap.pop_root().unwrap();
        let stats = heap.destroy();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.objects_reclaimed, 1);
    }
}
