//! Collector capability table and registry.
//!
//! Every algorithm implements [`Collector`] over its own [`ObjectSpace`].
//! Callers only see the trait, so swapping the boxed collector swaps the
//! whole strategy.

pub mod coalesced_refs;
pub mod copying;
pub mod defer_refs;
pub mod lazy_sweep;
pub mod mark_compact;
pub mod marks;
pub mod recycler_refs;
pub mod refs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::HeapConfig;
use crate::error::{GcError, GcResult};
use crate::gc::{Addr, ObjectSpace};

// =============================================================================
// CollectorKind - registry of algorithms
// =============================================================================

/// Registered collection algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectorKind {
    /// Immediate reference counting
    #[serde(rename = "refs")]
    Refs,
    /// Deferred reference counting with a zero-count table
    #[serde(rename = "defer_refs")]
    DeferRefs,
    /// Reference counting with synchronous cycle collection
    #[serde(rename = "recycler_refs")]
    RecyclerRefs,
    /// Coalesced (log-based) reference counting; not sound
    #[serde(rename = "coalesced_refs")]
    CoalescedRefs,
    /// Recursive mark-sweep
    #[default]
    #[serde(rename = "marks")]
    Marks,
    /// Mark-sweep with an explicit worklist
    #[serde(rename = "worklist_marks")]
    WorklistMarks,
    /// Mark-sweep with a side mark bitmap
    #[serde(rename = "bitmap_marks")]
    BitmapMarks,
    /// Recursive semispace copying
    #[serde(rename = "copy")]
    SemispaceCopy,
    /// Breadth-first (Cheney) semispace copying
    #[serde(rename = "cheney_copy")]
    CheneyCopy,
    /// Sliding mark-compaction
    #[serde(rename = "mark_compact")]
    MarkCompact,
    /// Mark with lazy sweeping into a free list
    #[serde(rename = "lazy_sweep")]
    LazySweep,
}

impl CollectorKind {
    /// Every registered collector.
    pub const ALL: [CollectorKind; 11] = [
        CollectorKind::Refs,
        CollectorKind::DeferRefs,
        CollectorKind::RecyclerRefs,
        CollectorKind::CoalescedRefs,
        CollectorKind::Marks,
        CollectorKind::WorklistMarks,
        CollectorKind::BitmapMarks,
        CollectorKind::SemispaceCopy,
        CollectorKind::CheneyCopy,
        CollectorKind::MarkCompact,
        CollectorKind::LazySweep,
    ];

    /// Registered name.
    pub fn name(self) -> &'static str {
        match self {
            CollectorKind::Refs => "refs",
            CollectorKind::DeferRefs => "defer_refs",
            CollectorKind::RecyclerRefs => "recycler_refs",
            CollectorKind::CoalescedRefs => "coalesced_refs",
            CollectorKind::Marks => "marks",
            CollectorKind::WorklistMarks => "worklist_marks",
            CollectorKind::BitmapMarks => "bitmap_marks",
            CollectorKind::SemispaceCopy => "copy",
            CollectorKind::CheneyCopy => "cheney_copy",
            CollectorKind::MarkCompact => "mark_compact",
            CollectorKind::LazySweep => "lazy_sweep",
        }
    }

    /// Whether the collector keeps every reachable object alive.
    /// Only the coalesced reference counter does not.
    pub fn is_sound(self) -> bool {
        self != CollectorKind::CoalescedRefs
    }

    /// Whether the collector reclaims unreachable cycles.
    pub fn collects_cycles(self) -> bool {
        !matches!(
            self,
            CollectorKind::Refs | CollectorKind::DeferRefs | CollectorKind::CoalescedRefs
        )
    }

    /// Whether the collector is triggered by the object-count threshold
    /// (as opposed to arena exhaustion).
    pub fn uses_threshold(self) -> bool {
        matches!(
            self,
            CollectorKind::Refs
                | CollectorKind::DeferRefs
                | CollectorKind::RecyclerRefs
                | CollectorKind::CoalescedRefs
                | CollectorKind::Marks
                | CollectorKind::WorklistMarks
                | CollectorKind::BitmapMarks
        )
    }

    /// Whether the collector may move objects.
    pub fn is_moving(self) -> bool {
        matches!(
            self,
            CollectorKind::SemispaceCopy | CollectorKind::CheneyCopy | CollectorKind::MarkCompact
        )
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollectorKind {
    type Err = GcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| GcError::UnknownCollector(s.to_string()))
    }
}

// =============================================================================
// Collector trait
// =============================================================================

/// Operations every collection algorithm provides.
///
/// Addresses passed in are live objects; the heap facade resolves and checks
/// mutator references before calling into a collector.
pub trait Collector {
    fn kind(&self) -> CollectorKind;

    fn space(&self) -> &ObjectSpace;

    fn space_mut(&mut self) -> &mut ObjectSpace;

    /// Allocate a scalar and push it onto the root stack.
    fn alloc_scalar(&mut self, value: i64) -> GcResult<Addr>;

    /// Pop tail then head, allocate a pair of them and push it.
    ///
    /// Any collection this triggers runs before the operands are popped.
    fn alloc_pair(&mut self) -> GcResult<Addr>;

    /// Store the given fields of `pair`; `None` leaves a field unchanged.
    fn set_pair(&mut self, pair: Addr, head: Option<Addr>, tail: Option<Addr>) {
        let space = self.space_mut();
        if let Some(head) = head {
            space.set_head(pair, head);
        }
        if let Some(tail) = tail {
            space.set_tail(pair, tail);
        }
    }

    /// Remove the top root.
    fn pop_root(&mut self) -> GcResult<()> {
        self.space_mut().roots.pop().map(|_| ())
    }

    /// Run a full collection.
    fn collect(&mut self);

    /// Whether a live-looking object is already known to be garbage.
    fn condemned(&self, _addr: Addr) -> bool {
        false
    }
}

/// Build the collector selected by `config`.
pub fn create_collector(config: &HeapConfig) -> Box<dyn Collector> {
    match config.collector {
        CollectorKind::Refs => Box::new(refs::RefCounting::new(config)),
        CollectorKind::DeferRefs => Box::new(defer_refs::DeferredRefCounting::new(config)),
        CollectorKind::RecyclerRefs => Box::new(recycler_refs::Recycler::new(config)),
        CollectorKind::CoalescedRefs => {
            Box::new(coalesced_refs::CoalescedRefCounting::new(config))
        }
        CollectorKind::Marks => {
            Box::new(marks::MarkSweep::new(config, marks::MarkStrategy::Recursive))
        }
        CollectorKind::WorklistMarks => {
            Box::new(marks::MarkSweep::new(config, marks::MarkStrategy::Worklist))
        }
        CollectorKind::BitmapMarks => {
            Box::new(marks::MarkSweep::new(config, marks::MarkStrategy::Bitmap))
        }
        CollectorKind::SemispaceCopy => {
            Box::new(copying::Semispace::new(config, copying::CopyOrder::Recursive))
        }
        CollectorKind::CheneyCopy => {
            Box::new(copying::Semispace::new(config, copying::CopyOrder::Cheney))
        }
        CollectorKind::MarkCompact => Box::new(mark_compact::MarkCompact::new(config)),
        CollectorKind::LazySweep => Box::new(lazy_sweep::LazySweep::new(config)),
    }
}

/// Pop the two operands of a pair allocation: `(head, tail)`.
pub(crate) fn pop_pair_operands(space: &mut ObjectSpace) -> GcResult<(Addr, Addr)> {
    let tail = space.roots.pop()?;
    let head = space.roots.pop()?;
    Ok((head, tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_names_round_trip() {
        for kind in CollectorKind::ALL {
            assert_eq!(kind.name().parse::<CollectorKind>(), Ok(kind));
            assert_eq!(kind.to_string(), kind.name());
        }
    }

    #[test]
    fn test_unknown_collector() {
        assert_eq!(
            "gen_copy".parse::<CollectorKind>(),
            Err(GcError::UnknownCollector("gen_copy".to_string()))
        );
    }

    #[test]
    fn test_only_coalesced_is_unsound() {
        let unsound: Vec<_> = CollectorKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_sound())
            .collect();
        assert_eq!(unsound, vec![CollectorKind::CoalescedRefs]);
    }

    #[test]
    fn test_create_collector_kinds() {
        for kind in CollectorKind::ALL {
            let collector = create_collector(&HeapConfig::for_collector(kind));
            assert_eq!(collector.kind(), kind);
            assert_eq!(collector.space().objcnt(), 0);
        }
    }
}
