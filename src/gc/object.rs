//! Object model: addresses, mutator references and the fixed object shapes.

use std::fmt;

use super::arena::WORD;

/// Byte offset of an object inside its arena. `NULL` (0) is never allocated.
pub type Addr = usize;

/// The null address.
pub const NULL: Addr = 0;

// =============================================================================
// Ref - mutator-facing handle
// =============================================================================

/// A stable reference to a heap object, valid until the object is reclaimed.
///
/// Refs index the handle table; moving collectors rewrite the table, so a
/// `Ref` survives relocation. A reclaimed object's slot gets a new
/// generation, which makes every outstanding `Ref` to it detectably stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl Ref {
    /// Handle table slot of this reference.
    pub fn slot(self) -> u32 {
        self.slot
    }

    /// Generation of the slot when the reference was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.slot)
    }
}

// =============================================================================
// ObjectKind
// =============================================================================

/// The two object shapes a heap can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Scalar = 1,
    Pair = 2,
}

impl ObjectKind {
    /// Decode the kind bits of a descriptor word. Returns `None` for a word
    /// that does not describe an object (a cleared or free block).
    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            1 => Some(ObjectKind::Scalar),
            2 => Some(ObjectKind::Pair),
            _ => None,
        }
    }

    /// Number of body words (descriptor, next link and payload).
    pub const fn body_words(self) -> usize {
        match self {
            ObjectKind::Scalar => 3,
            ObjectKind::Pair => 4,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Scalar => write!(f, "scalar"),
            ObjectKind::Pair => write!(f, "pair"),
        }
    }
}

// =============================================================================
// Body Layout
// =============================================================================
//
// +------------------+  <- block start
// | GC header (H)    |     collector specific
// +------------------+  <- object address
// | descriptor       |     kind (bits 32-39) | handle slot (bits 0-31)
// | next             |     allocation-list link
// | value / head     |
// | tail             |     pairs only
// +------------------+

/// Byte offset of the descriptor word from the object address.
pub const DESC_OFFSET: usize = 0;
/// Byte offset of the allocation-list link.
pub const NEXT_OFFSET: usize = WORD;
/// Byte offset of a scalar's value.
pub const VALUE_OFFSET: usize = 2 * WORD;
/// Byte offset of a pair's head.
pub const HEAD_OFFSET: usize = 2 * WORD;
/// Byte offset of a pair's tail.
pub const TAIL_OFFSET: usize = 3 * WORD;

const DESC_KIND_SHIFT: u32 = 32;
const DESC_KIND_MASK: u64 = 0xFF << DESC_KIND_SHIFT;
const DESC_SLOT_MASK: u64 = 0xFFFF_FFFF;

/// Encode a descriptor word.
pub fn encode_desc(kind: ObjectKind, slot: u32) -> u64 {
    ((kind as u64) << DESC_KIND_SHIFT) | slot as u64
}

/// Decode the kind of a descriptor word.
pub fn decode_kind(desc: u64) -> Option<ObjectKind> {
    ObjectKind::from_bits((desc & DESC_KIND_MASK) >> DESC_KIND_SHIFT)
}

/// Decode the handle slot of a descriptor word.
pub fn decode_slot(desc: u64) -> u32 {
    (desc & DESC_SLOT_MASK) as u32
}

// =============================================================================
// HeapObject - decoded snapshot of one object
// =============================================================================

/// A decoded object as seen by the mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapObject {
    Scalar(i64),
    Pair { head: Option<Ref>, tail: Option<Ref> },
}

impl HeapObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            HeapObject::Scalar(_) => ObjectKind::Scalar,
            HeapObject::Pair { .. } => ObjectKind::Pair,
        }
    }
}

impl fmt::Display for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(r: &Option<Ref>) -> String {
            match r {
                Some(r) => r.to_string(),
                None => "nil".to_string(),
            }
        }

        match self {
            HeapObject::Scalar(value) => write!(f, "Scalar({})", value),
            HeapObject::Pair { head, tail } => {
                write!(f, "Pair({}, {})", field(head), field(tail))
            }
        }
    }
}
