//! Bounded root stack.

use crate::error::{GcError, GcResult};

use super::object::Addr;

/// Default number of root slots.
pub const DEFAULT_STACK_CAPACITY: usize = 1024;

/// Fixed-capacity LIFO stack of object addresses.
#[derive(Debug)]
pub struct RootStack {
    entries: Vec<Addr>,
    capacity: usize,
}

impl RootStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, addr: Addr) -> GcResult<()> {
        if self.entries.len() >= self.capacity {
            return Err(GcError::StackOverflow(self.capacity));
        }
        self.entries.push(addr);
        Ok(())
    }

    pub fn pop(&mut self) -> GcResult<Addr> {
        self.entries.pop().ok_or(GcError::StackUnderflow)
    }

    /// Entry `depth` positions below the top (0 = top).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Roots from bottom to top.
    pub fn as_slice(&self) -> &[Addr] {
        &self.entries
    }

    /// Mutable view used by collectors that rewrite roots after moving.
    pub fn as_mut_slice(&mut self) -> &mut [Addr] {
        &mut self.entries
    }
}
