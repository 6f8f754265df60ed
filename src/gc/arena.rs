//! Linear byte arena backing every heap.
//!
//! Addresses handed out by the arena are byte offsets into one `Vec<u8>`.
//! Offset 0 is reserved as the null address, so the first word of the
//! buffer is never allocated.
//!
//! The arena supports three allocation styles:
//! - bump allocation inside the active region `[start, limit)`
//! - a first-fit free list of released blocks (with splitting)
//! - retargeting the active region, used by the semispace collectors

/// Size of one heap word in bytes.
pub const WORD: usize = 8;

/// Free blocks need room for their size word and the next link.
const MIN_FREE_BLOCK: usize = 2 * WORD;

// =============================================================================
// Byte-level access helpers for Vec<u8> memory
// =============================================================================

/// Read a u64 from the byte buffer at the given byte offset.
#[inline(always)]
fn read_u64(memory: &[u8], byte_offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&memory[byte_offset..byte_offset + WORD]);
    u64::from_le_bytes(bytes)
}

/// Write a u64 to the byte buffer at the given byte offset.
#[inline(always)]
fn write_u64(memory: &mut [u8], byte_offset: usize, value: u64) {
    memory[byte_offset..byte_offset + WORD].copy_from_slice(&value.to_le_bytes());
}

/// Round a byte size up to the word quantum.
pub const fn align_up(bytes: usize) -> usize {
    (bytes + WORD - 1) & !(WORD - 1)
}

// =============================================================================
// Free block layout
// =============================================================================
//
// +----------------+----------------+
// | size in bytes  | next free (0)  |
// +----------------+----------------+
//
// A one-word hole left by splitting a block cannot hold this header. Such
// holes are kept as fragments outside the buffer and merged back when a
// neighbouring block is released.

/// The arena: linear memory, a bump cursor and a free list.
pub struct Arena {
    /// Linear memory buffer (byte-addressed)
    memory: Vec<u8>,
    /// First byte of the active region
    start: usize,
    /// One past the last usable byte (ignored when growable)
    limit: usize,
    /// Next bump allocation offset
    cursor: usize,
    /// Head of free list (byte offset, or 0 if empty)
    free_list_head: usize,
    /// One-word holes too small for the free list
    fragments: Vec<usize>,
    /// Grow the buffer instead of failing when the bump cursor overruns
    growable: bool,
}

impl Arena {
    /// Initial reservation for growable arenas.
    const INITIAL_CAPACITY: usize = 64 * 1024;

    /// Create an arena that grows on demand, like a malloc heap.
    pub fn growable() -> Self {
        let mut memory = vec![0u8; WORD];
        memory.reserve(Self::INITIAL_CAPACITY - WORD);
        Self {
            memory,
            start: WORD,
            limit: usize::MAX,
            cursor: WORD,
            free_list_head: 0,
            fragments: Vec::new(),
            growable: true,
        }
    }

    /// Create a fixed-size arena holding `bytes` usable bytes.
    pub fn fixed(bytes: usize) -> Self {
        let bytes = align_up(bytes);
        Self {
            memory: vec![0u8; WORD + bytes],
            start: WORD,
            limit: WORD + bytes,
            cursor: WORD,
            free_list_head: 0,
            fragments: Vec::new(),
            growable: false,
        }
    }

    /// Read the word at `offset`.
    #[inline]
    pub fn read_word(&self, offset: usize) -> u64 {
        read_u64(&self.memory, offset)
    }

    /// Write the word at `offset`.
    #[inline]
    pub fn write_word(&mut self, offset: usize, value: u64) {
        write_u64(&mut self.memory, offset, value);
    }

    /// Zero `words` consecutive words starting at `offset`.
    pub fn clear_words(&mut self, offset: usize, words: usize) {
        self.memory[offset..offset + words * WORD].fill(0);
    }

    /// Move `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy_block(&mut self, src: usize, dst: usize, len: usize) {
        self.memory.copy_within(src..src + len, dst);
    }

    /// Start of the active region.
    pub fn start(&self) -> usize {
        self.start
    }

    /// End of the active region.
    pub fn limit(&self) -> usize {
        if self.growable {
            self.memory.len()
        } else {
            self.limit
        }
    }

    /// Current bump cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Usable bytes in the active region (current size for growable arenas).
    pub fn capacity(&self) -> usize {
        self.limit() - self.start
    }

    /// Length of the whole backing buffer in bytes.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Whether nothing has been bump-allocated in the active region.
    pub fn is_empty(&self) -> bool {
        self.cursor == self.start
    }

    /// Whether a bump allocation of `size` bytes would succeed.
    pub fn fits(&self, size: usize) -> bool {
        self.growable || self.cursor + size <= self.limit
    }

    /// Bump-allocate `size` bytes. Returns `None` if a fixed arena overruns.
    pub fn bump(&mut self, size: usize) -> Option<usize> {
        let size = align_up(size);
        let required_len = self.cursor + size;
        if self.growable {
            if required_len > self.memory.len() {
                self.memory
                    .resize(required_len.max(self.memory.len() * 2), 0);
            }
        } else if required_len > self.limit {
            return None;
        }

        let offset = self.cursor;
        self.cursor = required_len;
        Some(offset)
    }

    /// Allocate from the free list first, then from the bump cursor.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let size = align_up(size);
        self.take_free_block(size).or_else(|| self.bump(size))
    }

    /// Move the bump cursor, e.g. to the end of a compacted region.
    pub fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor >= self.start && cursor <= self.limit());
        self.cursor = cursor;
    }

    /// Retarget the active region to `[start, limit)` and empty it.
    ///
    /// Used by the semispace collectors to flip halves of one buffer.
    pub fn reset_region(&mut self, start: usize, limit: usize) {
        debug_assert!(!self.growable, "growable arenas have a single region");
        debug_assert!(start >= WORD && limit <= self.memory.len() && start <= limit);
        self.start = start;
        self.limit = limit;
        self.cursor = start;
        self.free_list_head = 0;
        self.fragments.clear();
    }

    /// Find a free block of at least the given size in bytes (first-fit).
    /// If found, removes it from the free list and returns its byte offset.
    /// A larger block is split; a one-word remainder becomes a fragment.
    pub fn take_free_block(&mut self, needed_bytes: usize) -> Option<usize> {
        let needed_bytes = align_up(needed_bytes);
        let mut prev_offset: Option<usize> = None;
        let mut current = self.free_list_head;

        while current != 0 {
            let block_size = self.read_word(current) as usize;
            let next = self.read_word(current + WORD) as usize;

            if block_size >= needed_bytes {
                self.unlink_free(prev_offset, next);

                let remaining = block_size - needed_bytes;
                if remaining >= MIN_FREE_BLOCK {
                    self.push_free(current + needed_bytes, remaining);
                } else if remaining > 0 {
                    self.fragments.push(current + needed_bytes);
                }

                return Some(current);
            }

            prev_offset = Some(current);
            current = next;
        }

        None
    }

    /// Return a block to the arena.
    ///
    /// The block is merged with free neighbours on both sides. A block that
    /// then ends exactly at the bump cursor is absorbed by moving the cursor
    /// down; every other block goes on the free list.
    pub fn release(&mut self, offset: usize, size: usize) {
        let mut offset = offset;
        let mut size = align_up(size);
        debug_assert!(size >= MIN_FREE_BLOCK, "block too small to free");

        let end = offset + size;
        if let Some((prev, next)) = self.find_block_starting_at(end) {
            size += self.read_word(end) as usize;
            self.unlink_free(prev, next);
        } else if self.take_fragment(end) {
            size += WORD;
        }

        if let Some((prev, block, next)) = self.find_block_ending_at(offset) {
            self.unlink_free(prev, next);
            size += offset - block;
            offset = block;
        } else if offset > WORD && self.take_fragment(offset - WORD) {
            offset -= WORD;
            size += WORD;
        }

        if offset + size == self.cursor {
            self.cursor = offset;
        } else {
            self.push_free(offset, size);
        }
    }

    /// Total bytes held by the free list and fragments.
    pub fn free_bytes(&self) -> usize {
        self.free_blocks().map(|(_, size)| size).sum::<usize>() + self.fragments.len() * WORD
    }

    /// Number of blocks on the free list.
    pub fn free_block_count(&self) -> usize {
        self.free_blocks().count()
    }

    /// Iterate over `(offset, size)` of every free block.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut current = self.free_list_head;
        std::iter::from_fn(move || {
            if current == 0 {
                return None;
            }
            let block = current;
            let size = self.read_word(block) as usize;
            current = self.read_word(block + WORD) as usize;
            Some((block, size))
        })
    }

    fn push_free(&mut self, offset: usize, size: usize) {
        self.write_word(offset, size as u64);
        self.write_word(offset + WORD, self.free_list_head as u64);
        self.free_list_head = offset;
    }

    fn unlink_free(&mut self, prev: Option<usize>, next: usize) {
        match prev {
            Some(prev) => self.write_word(prev + WORD, next as u64),
            None => self.free_list_head = next,
        }
    }

    fn take_fragment(&mut self, offset: usize) -> bool {
        match self.fragments.iter().position(|&fragment| fragment == offset) {
            Some(index) => {
                self.fragments.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Locate the free block starting at `block`: `(prev, next)`.
    fn find_block_starting_at(&self, block: usize) -> Option<(Option<usize>, usize)> {
        let mut prev = None;
        let mut current = self.free_list_head;
        while current != 0 {
            let next = self.read_word(current + WORD) as usize;
            if current == block {
                return Some((prev, next));
            }
            prev = Some(current);
            current = next;
        }
        None
    }

    /// Locate a free block whose end is `end`: `(prev, block, next)`.
    fn find_block_ending_at(&self, end: usize) -> Option<(Option<usize>, usize, usize)> {
        let mut prev = None;
        let mut current = self.free_list_head;
        while current != 0 {
            let size = self.read_word(current) as usize;
            let next = self.read_word(current + WORD) as usize;
            if current + size == end {
                return Some((prev, current, next));
            }
            prev = Some(current);
            current = next;
        }
        None
    }
}
