use std::collections::BTreeMap;

const ALIGN: usize = 8;
// Offset 0 stays unused so that 0 can mean null.
const BASE: usize = ALIGN;

/// Default upper bound on linear memory, in bytes.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Byte-addressed linear memory with a first-fit allocator.
///
/// Pointers are offsets into the buffer. Blocks are 8-byte aligned and the
/// buffer grows on demand up to `limit`.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    limit: usize,
    // live blocks: start offset -> rounded size
    blocks: BTreeMap<usize, usize>,
}

fn align_up(value: usize) -> usize {
    value.div_ceil(ALIGN) * ALIGN
}

fn offset(ptr: i32) -> Option<usize> {
    usize::try_from(ptr).ok().filter(|&p| p >= BASE)
}

impl LinearMemory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            blocks: BTreeMap::new(),
        }
    }

    /// Allocate `size` bytes (at least one). Returns 0 when the limit would be
    /// exceeded.
    pub fn malloc(&mut self, size: usize) -> i32 {
        let size = align_up(size.max(1));
        let mut cursor = BASE;
        for (&start, &len) in &self.blocks {
            if start - cursor >= size {
                break;
            }
            cursor = start + len;
        }
        let end = match cursor.checked_add(size) {
            Some(end) if end <= self.limit => end,
            _ => return 0,
        };
        let Ok(ptr) = i32::try_from(cursor) else {
            return 0;
        };
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.blocks.insert(cursor, size);
        ptr
    }

    /// Release the block starting at `ptr`. Null and unknown pointers are
    /// ignored; returns whether a block was released.
    pub fn free(&mut self, ptr: i32) -> bool {
        offset(ptr).is_some_and(|start| self.blocks.remove(&start).is_some())
    }

    /// Bytes in `[ptr, ptr + len)`, clamped to the end of the buffer.
    #[must_use]
    pub fn read(&self, ptr: i32, len: usize) -> &[u8] {
        let Some(start) = offset(ptr).filter(|&s| s <= self.bytes.len()) else {
            return &[];
        };
        let end = start.saturating_add(len).min(self.bytes.len());
        &self.bytes[start..end]
    }

    /// Bytes from `ptr` up to (not including) the first NUL.
    #[must_use]
    pub fn read_cstr(&self, ptr: i32) -> &[u8] {
        let tail = self.read(ptr, usize::MAX);
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        &tail[..end]
    }

    /// Write `data` at `ptr`. The range must fall inside a single live block.
    pub fn write(&mut self, ptr: i32, data: &[u8]) -> bool {
        let Some(start) = offset(ptr) else {
            return false;
        };
        let inside = self
            .blocks
            .range(..=start)
            .next_back()
            .is_some_and(|(&block, &len)| start + data.len() <= block + len);
        if !inside {
            return false;
        }
        self.bytes[start..start + data.len()].copy_from_slice(data);
        true
    }

    /// Allocate and fill a block in one go. Returns 0 when out of memory.
    pub fn alloc_bytes(&mut self, data: &[u8], nul_terminate: bool) -> i32 {
        let ptr = self.malloc(data.len() + usize::from(nul_terminate));
        if ptr == 0 {
            return 0;
        }
        let start = ptr as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        if nul_terminate {
            self.bytes[start + data.len()] = 0;
        }
        ptr
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pointer_is_never_handed_out() {
        let mut mem = LinearMemory::default();
        let ptr = mem.malloc(0);
        assert_ne!(ptr, 0);
        assert_eq!(ptr as usize % ALIGN, 0);
    }

    #[test]
    fn freed_blocks_are_reused_first_fit() {
        let mut mem = LinearMemory::default();
        let a = mem.malloc(16);
        let b = mem.malloc(16);
        assert!(mem.free(a));
        let c = mem.malloc(8);
        assert_eq!(c, a);
        assert_ne!(b, c);
        assert_eq!(mem.live_blocks(), 2);
    }

    #[test]
    fn limit_is_enforced() {
        let mut mem = LinearMemory::new(32);
        assert_ne!(mem.malloc(16), 0);
        assert_eq!(mem.malloc(16), 0);
    }

    #[test]
    fn writes_stay_inside_their_block() {
        let mut mem = LinearMemory::default();
        let ptr = mem.malloc(4);
        assert!(mem.write(ptr, b"abcd"));
        assert!(!mem.write(ptr, &[0u8; 9]));
        assert!(!mem.write(0, b"x"));
        assert_eq!(mem.read(ptr, 4), b"abcd");
    }

    #[test]
    fn cstr_stops_at_nul() {
        let mut mem = LinearMemory::default();
        let ptr = mem.alloc_bytes(b"hello", true);
        assert_eq!(mem.read_cstr(ptr), b"hello");
        assert!(!mem.free(0));
        assert!(mem.free(ptr));
        assert!(!mem.free(ptr));
    }
}
