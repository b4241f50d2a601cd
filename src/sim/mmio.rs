//! RAM-backed memory region.

use crate::hw_trait::MemoryRegion;

/// A zero-filled region of ordinary memory standing in for a register
/// block.
#[derive(Debug, Clone)]
pub struct RamRegion {
    // u64 storage keeps the start 8-byte aligned.
    words: Vec<u64>,
    len: usize,
}

impl RamRegion {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }
}

// SAFETY: the pointer covers `len` bytes of `words`, whose heap buffer is
// never reallocated and is 8-byte aligned.
unsafe impl MemoryRegion for RamRegion {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_and_length() {
        let mut region = RamRegion::new(13);
        assert_eq!(region.len(), 13);
        assert_eq!(region.as_mut_ptr() as usize % 8, 0);
        assert!(RamRegion::new(0).is_empty());
    }
}
