//! Memory region backend trait.

/// A contiguous range of memory that peripheral registers are accessed
/// through.
///
/// # Safety
///
/// Implementors guarantee that `as_mut_ptr()` points to `len()` bytes that
/// stay valid for reads and writes, at a stable address, for as long as the
/// region is alive, and that the start address is aligned to at least 8
/// bytes relative to the physical base the region represents.
pub unsafe trait MemoryRegion: Send {
    /// Start of the region; corresponds to the handle's physical base.
    fn as_mut_ptr(&mut self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
