//! Physical memory mappings through `/dev/mem` (or any mappable file).

use std::{
    ffi::c_void,
    fs::OpenOptions,
    io,
    num::NonZeroUsize,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    ptr::NonNull,
};

use nix::{
    errno::Errno,
    libc,
    sys::mman::{mmap, munmap, MapFlags, ProtFlags},
    unistd::{sysconf, SysconfVar},
};

use crate::{hw_trait::MemoryRegion, tracing::prelude::*};

const FALLBACK_PAGE_SIZE: u64 = 4096;

fn page_size() -> u64 {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// A shared, synchronous mapping of a physical range.
///
/// The mapping starts at the page containing the requested base; the region
/// exposed through [`MemoryRegion`] starts at the base itself.
#[derive(Debug)]
pub struct PhysicalMapping {
    map: NonNull<c_void>,
    map_len: usize,
    skew: usize,
    len: usize,
}

// SAFETY: the mapping is plain shared memory owned by this value; nothing
// ties it to the creating thread.
unsafe impl Send for PhysicalMapping {}

impl PhysicalMapping {
    /// Map `len` bytes at `base` of the file at `path`.
    pub fn map(path: &Path, base: u64, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)?;

        let page = page_size();
        let aligned_base = base - base % page;
        let skew = (base - aligned_base) as usize;
        let map_len = len.checked_add(skew).ok_or(Errno::EOVERFLOW)?;
        let offset = libc::off_t::try_from(aligned_base).map_err(|_| Errno::EOVERFLOW)?;
        let length = NonZeroUsize::new(map_len).ok_or(Errno::EINVAL)?;

        // SAFETY: a fresh shared mapping chosen by the kernel; it aliases no
        // Rust object. The file descriptor may be closed afterwards.
        let map = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                offset,
            )
        }?;

        trace!(
            aligned_base = %format!("{aligned_base:#x}"),
            map_len,
            "mmap"
        );
        Ok(Self {
            map,
            map_len,
            skew,
            len,
        })
    }
}

// SAFETY: the pointer covers `len` bytes of the live mapping. The mapping is
// page aligned, so the start is aligned exactly as the physical base is.
unsafe impl MemoryRegion for PhysicalMapping {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        // SAFETY: skew < page size <= map_len.
        unsafe { self.map.as_ptr().cast::<u8>().add(self.skew) }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for PhysicalMapping {
    fn drop(&mut self) {
        // SAFETY: `map`/`map_len` came from a successful mmap and are
        // unmapped exactly once, here.
        if let Err(e) = unsafe { munmap(self.map, self.map_len) } {
            warn!(error = %e, "munmap failed");
        }
    }
}
