//! Boot-time bump allocator.
//!
//! Before the buddy allocator exists, the memory core still needs memory:
//! the buddy's per-page link table, the early translation tables and a home
//! for the allocator itself. [`BootBumpAlloc`] hands those out from a fixed
//! physical window and never frees. Once [`finish`](BootBumpAlloc::finish)
//! is called, the consumed part is reported so it can be reserved away from
//! the buddy allocator.

use crate::{AllocError, LinearMap};
use core::mem::MaybeUninit;
use core::{ptr, slice};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalRange, Size4K};
use kernel_vmem::FrameAlloc;
use log::{debug, info};

pub struct BootBumpAlloc {
    range: PhysicalRange,
    next: PhysicalAddress,
    linear: LinearMap,
}

impl BootBumpAlloc {
    /// Create a bump allocator over `range`.
    ///
    /// # Safety
    /// `range` must be unused RAM that is reachable and writable through
    /// `linear`, and nothing else may use it for the rest of the kernel's
    /// lifetime (all allocations are handed out as `'static`).
    #[must_use]
    pub const unsafe fn new(range: PhysicalRange, linear: LinearMap) -> Self {
        Self {
            range,
            next: range.start(),
            linear,
        }
    }

    /// Carve `size` bytes aligned to `align`.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] if `align` is not a power of two.
    /// - [`AllocError::OutOfMemory`] if the window is exhausted.
    pub fn alloc_bytes(&mut self, size: u64, align: u64) -> Result<PhysicalAddress, AllocError> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidArgument);
        }
        let start = self.next.checked_align_up(align).ok_or(AllocError::OutOfMemory)?;
        let end = start.checked_add(size).ok_or(AllocError::OutOfMemory)?;
        if end > self.range.end() {
            return Err(AllocError::OutOfMemory);
        }
        self.next = end;
        Ok(start)
    }

    /// Allocate a table of `len` elements, each initialized to `fill`.
    ///
    /// # Errors
    /// See [`alloc_bytes`](Self::alloc_bytes).
    pub fn alloc_table<T: Copy>(&mut self, len: usize, fill: T) -> Result<&'static mut [T], AllocError> {
        let bytes = size_of::<T>()
            .checked_mul(len)
            .ok_or(AllocError::InvalidArgument)?;
        let pa = self.alloc_bytes(bytes as u64, align_of::<T>() as u64)?;
        let base = self.linear.phys_to_ptr::<T>(pa);
        debug!("bootmem: {len} x {} bytes at {pa}", size_of::<T>());

        // SAFETY: the range is exclusively ours (see `new`) and reachable
        // through the linear map; every element is written before the slice
        // is formed.
        unsafe {
            for i in 0..len {
                base.add(i).write(fill);
            }
            Ok(slice::from_raw_parts_mut(base, len))
        }
    }

    /// Allocate room for one `T`, left uninitialized.
    ///
    /// # Errors
    /// See [`alloc_bytes`](Self::alloc_bytes).
    pub fn alloc_uninit<T>(&mut self) -> Result<&'static mut MaybeUninit<T>, AllocError> {
        let pa = self.alloc_bytes(size_of::<T>() as u64, align_of::<T>() as u64)?;
        // SAFETY: as in `alloc_table`; `MaybeUninit` needs no initialization.
        Ok(unsafe { &mut *self.linear.phys_to_ptr::<MaybeUninit<T>>(pa) })
    }

    /// The part of the window consumed so far.
    #[must_use]
    pub const fn used(&self) -> PhysicalRange {
        PhysicalRange::new(self.range.start(), self.next)
    }

    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.range.end().as_u64() - self.next.as_u64()
    }

    /// Stop allocating and return the consumed range, rounded out to whole
    /// pages, for the caller to reserve.
    #[must_use]
    pub fn finish(self) -> PhysicalRange {
        let used = self.used().page_outer::<Size4K>();
        info!("bootmem: consumed {used:?} ({} pages)", used.pages());
        used
    }
}

impl FrameAlloc for BootBumpAlloc {
    /// Hands out zeroed frames, as translation tables must start empty.
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        let pa = self.alloc_bytes(PAGE_SIZE, PAGE_SIZE).ok()?;
        // SAFETY: fresh frame inside our window.
        unsafe { ptr::write_bytes(self.linear.phys_to_ptr::<u8>(pa), 0, PAGE_SIZE as usize) };
        Some(pa)
    }
}
