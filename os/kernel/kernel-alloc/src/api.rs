//! Allocator capability traits.
//!
//! The memory core exposes a small closed set of allocators behind these
//! traits so consumers (network stack, filesystem, drivers) can hold a
//! `&dyn ByteAllocator` instead of naming a concrete allocator.

use crate::AllocError;
use core::ptr::{self, NonNull};
use kernel_memory_addresses::PhysicalRange;

/// Physical page allocation in power-of-two blocks.
pub trait PageAllocator {
    /// Allocate at least `pages` contiguous 4 KiB frames.
    ///
    /// The returned range covers the whole block, i.e. `pages` rounded up to
    /// the next power of two, and is aligned to its own size.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] if `pages` is zero.
    /// - [`AllocError::OutOfMemory`] if no block is large enough.
    fn allocate_pages(&self, pages: usize) -> Result<PhysicalRange, AllocError>;

    /// Return a block obtained from [`allocate_pages`](Self::allocate_pages).
    fn free_pages(&self, block: PhysicalRange);
}

/// General byte allocation.
pub trait ByteAllocator {
    /// Allocate `size` bytes aligned to `align`.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for zero sizes or non power-of-two alignments.
    /// - [`AllocError::OutOfMemory`] / [`AllocError::OutOfVirtualMemory`] on exhaustion.
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError>;

    /// Release an allocation.
    ///
    /// # Safety
    /// `ptr` must come from [`allocate`](Self::allocate) on this allocator
    /// with the same `size` and `align`, and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize);

    /// Grow or shrink an allocation in place. Unsupported unless overridden.
    fn resize(&self, _ptr: NonNull<u8>, _size: usize, _align: usize, _new_size: usize) -> bool {
        false
    }

    /// Move an allocation to a new size.
    ///
    /// Returns `ptr` unchanged if the size does not change; otherwise
    /// allocates, copies the common prefix and frees the old allocation.
    ///
    /// # Errors
    /// Propagates [`allocate`](Self::allocate) errors; the old allocation
    /// stays valid in that case.
    ///
    /// # Safety
    /// Same contract as [`free`](Self::free) for `ptr`, `size` and `align`.
    unsafe fn remap(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if new_size == size {
            return Ok(ptr);
        }
        let new = self.allocate(new_size, align)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), size.min(new_size));
            self.free(ptr, size, align);
        }
        Ok(new)
    }
}
