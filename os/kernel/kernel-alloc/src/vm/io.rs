//! Driver-facing helpers for device windows.
//!
//! Thin wrappers over [`VmAllocator::io_remap`] and
//! [`VmAllocator::reserve_resource`] that speak in pointers and ranges.

use super::VmAllocator;
use crate::AllocError;
use crate::resource::ResourceId;
use core::ptr::NonNull;
use kernel_memory_addresses::{PhysicalAddress, PhysicalRange};
use kernel_vmem::PageTableMapper;

/// Map a device register window and return a pointer to `pa`.
///
/// # Errors
/// As [`VmAllocator::io_remap`].
pub fn ioremap<M: PageTableMapper>(
    vm: &VmAllocator<'_, M>,
    pa: PhysicalAddress,
    size: u64,
) -> Result<NonNull<u8>, AllocError> {
    let va = vm.io_remap(pa, size)?;
    NonNull::new(va.as_mut_ptr()).ok_or(AllocError::InvalidArgument)
}

/// [`ioremap`] for a whole range.
///
/// # Errors
/// As [`VmAllocator::io_remap`].
pub fn ioremap_range<M: PageTableMapper>(
    vm: &VmAllocator<'_, M>,
    range: PhysicalRange,
) -> Result<NonNull<u8>, AllocError> {
    ioremap(vm, range.start(), range.size())
}

/// Document a device range without mapping it.
///
/// # Errors
/// As [`VmAllocator::reserve_resource`].
pub fn reserve<M: PageTableMapper>(
    vm: &VmAllocator<'_, M>,
    name: &'static str,
    range: PhysicalRange,
) -> Result<ResourceId, AllocError> {
    vm.reserve_resource(name, range.start(), range.size())
}
