//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses used by the memory core
//! (page allocator, heap bins, VM areas) and the page-table interface.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | Physical memory or MMIO; what DMA engines and page-table entries consume. |
//! | [`VirtualAddress`] | A translated address; the only kind that may be dereferenced. |
//! | [`PhysicalRange`] | A half-open `[start, end)` physical interval. |
//!
//! Mixing the two address kinds is a compile error; converting between them
//! always goes through an explicit mapping (see the linear map in
//! `kernel-alloc`).
//!
//! ## Page Sizes
//!
//! With the ARM64 4 KiB translation granule, three leaf sizes exist, each a
//! marker type implementing [`PageSize`]:
//!
//! - [`Size4K`]: level 3 page descriptor
//! - [`Size2M`]: level 2 block descriptor
//! - [`Size1G`]: level 1 block descriptor
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x4008_1234);
//! assert_eq!(pa.align_down::<Size4K>().as_u64(), 0x4008_1000);
//! assert_eq!(pa.align_up::<Size4K>().as_u64(), 0x4008_2000);
//! assert!(!pa.is_aligned::<Size4K>());
//!
//! let ram = PhysicalRange::from_start_size(PhysicalAddress::new(0x4000_0000), 0x100_0000);
//! assert!(ram.contains(pa));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod range;
mod virtual_address;

pub use crate::memory_address::MemoryAddress;
pub use crate::page_size::{PageSize, Size1G, Size2M, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::range::PhysicalRange;
pub use crate::virtual_address::VirtualAddress;

/// Size in bytes of the base translation granule.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}

/// Whether `x` is a multiple of the power of two `a`.
#[inline(always)]
#[must_use]
pub const fn is_aligned(x: u64, a: u64) -> bool {
    x & (a - 1) == 0
}

/// Number of whole 4 KiB pages needed to hold `bytes`.
#[inline(always)]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(0x12345, 16), 0x12340);
        assert_eq!(align_up(0x12345, 16), 0x12350);
        assert!(is_aligned(0x20_0000, Size2M::SIZE));
        assert!(!is_aligned(0x20_1000, Size2M::SIZE));
    }

    #[test]
    fn page_counts_round_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(4096), 1);
        assert_eq!(pages_for(4097), 2);
    }
}
