//! # Linear-map `PhysMapper`
//!
//! Every physical address `pa` is visible to the kernel at `offset + pa`
//! (with `offset` = [`LINEAR_MAP_BASE`] on hardware). This is the only way
//! the memory core touches physical memory: the buddy link table, heap
//! chunks and translation tables are all reached through it.
//!
//! The offset is a runtime value so that host tests can point the "linear
//! map" at an ordinary buffer standing in for DRAM.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::LinearMap;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let map = LinearMap::kernel();
//! let va = map.phys_to_virt(PhysicalAddress::new(0x4000_0000));
//! assert_eq!(va.as_u64(), 0xffff_0000_4000_0000);
//! assert_eq!(map.virt_to_phys(va), PhysicalAddress::new(0x4000_0000));
//! ```

use kernel_info::memory::LINEAR_MAP_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for a fixed-offset linear map of physical memory.
///
/// # Safety
/// The linear mapping must be present and cover the referenced physical
/// range before any pointer derived from it is dereferenced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinearMap {
    offset: u64,
}

impl LinearMap {
    /// A linear map at an arbitrary offset. Arithmetic wraps, so the offset
    /// may be "negative" relative to the physical addresses.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// The kernel's linear map at [`LINEAR_MAP_BASE`].
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(LINEAR_MAP_BASE)
    }

    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }

    #[inline]
    #[must_use]
    pub const fn phys_to_virt(self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(pa.as_u64().wrapping_add(self.offset))
    }

    /// Inverse of [`phys_to_virt`](Self::phys_to_virt). Only meaningful for
    /// addresses inside the linear map.
    #[inline]
    #[must_use]
    pub const fn virt_to_phys(self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset))
    }

    #[inline]
    #[must_use]
    pub const fn phys_to_ptr<T>(self, pa: PhysicalAddress) -> *mut T {
        self.phys_to_virt(pa).as_mut_ptr()
    }
}

impl PhysMapper for LinearMap {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        Self::phys_to_virt(*self, pa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_offsets_wrap() {
        let map = LinearMap::new(0u64.wrapping_sub(0x4000_0000));
        let va = map.phys_to_virt(PhysicalAddress::new(0x4000_1000));
        assert_eq!(va.as_u64(), 0x1000);
        assert_eq!(map.virt_to_phys(va).as_u64(), 0x4000_1000);
    }

    #[test]
    fn trait_and_inherent_agree() {
        let map = LinearMap::kernel();
        let pa = PhysicalAddress::new(0x1234_5000);
        assert_eq!(PhysMapper::phys_to_virt(&map, pa), map.phys_to_virt(pa));
    }
}
