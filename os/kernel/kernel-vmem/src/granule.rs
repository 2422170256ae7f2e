use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size1G, Size2M, Size4K, VirtualAddress};

/// Leaf mapping sizes of the ARM64 4 KiB translation granule.
///
/// Unlike the [`PageSize`] markers this is a runtime value, so the page-table
/// interface stays object safe and callers can pick a size per sub-range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Granule {
    /// Level 3 page descriptor.
    Size4K,
    /// Level 2 block descriptor.
    Size2M,
    /// Level 1 block descriptor.
    Size1G,
}

impl Granule {
    /// All granules, largest first.
    pub const DESCENDING: [Self; 3] = [Self::Size1G, Self::Size2M, Self::Size4K];

    #[inline]
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Size4K => Size4K::SIZE,
            Self::Size2M => Size2M::SIZE,
            Self::Size1G => Size1G::SIZE,
        }
    }

    /// Translation table level holding the leaf descriptor.
    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Size4K => Size4K::LEVEL,
            Self::Size2M => Size2M::LEVEL,
            Self::Size1G => Size1G::LEVEL,
        }
    }

    /// Largest granule usable at this point of a mapping.
    ///
    /// Both `va` and `pa` must be aligned to the granule and at least one
    /// whole granule must remain. Returns `None` only when fewer than 4 KiB
    /// remain or the addresses are not even page aligned.
    #[must_use]
    pub fn largest_fitting(va: VirtualAddress, pa: PhysicalAddress, remaining: u64) -> Option<Self> {
        Self::DESCENDING.into_iter().find(|g| {
            let size = g.size();
            remaining >= size && va.is_aligned_to(size) && pa.is_aligned_to(size)
        })
    }
}

impl fmt::Display for Granule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Size4K => Size4K::as_str(),
            Self::Size2M => Size2M::as_str(),
            Self::Size1G => Size1G::as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_when_both_sides_aligned() {
        let g = Granule::largest_fitting(
            VirtualAddress::new(0xffff_8000_4000_0000),
            PhysicalAddress::new(0x4000_0000),
            Size1G::SIZE,
        );
        assert_eq!(g, Some(Granule::Size1G));
    }

    #[test]
    fn physical_misalignment_forces_smaller_granule() {
        let g = Granule::largest_fitting(
            VirtualAddress::new(0xffff_8000_4000_0000),
            PhysicalAddress::new(0x4020_0000),
            Size1G::SIZE,
        );
        assert_eq!(g, Some(Granule::Size2M));
    }

    #[test]
    fn short_remainder_forces_pages() {
        let g = Granule::largest_fitting(
            VirtualAddress::new(0xffff_8000_0000_0000),
            PhysicalAddress::new(0),
            Size2M::SIZE - Size4K::SIZE,
        );
        assert_eq!(g, Some(Granule::Size4K));
        assert_eq!(
            Granule::largest_fitting(VirtualAddress::new(0), PhysicalAddress::new(0), 100),
            None
        );
    }
}
