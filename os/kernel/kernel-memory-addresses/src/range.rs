use crate::{PageSize, PhysicalAddress, Size4K};
use core::fmt;

/// A half-open physical interval `[start, end)`.
///
/// Used for DRAM banks reported by the board, reserved regions (kernel
/// image, boot allocator) and resource registrations.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalRange {
    start: PhysicalAddress,
    end: PhysicalAddress,
}

impl PhysicalRange {
    /// Creates `[start, end)`. An inverted range is clamped to empty.
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        if end.as_u64() < start.as_u64() {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_start_size(start: PhysicalAddress, size: u64) -> Self {
        Self::new(start, PhysicalAddress::new(start.as_u64().saturating_add(size)))
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end.as_u64()
    }

    /// Whether `other` lies entirely inside `self`.
    #[inline]
    #[must_use]
    pub const fn contains_range(&self, other: &Self) -> bool {
        other.start.as_u64() >= self.start.as_u64() && other.end.as_u64() <= self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.as_u64() < other.end.as_u64() && other.start.as_u64() < self.end.as_u64()
    }

    /// Shrinks the range to whole pages of size `S` (start up, end down).
    #[must_use]
    pub const fn page_inner<S: PageSize>(&self) -> Self {
        Self::new(self.start.align_up::<S>(), self.end.align_down::<S>())
    }

    /// Grows the range to whole pages of size `S` (start down, end up).
    #[must_use]
    pub const fn page_outer<S: PageSize>(&self) -> Self {
        Self::new(self.start.align_down::<S>(), self.end.align_up::<S>())
    }

    /// Number of whole 4 KiB pages in the range.
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.size() / Size4K::SIZE
    }
}

impl fmt::Debug for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA[{}..{})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> PhysicalRange {
        PhysicalRange::new(PhysicalAddress::new(start), PhysicalAddress::new(end))
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(range(0x2000, 0x1000).is_empty());
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(range(0x1000, 0x3000).overlaps(&range(0x2000, 0x4000)));
        assert!(!range(0x1000, 0x2000).overlaps(&range(0x2000, 0x3000)));
    }

    #[test]
    fn page_rounding() {
        let r = range(0x1800, 0x5800);
        assert_eq!(r.page_inner::<Size4K>(), range(0x2000, 0x5000));
        assert_eq!(r.page_outer::<Size4K>(), range(0x1000, 0x6000));
        assert_eq!(r.page_inner::<Size4K>().pages(), 3);
    }
}
