use crate::PageSize;
use core::fmt;
use core::ops::{Add, AddAssign};

/// Untyped 64-bit address shared by [`PhysicalAddress`](super::PhysicalAddress)
/// and [`VirtualAddress`](super::VirtualAddress).
///
/// All alignment arithmetic lives here. Alignments are powers of two, either
/// a [`PageSize`] marker or a runtime value such as a granule size.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddress(u64);

impl MemoryAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn align_down_to(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Round up to `align`; `None` if that passes the top of the address space.
    #[inline]
    #[must_use]
    pub const fn checked_align_up(self, align: u64) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        match self.0.checked_add(align - 1) {
            Some(v) => Some(Self(v & !(align - 1))),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        self.align_down_to(S::SIZE)
    }

    /// Wraps to zero above the last page of size `S`.
    #[inline]
    #[must_use]
    pub const fn align_up<S: PageSize>(self) -> Self {
        Self(self.0.wrapping_add(S::SIZE - 1) & !(S::SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn offset_in(self, align: u64) -> u64 {
        self.0 & (align - 1)
    }

    #[inline]
    #[must_use]
    pub const fn page_offset<S: PageSize>(self) -> u64 {
        self.offset_in(S::SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Bytes from `earlier` up to `self`, if `earlier` is not above it.
    #[inline]
    #[must_use]
    pub const fn checked_distance(self, earlier: Self) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl fmt::Debug for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({:#018x})", self.0)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for MemoryAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add<u64> for MemoryAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for MemoryAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Size2M, Size4K};

    #[test]
    fn runtime_and_marker_alignment_agree() {
        let a = MemoryAddress::new(0x4020_1234);
        assert_eq!(a.align_down::<Size4K>(), a.align_down_to(0x1000));
        assert_eq!(a.align_up::<Size2M>(), MemoryAddress::new(0x4040_0000));
        assert_eq!(a.checked_align_up(0x1000), Some(MemoryAddress::new(0x4020_2000)));
        assert_eq!(a.page_offset::<Size4K>(), 0x234);
    }

    #[test]
    fn checked_operations_stop_at_the_top() {
        let top = MemoryAddress::new(u64::MAX - 0xff);
        assert_eq!(top.checked_align_up(0x1000), None);
        assert_eq!(top.checked_add(0x100), None);
        assert_eq!(top.checked_distance(MemoryAddress::new(u64::MAX)), None);
        assert_eq!(MemoryAddress::new(0x3000).checked_distance(MemoryAddress::new(0x1000)), Some(0x2000));
    }
}
