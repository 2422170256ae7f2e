use crate::{Granule, MapAttributes};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::trace;

/// Source of **physical** 4 KiB frames for translation tables.
///
/// The implementation decides where frames come from (boot bump pool, the
/// buddy allocator, a test pool). Returned frames **must** be 4 KiB aligned.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame. Returns `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalAddress>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    ///
    /// Sources that never reclaim (bump allocators) may ignore this.
    fn free_4k(&mut self, _frame: PhysicalAddress) {}
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space (here: through the kernel linear map).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// The virtual address at which `pa` is visible.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.phys_to_virt(pa);
        unsafe { &mut *va.as_mut_ptr::<T>() }
    }
}

/// Errors reported by the page-table backend.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory for translation tables")]
    OutOfMemory,
    #[error("mapping {va} -> {pa} is not aligned to {granule}")]
    Misaligned {
        va: VirtualAddress,
        pa: PhysicalAddress,
        granule: Granule,
    },
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
}

/// The architecture page-table interface consumed by the memory core.
///
/// The backend owns the translation tables; the memory core only decides
/// *what* to map and at which granule. Intermediate tables are taken from
/// the `pages` source passed with each call.
pub trait PageTableMapper {
    /// Install leaf descriptors of `granule` mapping `[va, va + size)` to
    /// `[pa, pa + size)`.
    ///
    /// `va`, `pa` and `size` are multiples of `granule.size()`.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if an intermediate table can't be allocated.
    /// - [`MapError::Misaligned`] if an address is not granule aligned.
    /// - [`MapError::AlreadyMapped`] if a leaf already exists.
    fn map(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        size: u64,
        granule: Granule,
        attributes: MapAttributes,
        pages: &mut dyn FrameAlloc,
    ) -> Result<(), MapError>;

    /// Remove the leaf descriptors covering `[va, va + size)` and invalidate
    /// the corresponding TLB entries.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if part of the range has no leaf.
    fn unmap(&mut self, va: VirtualAddress, size: u64) -> Result<(), MapError>;

    /// Translate `va` if it is mapped. An unmapped address faults on access.
    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress>;

    /// Switch the CPU to these tables (`TTBR1_EL1`, plus `TTBR0_EL1` for the
    /// identity map while the switch is in flight).
    ///
    /// # Safety
    /// The running code, its stack and every live pointer must be mapped in
    /// the new tables.
    unsafe fn activate(&mut self, pages: &mut dyn FrameAlloc);

    /// Map `[va, va + len)` to `[pa, pa + len)` using as few descriptors as
    /// possible, following [`runs`].
    ///
    /// # Errors
    /// Propagates backend errors; returns [`MapError::Misaligned`] if the
    /// range is not 4 KiB aligned. Already installed parts are left mapped.
    fn map_range(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        len: u64,
        attributes: MapAttributes,
        pages: &mut dyn FrameAlloc,
    ) -> Result<(), MapError> {
        for run in runs(pa, va, len) {
            let run = run?;
            trace!("map {}..+{:#x} -> {} at {}", run.va, run.size, run.pa, run.granule);
            self.map(run.pa, run.va, run.size, run.granule, attributes, pages)?;
        }
        Ok(())
    }
}

/// A stretch of a mapping installed at a single granule.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Run {
    pub pa: PhysicalAddress,
    pub va: VirtualAddress,
    pub size: u64,
    pub granule: Granule,
}

/// Split `[va, va + len)` -> `[pa, pa + len)` into granule runs.
///
/// For each remaining sub-range the largest of 1 GiB / 2 MiB / 4 KiB is
/// picked such that both addresses are aligned to it and at least one whole
/// granule remains. That granule is used until the next coarser boundary
/// (shared by both sides) is reached or the remainder drops below one
/// granule.
///
/// Yields a single [`MapError::Misaligned`] and stops if the range is not
/// 4 KiB aligned.
pub fn runs(
    pa: PhysicalAddress,
    va: VirtualAddress,
    len: u64,
) -> impl Iterator<Item = Result<Run, MapError>> {
    let mut pa = pa;
    let mut va = va;
    let mut remaining = len;

    core::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let Some(granule) = Granule::largest_fitting(va, pa, remaining) else {
            remaining = 0;
            return Some(Err(MapError::Misaligned {
                va,
                pa,
                granule: Granule::Size4K,
            }));
        };

        let size = run_length(va, pa, remaining, granule);
        debug_assert!(size >= granule.size() && size.is_multiple_of(granule.size()));
        let run = Run { pa, va, size, granule };

        va += size;
        pa += size;
        remaining -= size;
        Some(Ok(run))
    })
}

/// Bytes to map at `granule` before a coarser granule becomes possible or the
/// remainder drops below one granule.
fn run_length(va: VirtualAddress, pa: PhysicalAddress, remaining: u64, granule: Granule) -> u64 {
    let size = granule.size();
    let whole = remaining - remaining % size;

    let coarser = Granule::DESCENDING
        .into_iter()
        .filter(|g| g.size() > size)
        .last();

    match coarser {
        // Only a coarser boundary shared by both sides can be exploited later.
        Some(c) if (va.as_u64() ^ pa.as_u64()) % c.size() == 0 => {
            let to_boundary = (c.size() - va.as_u64() % c.size()) % c.size();
            if to_boundary == 0 || to_boundary >= whole {
                whole
            } else {
                to_boundary
            }
        }
        _ => whole,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::{PageSize, Size2M, Size4K};
    use std::vec::Vec;

    /// Records every `map` call instead of writing descriptors.
    #[derive(Default)]
    struct CallLog {
        calls: Vec<(u64, u64, u64, Granule)>,
    }

    struct NoFrames;

    impl FrameAlloc for NoFrames {
        fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
            None
        }
    }

    impl PageTableMapper for CallLog {
        fn map(
            &mut self,
            pa: PhysicalAddress,
            va: VirtualAddress,
            size: u64,
            granule: Granule,
            _attributes: MapAttributes,
            _pages: &mut dyn FrameAlloc,
        ) -> Result<(), MapError> {
            self.calls.push((pa.as_u64(), va.as_u64(), size, granule));
            Ok(())
        }

        fn unmap(&mut self, _va: VirtualAddress, _size: u64) -> Result<(), MapError> {
            Ok(())
        }

        fn translate(&self, _va: VirtualAddress) -> Option<PhysicalAddress> {
            None
        }

        unsafe fn activate(&mut self, _pages: &mut dyn FrameAlloc) {}
    }

    #[test]
    fn small_misaligned_range_uses_pages_only() {
        let mut log = CallLog::default();
        log.map_range(
            PhysicalAddress::new(0x0900_1000),
            VirtualAddress::new(0xffff_8000_0000_1000),
            3 * Size4K::SIZE,
            MapAttributes::device(),
            &mut NoFrames,
        )
        .unwrap();
        assert_eq!(log.calls, vec![(0x0900_1000, 0xffff_8000_0000_1000, 0x3000, Granule::Size4K)]);
    }

    #[test]
    fn leading_pages_then_blocks_then_trailing_pages() {
        let mut log = CallLog::default();
        // Starts one page below a 2 MiB boundary and ends one page past the next.
        let pa = PhysicalAddress::new(0x4000_0000 + Size2M::SIZE - Size4K::SIZE);
        let va = VirtualAddress::new(0xffff_8000_0000_0000 + Size2M::SIZE - Size4K::SIZE);
        log.map_range(pa, va, Size2M::SIZE + 2 * Size4K::SIZE, MapAttributes::kernel_data(), &mut NoFrames)
            .unwrap();

        let granules: Vec<_> = log.calls.iter().map(|c| (c.2, c.3)).collect();
        assert_eq!(
            granules,
            vec![
                (Size4K::SIZE, Granule::Size4K),
                (Size2M::SIZE, Granule::Size2M),
                (Size4K::SIZE, Granule::Size4K),
            ]
        );
    }

    #[test]
    fn runs_cover_the_range_exactly() {
        let pa = PhysicalAddress::new(0x4000_0000 - Size4K::SIZE);
        let va = VirtualAddress::new(0xffff_8000_4000_0000 - Size4K::SIZE);
        let len = 2 * Size4K::SIZE + Size2M::SIZE * 3;
        let total: u64 = runs(pa, va, len).map(|r| r.unwrap().size).sum();
        assert_eq!(total, len);
    }

    #[test]
    fn unaligned_start_is_rejected() {
        let mut log = CallLog::default();
        let err = log
            .map_range(
                PhysicalAddress::new(0x10),
                VirtualAddress::new(0x10),
                Size4K::SIZE,
                MapAttributes::kernel_data(),
                &mut NoFrames,
            )
            .unwrap_err();
        assert!(matches!(err, MapError::Misaligned { .. }));
    }
}
