//! Host stand-ins for DRAM and the page-table backend.

use crate::LinearMap;
use crate::buddy::FreeLink;
use kernel_memory_addresses::{PAGE_SIZE, PageSize, PhysicalAddress, PhysicalRange, Size2M, VirtualAddress};
use kernel_vmem::{FrameAlloc, Granule, MapAttributes, MapError, PageTableMapper};
use std::alloc::{Layout, alloc_zeroed};
use std::boxed::Box;
use std::collections::BTreeMap;
use std::vec;
use std::vec::Vec;

/// Physical address at which simulated DRAM starts.
pub const SIM_BASE: u64 = 0x4000_0000;

/// A leaked, 2 MiB aligned host buffer pretending to be DRAM at [`SIM_BASE`].
pub struct SimRam {
    pub range: PhysicalRange,
    pub linear: LinearMap,
}

impl SimRam {
    pub fn new(size: u64) -> Self {
        let layout = Layout::from_size_align(usize::try_from(size).unwrap(), Size2M::SIZE as usize).unwrap();
        let host = unsafe { alloc_zeroed(layout) };
        assert!(!host.is_null());
        Self {
            range: PhysicalRange::from_start_size(PhysicalAddress::new(SIM_BASE), size),
            linear: LinearMap::new((host as u64).wrapping_sub(SIM_BASE)),
        }
    }

    pub fn pa(&self, offset: u64) -> PhysicalAddress {
        self.range.start() + offset
    }
}

pub fn leak_links(len: usize) -> &'static mut [FreeLink] {
    Box::leak(vec![FreeLink::EMPTY; len].into_boxed_slice())
}

pub fn range(start: u64, size: u64) -> PhysicalRange {
    PhysicalRange::from_start_size(PhysicalAddress::new(start), size)
}

/// Records leaf mappings per 4 KiB page instead of writing descriptors.
#[derive(Default)]
pub struct RecordingMapper {
    pub leaves: BTreeMap<u64, (u64, MapAttributes)>,
    pub calls: Vec<(VirtualAddress, PhysicalAddress, u64, Granule)>,
    /// Fail every `map` once this many calls have succeeded.
    pub fail_after: Option<usize>,
    /// Take one frame from the page source per `map` call, like a real
    /// backend allocating a fresh table.
    pub take_table_frames: bool,
    pub table_frames: Vec<PhysicalAddress>,
    pub activated: bool,
}

impl RecordingMapper {
    pub fn granules(&self) -> Vec<Granule> {
        self.calls.iter().map(|c| c.3).collect()
    }
}

impl PageTableMapper for RecordingMapper {
    fn map(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        size: u64,
        granule: Granule,
        attributes: MapAttributes,
        pages: &mut dyn FrameAlloc,
    ) -> Result<(), MapError> {
        if self.fail_after.is_some_and(|n| self.calls.len() >= n) {
            return Err(MapError::OutOfMemory);
        }
        if !va.is_aligned_to(granule.size()) || !pa.is_aligned_to(granule.size()) {
            return Err(MapError::Misaligned { va, pa, granule });
        }
        if self.take_table_frames {
            let frame = pages.alloc_4k().ok_or(MapError::OutOfMemory)?;
            self.table_frames.push(frame);
        }
        for off in (0..size).step_by(PAGE_SIZE as usize) {
            let page = va.as_u64() + off;
            if self.leaves.contains_key(&page) {
                return Err(MapError::AlreadyMapped(VirtualAddress::new(page)));
            }
            self.leaves.insert(page, (pa.as_u64() + off, attributes));
        }
        self.calls.push((va, pa, size, granule));
        Ok(())
    }

    fn unmap(&mut self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        for off in (0..size).step_by(PAGE_SIZE as usize) {
            let page = va.as_u64() + off;
            if self.leaves.remove(&page).is_none() {
                return Err(MapError::NotMapped(VirtualAddress::new(page)));
            }
        }
        Ok(())
    }

    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let page = va.as_u64() & !(PAGE_SIZE - 1);
        self.leaves
            .get(&page)
            .map(|(pa, _)| PhysicalAddress::new(pa + (va.as_u64() - page)))
    }

    unsafe fn activate(&mut self, _pages: &mut dyn FrameAlloc) {
        self.activated = true;
    }
}

/// A buddy allocator managing all of `ram`.
pub fn sim_buddy(ram: &SimRam) -> &'static crate::BuddyAllocator {
    let available = [ram.range];
    let links = leak_links(crate::BuddyAllocator::metadata_len(&available));
    Box::leak(Box::new(crate::BuddyAllocator::new(&available, &[], links).unwrap()))
}
