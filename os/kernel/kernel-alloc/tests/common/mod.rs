#![allow(dead_code)]

use kernel_alloc::{BuddyAllocator, FreeLink, LinearMap};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalRange, VirtualAddress};
use kernel_vmem::{FrameAlloc, Granule, MapAttributes, MapError, PageTableMapper};
use std::alloc::{Layout, alloc_zeroed};
use std::collections::BTreeMap;

pub const RAM_BASE: u64 = 0x4000_0000;

/// Leaked, 2 MiB aligned host memory standing in for DRAM at `RAM_BASE`.
pub fn sim_ram(size: u64) -> (PhysicalRange, LinearMap) {
    let layout = Layout::from_size_align(size as usize, 2 << 20).unwrap();
    let host = unsafe { alloc_zeroed(layout) };
    assert!(!host.is_null());
    (
        PhysicalRange::from_start_size(PhysicalAddress::new(RAM_BASE), size),
        LinearMap::new((host as u64).wrapping_sub(RAM_BASE)),
    )
}

pub fn buddy(available: &[PhysicalRange], reserved: &[PhysicalRange]) -> &'static BuddyAllocator {
    let links = vec![FreeLink::EMPTY; BuddyAllocator::metadata_len(available)];
    let pages = BuddyAllocator::new(available, reserved, Box::leak(links.into_boxed_slice())).unwrap();
    Box::leak(Box::new(pages))
}

/// Page-table backend keeping one entry per mapped 4 KiB page.
#[derive(Default)]
pub struct PageMap {
    leaves: BTreeMap<u64, u64>,
}

impl PageTableMapper for PageMap {
    fn map(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        size: u64,
        _granule: Granule,
        _attributes: MapAttributes,
        _pages: &mut dyn FrameAlloc,
    ) -> Result<(), MapError> {
        for off in (0..size).step_by(PAGE_SIZE as usize) {
            if self.leaves.insert(va.as_u64() + off, pa.as_u64() + off).is_some() {
                return Err(MapError::AlreadyMapped(va + off));
            }
        }
        Ok(())
    }

    fn unmap(&mut self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        for off in (0..size).step_by(PAGE_SIZE as usize) {
            self.leaves
                .remove(&(va.as_u64() + off))
                .ok_or(MapError::NotMapped(va + off))?;
        }
        Ok(())
    }

    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let page = va.as_u64() & !(PAGE_SIZE - 1);
        self.leaves
            .get(&page)
            .map(|pa| PhysicalAddress::new(pa + va.as_u64() - page))
    }

    unsafe fn activate(&mut self, _pages: &mut dyn FrameAlloc) {}
}
