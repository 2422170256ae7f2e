//! # VM area allocator
//!
//! Hands out disjoint ranges of the kernel VM zone and backs them with
//! pages from the buddy allocator, mapped through the architecture's
//! [`PageTableMapper`]. Device windows are mapped with [`io_remap`]
//! (see [`io`] for convenience wrappers).
//!
//! ```text
//!  zone start                                               zone end
//!  |-[g|  area 0  ]-[  area 1  |g]--[ dev ]------------------------|
//!                                        ^ next reservation goes here
//! ```
//!
//! Placement is a bump pointer over an address-ordered map: a new area
//! starts at the end of the highest existing area, rounded up to the
//! requested alignment. Holes left by freed areas are not reused.
//!
//! ## Locking
//!
//! Backing pages are allocated before the VM lock is taken and released
//! after it is dropped. The page-table backend may still pull table frames
//! from the buddy allocator while the VM lock is held, so the lock order is
//! VM, then buddy; the buddy allocator never calls back up.
//!
//! [`io_remap`]: VmAllocator::io_remap

mod area;
pub mod io;

pub use area::{AreaKind, AreaMapping, GuardPlacement, MappingState, VmArea};

use crate::resource::{ResourceId, ResourceTree};
use crate::{AllocError, BuddyAllocator, ByteAllocator};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use area::guard_bytes;
use core::ptr::NonNull;
use kernel_info::memory::{PAGE_SIZE, VM_ZONE_END, VM_ZONE_START};
use kernel_memory_addresses::{PhysicalAddress, PhysicalRange, Size4K, VirtualAddress};
use kernel_sync::SpinMutex;
use kernel_vmem::{Granule, MapAttributes, PageTableMapper, runs};
use log::{debug, info, trace, warn};

/// The virtual window the allocator manages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VmZone {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl VmZone {
    /// # Errors
    /// [`AllocError::InvalidArgument`] unless `start < end` and both are
    /// page aligned.
    pub fn new(start: VirtualAddress, end: VirtualAddress) -> Result<Self, AllocError> {
        if start >= end || !start.is_aligned_to(PAGE_SIZE) || !end.is_aligned_to(PAGE_SIZE) {
            return Err(AllocError::InvalidArgument);
        }
        Ok(Self { start, end })
    }

    /// The kernel's VM zone from the memory layout.
    #[must_use]
    pub const fn kernel() -> Self {
        Self {
            start: VirtualAddress::new(VM_ZONE_START),
            end: VirtualAddress::new(VM_ZONE_END),
        }
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }
}

/// Handle to a reserved area: its start address.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VmAreaHandle(VirtualAddress);

impl VmAreaHandle {
    #[must_use]
    pub const fn start(self) -> VirtualAddress {
        self.0
    }
}

/// Kernel virtual areas carved from a [`VmZone`], backed by buddy frames
/// and mapped through `M`.
///
/// Reservations are bump-allocated and never reuse freed ranges.
pub struct VmAllocator<'a, M> {
    pages: &'a BuddyAllocator,
    state: SpinMutex<VmState<M>>,
}

struct VmState<M> {
    zone: VmZone,
    areas: BTreeMap<VirtualAddress, VmArea>,
    mapper: M,
    resources: ResourceTree,
}

impl<'a, M: PageTableMapper> VmAllocator<'a, M> {
    /// An empty zone. `mapper` must already be the active address space, or
    /// become it before any area is touched.
    pub fn new(zone: VmZone, pages: &'a BuddyAllocator, mapper: M) -> Self {
        info!("vm: zone {}..{}", zone.start, zone.end);
        Self {
            pages,
            state: SpinMutex::new(VmState {
                zone,
                areas: BTreeMap::new(),
                mapper,
                resources: ResourceTree::new(),
            }),
        }
    }

    /// Reserve `size` bytes (rounded up to pages) plus an optional guard page.
    ///
    /// The area's start is aligned to `align` (at least one page); with
    /// [`GuardPlacement::Before`] the usable range begins one page later.
    /// Nothing is mapped yet.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for a zero size or an alignment that
    ///   is not a power of two.
    /// - [`AllocError::OutOfVirtualMemory`] if the area would run past the
    ///   end of the zone.
    pub fn reserve(&self, size: u64, align: u64, guard: GuardPlacement) -> Result<VmAreaHandle, AllocError> {
        let start = self
            .state
            .lock_irq()
            .reserve(size, align, guard, AreaKind::Anonymous)?;
        Ok(VmAreaHandle(start))
    }

    /// Back the usable range of an area with fresh pages.
    ///
    /// Mapping an already mapped area does nothing. If the backend fails,
    /// everything installed so far is unmapped and the pages are returned.
    ///
    /// # Errors
    /// - [`AllocError::NotFound`] if the area does not exist (anymore).
    /// - [`AllocError::OutOfMemory`] if the buddy allocator runs dry.
    /// - [`AllocError::Map`] if the backend fails.
    pub fn map_physical(&self, handle: VmAreaHandle) -> Result<(), AllocError> {
        let pages = {
            let state = self.state.lock_irq();
            let area = state.areas.get(&handle.0).ok_or(AllocError::NotFound)?;
            if area.state == MappingState::Mapped {
                return Ok(());
            }
            area.usable_len() / PAGE_SIZE
        };

        let mut frames = Vec::with_capacity(pages as usize);
        for _ in 0..pages {
            match self.pages.allocate(1) {
                Ok(block) => frames.push(block.start()),
                Err(e) => {
                    self.release(&frames);
                    return Err(e);
                }
            }
        }

        let result = self.state.lock_irq().map_frames(handle.0, &frames, self.pages);
        match result {
            Ok(true) => {
                debug!("vm: mapped {pages} pages at {}", handle.0);
                Ok(())
            }
            Ok(false) => {
                trace!("vm: {} was mapped concurrently", handle.0);
                self.release(&frames);
                Ok(())
            }
            Err(e) => {
                warn!("vm: mapping {} failed: {e}", handle.0);
                self.release(&frames);
                Err(e)
            }
        }
    }

    /// The first `size` bytes of an area's usable range.
    ///
    /// Only dereference the slice while the area stays mapped.
    ///
    /// # Errors
    /// - [`AllocError::NotFound`] if the area does not exist.
    /// - [`AllocError::InvalidArgument`] if the area is not mapped or
    ///   `size` exceeds its usable length.
    pub fn usable_slice(&self, handle: VmAreaHandle, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        let state = self.state.lock_irq();
        let area = state.areas.get(&handle.0).ok_or(AllocError::NotFound)?;
        if area.state != MappingState::Mapped || size as u64 > area.usable_len() {
            return Err(AllocError::InvalidArgument);
        }
        let ptr = NonNull::new(area.usable_start().as_mut_ptr::<u8>()).ok_or(AllocError::InvalidArgument)?;
        Ok(NonNull::slice_from_raw_parts(ptr, size))
    }

    /// Unmap and remove an area, returning its pages to the buddy allocator.
    ///
    /// # Errors
    /// See [`free_at`](Self::free_at).
    pub fn free(&self, handle: VmAreaHandle) -> Result<(), AllocError> {
        self.free_at(handle.0)
    }

    /// Free the area containing `addr` (guard page included).
    ///
    /// The area is removed even if the backend reports an unmap error; the
    /// first such error is returned.
    ///
    /// # Errors
    /// - [`AllocError::NotFound`] if no area contains `addr`.
    /// - [`AllocError::Map`] if unmapping failed.
    pub fn free_at(&self, addr: VirtualAddress) -> Result<(), AllocError> {
        let (area, result) = self.state.lock_irq().remove(addr)?;
        let mut returned = 0;
        for m in area.mappings.iter().filter(|m| m.owned) {
            self.pages.free(PhysicalRange::from_start_size(m.pa, m.size));
            returned += 1;
        }
        debug!("vm: freed {}..{} ({returned} pages returned)", area.start(), area.end());
        result
    }

    /// Map the physical window `[pa, pa + size)` as device memory.
    ///
    /// The window is widened to whole pages and placed in a fresh area
    /// aligned to the largest granule the physical start allows, so that
    /// 2 MiB and 1 GiB blocks can be used. Returns the virtual address of
    /// `pa` itself.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for a zero size or a window past the
    ///   end of the address space.
    /// - [`AllocError::OutOfVirtualMemory`] if the zone is full.
    /// - [`AllocError::Map`] if the backend fails; nothing stays mapped.
    pub fn io_remap(&self, pa: PhysicalAddress, size: u64) -> Result<VirtualAddress, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidArgument);
        }
        let end = pa.checked_add(size).ok_or(AllocError::InvalidArgument)?;
        let window = PhysicalRange::new(pa, end).page_outer::<Size4K>();
        let base = window.start();
        let align = Granule::DESCENDING
            .into_iter()
            .map(Granule::size)
            .find(|&g| base.is_aligned_to(g) && window.size() >= g)
            .unwrap_or(PAGE_SIZE);

        let va = self
            .state
            .lock_irq()
            .map_device(base, window.size(), align, self.pages)?;
        debug!("vm: io_remap {window:?} at {va}");
        Ok(va + pa.page_offset::<Size4K>())
    }

    /// Record a physical range in the allocator's resource tree without
    /// mapping it.
    ///
    /// # Errors
    /// As [`ResourceTree::request`].
    pub fn reserve_resource(
        &self,
        name: &'static str,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<ResourceId, AllocError> {
        self.state.lock_irq().resources.request(name, pa, size)
    }

    /// Snapshot of the area containing `addr`.
    #[must_use]
    pub fn find(&self, addr: VirtualAddress) -> Option<VmArea> {
        let state = self.state.lock_irq();
        state.containing(addr).and_then(|start| state.areas.get(&start).cloned())
    }

    /// Call `f` for every area in address order.
    ///
    /// The lock is held throughout; `f` must not call back into the allocator.
    pub fn for_each_area(&self, mut f: impl FnMut(&VmArea)) {
        for area in self.state.lock_irq().areas.values() {
            f(area);
        }
    }

    /// Where `va` currently translates to, per the backend.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.state.lock_irq().mapper.translate(va)
    }

    /// Run `f` against the page-table backend.
    pub fn with_mapper<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.state.lock_irq().mapper)
    }

    /// Run `f` against the device resource tree.
    pub fn with_resources<R>(&self, f: impl FnOnce(&ResourceTree) -> R) -> R {
        f(&self.state.lock_irq().resources)
    }

    /// Dump all areas at `debug` level.
    pub fn log_areas(&self) {
        let state = self.state.lock_irq();
        debug!("vm: {} areas in {}..{}", state.areas.len(), state.zone.start, state.zone.end);
        for area in state.areas.values() {
            debug!(
                "vm:   {}..{} {:?} {:?} guard={:?} {} mappings",
                area.start(),
                area.end(),
                area.kind(),
                area.state(),
                area.guard(),
                area.mappings().len()
            );
        }
        state.resources.log_tree();
    }

    fn release(&self, frames: &[PhysicalAddress]) {
        for &pa in frames {
            self.pages.free(PhysicalRange::from_start_size(pa, PAGE_SIZE));
        }
    }
}

impl<M: PageTableMapper> VmState<M> {
    fn reserve(
        &mut self,
        size: u64,
        align: u64,
        guard: GuardPlacement,
        kind: AreaKind,
    ) -> Result<VirtualAddress, AllocError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(AllocError::InvalidArgument);
        }
        let usable = size
            .checked_next_multiple_of(PAGE_SIZE)
            .ok_or(AllocError::OutOfVirtualMemory)?;
        let align = align.max(PAGE_SIZE);

        let floor = self
            .areas
            .last_key_value()
            .map_or(self.zone.start, |(_, area)| area.end());
        let start = floor.checked_align_up(align).ok_or(AllocError::OutOfVirtualMemory)?;
        let end = usable
            .checked_add(guard_bytes(guard))
            .and_then(|total| start.checked_add(total))
            .ok_or(AllocError::OutOfVirtualMemory)?;
        if end > self.zone.end {
            warn!("vm: zone exhausted reserving {size:#x} bytes");
            return Err(AllocError::OutOfVirtualMemory);
        }

        self.areas.insert(start, VmArea::new(start, usable, guard, kind));
        trace!("vm: reserved {start}..+{usable:#x} guard={guard:?}");
        Ok(start)
    }

    /// Key of the area containing `addr`.
    fn containing(&self, addr: VirtualAddress) -> Option<VirtualAddress> {
        self.areas
            .range(..=addr)
            .next_back()
            .filter(|(_, area)| area.contains(addr))
            .map(|(&start, _)| start)
    }

    /// Map `frames` page by page over the usable range of the area at
    /// `start`, undoing everything on failure.
    ///
    /// Returns `false` without touching `frames` when the area is already
    /// mapped.
    fn map_frames(
        &mut self,
        start: VirtualAddress,
        frames: &[PhysicalAddress],
        pages: &BuddyAllocator,
    ) -> Result<bool, AllocError> {
        let area = self.areas.get_mut(&start).ok_or(AllocError::NotFound)?;
        if area.state == MappingState::Mapped {
            return Ok(false);
        }

        let mut tables = pages;
        let mut va = area.usable_start();
        for &pa in frames {
            let mapped = self.mapper.map(
                pa,
                va,
                PAGE_SIZE,
                Granule::Size4K,
                MapAttributes::kernel_data(),
                &mut tables,
            );
            if let Err(e) = mapped {
                unmap_all(&mut self.mapper, &mut area.mappings);
                return Err(e.into());
            }
            area.mappings.push(AreaMapping {
                va,
                pa,
                size: PAGE_SIZE,
                owned: true,
            });
            va += PAGE_SIZE;
        }
        area.state = MappingState::Mapped;
        Ok(true)
    }

    /// Reserve a device area for `[base, base + len)` and map it.
    fn map_device(
        &mut self,
        base: PhysicalAddress,
        len: u64,
        align: u64,
        pages: &BuddyAllocator,
    ) -> Result<VirtualAddress, AllocError> {
        let start = self.reserve(len, align, GuardPlacement::None, AreaKind::Device)?;
        let Some(area) = self.areas.get_mut(&start) else {
            return Err(AllocError::NotFound);
        };

        let mut tables = pages;
        for run in runs(base, start, len) {
            let mapped = run.map_err(AllocError::from).and_then(|run| {
                self.mapper
                    .map(run.pa, run.va, run.size, run.granule, MapAttributes::device(), &mut tables)?;
                Ok(run)
            });
            match mapped {
                Ok(run) => area.mappings.push(AreaMapping {
                    va: run.va,
                    pa: run.pa,
                    size: run.size,
                    owned: false,
                }),
                Err(e) => {
                    unmap_all(&mut self.mapper, &mut area.mappings);
                    self.areas.remove(&start);
                    return Err(e);
                }
            }
        }
        area.state = MappingState::Mapped;
        Ok(start)
    }

    /// Detach the area containing `addr` and unmap it.
    fn remove(&mut self, addr: VirtualAddress) -> Result<(VmArea, Result<(), AllocError>), AllocError> {
        let start = self.containing(addr).ok_or(AllocError::NotFound)?;
        let area = self.areas.remove(&start).ok_or(AllocError::NotFound)?;

        let mut result = Ok(());
        for m in &area.mappings {
            if let Err(e) = self.mapper.unmap(m.va, m.size) {
                warn!("vm: unmapping {}..+{:#x} failed: {e}", m.va, m.size);
                result = result.and(Err(e.into()));
            }
        }
        Ok((area, result))
    }
}

fn unmap_all<M: PageTableMapper>(mapper: &mut M, mappings: &mut Vec<AreaMapping>) {
    for m in mappings.drain(..) {
        if let Err(e) = mapper.unmap(m.va, m.size) {
            warn!("vm: rollback of {} failed: {e}", m.va);
        }
    }
}

/// Page-granular allocations in their own guarded areas.
impl<M: PageTableMapper> ByteAllocator for VmAllocator<'_, M> {
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let handle = self.reserve(size as u64, align as u64, GuardPlacement::After)?;
        if let Err(e) = self.map_physical(handle) {
            if let Err(undo) = self.free(handle) {
                warn!("vm: dropping {} after a failed map: {undo}", handle.0);
            }
            return Err(e);
        }
        self.usable_slice(handle, size).map(NonNull::cast)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _size: usize, _align: usize) {
        if let Err(e) = self.free_at(VirtualAddress::from_nonnull(ptr)) {
            warn!("vm: free of {ptr:p} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingMapper, SimRam, sim_buddy};
    use kernel_memory_addresses::{PageSize, Size2M};
    use kernel_vmem::MemoryType;

    const ZONE: u64 = 0xffff_8000_0000_0000;

    fn vm_with(zone_size: u64) -> (VmAllocator<'static, RecordingMapper>, &'static BuddyAllocator) {
        let ram = SimRam::new(0x40_0000);
        let pages = sim_buddy(&ram);
        let zone = VmZone::new(VirtualAddress::new(ZONE), VirtualAddress::new(ZONE + zone_size)).unwrap();
        (VmAllocator::new(zone, pages, RecordingMapper::default()), pages)
    }

    fn vm() -> (VmAllocator<'static, RecordingMapper>, &'static BuddyAllocator) {
        vm_with(1 << 30)
    }

    fn bounds(vm: &VmAllocator<'_, RecordingMapper>) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        vm.for_each_area(|a| out.push((a.start().as_u64(), a.end().as_u64())));
        out
    }

    #[test]
    fn reservations_are_bumped_and_aligned() {
        let (vm, _) = vm();
        let a = vm.reserve(0x1800, 1, GuardPlacement::After).unwrap();
        let b = vm.reserve(0x1000, 0x1_0000, GuardPlacement::None).unwrap();
        let c = vm.reserve(0x1000, 1, GuardPlacement::Before).unwrap();
        assert_eq!(a.start().as_u64(), ZONE);
        assert_eq!(b.start().as_u64(), ZONE + 0x1_0000);
        assert_eq!(c.start().as_u64(), ZONE + 0x1_1000);
        assert_eq!(
            bounds(&vm),
            [
                (ZONE, ZONE + 0x3000),
                (ZONE + 0x1_0000, ZONE + 0x1_1000),
                (ZONE + 0x1_1000, ZONE + 0x1_3000)
            ]
        );
    }

    #[test]
    fn freed_holes_are_not_reused() {
        let (vm, _) = vm();
        let a = vm.reserve(0x1000, 1, GuardPlacement::None).unwrap();
        let b = vm.reserve(0x1000, 1, GuardPlacement::None).unwrap();
        vm.free(a).unwrap();
        let c = vm.reserve(0x1000, 1, GuardPlacement::None).unwrap();
        assert!(c.start() > b.start());
    }

    #[test]
    fn guard_page_stays_unmapped() {
        let (vm, pages) = vm();
        let h = vm.reserve(0x2000, 1, GuardPlacement::Before).unwrap();
        vm.map_physical(h).unwrap();

        let slice = vm.usable_slice(h, 0x2000).unwrap();
        let usable = VirtualAddress::from_nonnull(slice);
        assert_eq!(usable, h.start() + PAGE_SIZE);
        assert_eq!(slice.len(), 0x2000);
        assert!(vm.translate(usable).is_some());
        assert!(vm.translate(usable + 0x1fff).is_some());
        assert_eq!(vm.translate(h.start()), None);
        assert_eq!(pages.used_pages(), 2);
        assert_eq!(vm.find(usable).unwrap().state(), MappingState::Mapped);
    }

    #[test]
    fn racing_maps_of_one_area_both_succeed() {
        let (vm, pages) = vm();
        for _ in 0..50 {
            let h = vm.reserve(0x3000, 1, GuardPlacement::After).unwrap();
            std::thread::scope(|s| {
                let a = s.spawn(|| vm.map_physical(h));
                let b = s.spawn(|| vm.map_physical(h));
                assert_eq!(a.join().unwrap(), Ok(()));
                assert_eq!(b.join().unwrap(), Ok(()));
            });
            assert_eq!(pages.used_pages(), 3);
            assert_eq!(vm.find(h.start()).unwrap().state(), MappingState::Mapped);
            vm.free(h).unwrap();
            assert_eq!(pages.used_pages(), 0);
        }
    }

    #[test]
    fn mapping_twice_is_a_no_op() {
        let (vm, pages) = vm();
        let h = vm.reserve(0x3000, 1, GuardPlacement::After).unwrap();
        vm.map_physical(h).unwrap();
        vm.map_physical(h).unwrap();
        assert_eq!(pages.used_pages(), 3);
        assert!(vm.with_mapper(|m| m.granules().iter().all(|&g| g == Granule::Size4K)));
    }

    #[test]
    fn free_unmaps_and_returns_pages() {
        let (vm, pages) = vm();
        let h = vm.reserve(0x4000, 1, GuardPlacement::After).unwrap();
        vm.map_physical(h).unwrap();
        assert_eq!(pages.used_pages(), 4);

        // Any address inside the area identifies it, the guard page included.
        vm.free_at(h.start() + 0x4800).unwrap();
        assert_eq!(pages.used_pages(), 0);
        assert_eq!(vm.translate(h.start()), None);
        assert!(vm.find(h.start()).is_none());
        assert_eq!(vm.free(h), Err(AllocError::NotFound));
    }

    #[test]
    fn failed_mapping_is_rolled_back() {
        let (vm, pages) = vm();
        vm.with_mapper(|m| m.fail_after = Some(2));
        let h = vm.reserve(0x4000, 1, GuardPlacement::None).unwrap();
        assert!(matches!(vm.map_physical(h), Err(AllocError::Map(_))));
        assert_eq!(pages.used_pages(), 0);
        assert!(vm.with_mapper(|m| m.leaves.is_empty()));
        assert_eq!(vm.find(h.start()).unwrap().state(), MappingState::NotMapped);
        assert_eq!(vm.usable_slice(h, 1), Err(AllocError::InvalidArgument));
    }

    #[test]
    fn out_of_physical_memory_returns_partial_frames() {
        let (vm, pages) = vm();
        let total = pages.total_pages() as u64;
        let h = vm.reserve((total + 1) * PAGE_SIZE, 1, GuardPlacement::None).unwrap();
        assert_eq!(vm.map_physical(h), Err(AllocError::OutOfMemory));
        assert_eq!(pages.used_pages(), 0);
    }

    #[test]
    fn zone_exhaustion_and_bad_arguments() {
        let (vm, _) = vm_with(0x4000);
        assert_eq!(vm.reserve(0, 1, GuardPlacement::None), Err(AllocError::InvalidArgument));
        assert_eq!(vm.reserve(0x1000, 3, GuardPlacement::None), Err(AllocError::InvalidArgument));
        vm.reserve(0x3000, 1, GuardPlacement::None).unwrap();
        assert_eq!(
            vm.reserve(0x1000, 1, GuardPlacement::After),
            Err(AllocError::OutOfVirtualMemory)
        );
        vm.reserve(0x1000, 1, GuardPlacement::None).unwrap();
    }

    #[test]
    fn io_remap_keeps_the_page_offset() {
        let (vm, pages) = vm();
        let va = vm.io_remap(PhysicalAddress::new(0x0900_0010), 0x20).unwrap();
        assert_eq!(va.page_offset::<Size4K>(), 0x10);
        assert_eq!(vm.translate(va), Some(PhysicalAddress::new(0x0900_0010)));

        let area = vm.find(va).unwrap();
        assert_eq!(area.kind(), AreaKind::Device);
        assert_eq!(area.usable_len(), PAGE_SIZE);
        let attributes = vm.with_mapper(|m| m.leaves[&area.start().as_u64()].1);
        assert_eq!(attributes.memory_type, MemoryType::Device);

        // Device pages are not returned to the page allocator.
        vm.free_at(va).unwrap();
        assert_eq!(pages.used_pages(), 0);
        assert_eq!(vm.translate(va), None);
    }

    #[test]
    fn io_remap_uses_blocks_when_aligned() {
        let (vm, _) = vm();
        vm.reserve(0x1000, 1, GuardPlacement::None).unwrap();
        let va = vm.io_remap(PhysicalAddress::new(0x4000_0000), 2 * Size2M::SIZE).unwrap();
        assert!(va.is_aligned::<Size2M>());
        assert_eq!(vm.with_mapper(|m| m.granules()), [Granule::Size2M]);
    }

    #[test]
    fn io_remap_failure_leaves_nothing_behind() {
        let (vm, _) = vm();
        vm.with_mapper(|m| m.fail_after = Some(0));
        assert!(vm.io_remap(PhysicalAddress::new(0x0900_0000), 0x1000).is_err());
        assert!(bounds(&vm).is_empty());
    }

    #[test]
    fn device_resources_are_recorded() {
        let (vm, _) = vm();
        let uart = vm.reserve_resource("uart", PhysicalAddress::new(0x0900_0000), 0x1000).unwrap();
        assert_eq!(
            vm.reserve_resource("uart again", PhysicalAddress::new(0x0900_0000), 0x1000),
            Err(AllocError::NotAvailable)
        );
        let found = vm.with_resources(|tree| tree.find(PhysicalAddress::new(0x0900_0800)));
        assert_eq!(found, Some(uart));
    }

    #[test]
    fn byte_allocator_interface() {
        let (vm, pages) = vm();
        let p = ByteAllocator::allocate(&vm, 5000, 8).unwrap();
        assert_eq!(pages.used_pages(), 2);
        let area = vm.find(VirtualAddress::from_nonnull(p)).unwrap();
        assert_eq!(area.guard(), GuardPlacement::After);
        unsafe { ByteAllocator::free(&vm, p, 5000, 8) };
        assert_eq!(pages.used_pages(), 0);
    }

    #[test]
    fn byte_allocation_drops_its_area_when_mapping_fails() {
        let (vm, pages) = vm();
        vm.with_mapper(|m| m.fail_after = Some(1));
        let err = ByteAllocator::allocate(&vm, 0x3000, 8).unwrap_err();
        assert!(matches!(err, AllocError::Map(_)));
        assert_eq!(pages.used_pages(), 0);
        assert!(bounds(&vm).is_empty());
    }
}
