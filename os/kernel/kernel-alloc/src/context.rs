//! # Kernel memory context
//!
//! Owns every allocator of the memory core and brings them up in order:
//!
//! 1. build the kernel page tables (identity ranges and the linear map of
//!    DRAM) from boot memory and switch to them,
//! 2. carve the buddy metadata and the allocator itself from boot memory,
//! 3. start the buddy allocator on DRAM minus the kernel image and the
//!    consumed boot memory,
//! 4. start the bin and VM allocators on top of it.
//!
//! The context is created once and lives for the rest of the kernel; the
//! rest of the kernel borrows the allocators from it. The resource tree is
//! filled by a separate [`MemoryContext::register_resources`] call because
//! it lives on the heap, which only works once the kernel's global
//! allocator is routed to [`MemoryContext::heap`].

use crate::bootmem::BootBumpAlloc;
use crate::buddy::{BuddyAllocator, FreeLink};
use crate::resource::ResourceTree;
use crate::vm::{VmAllocator, VmZone};
use crate::{AllocError, BinAllocator, LinearMap};
use kernel_info::board::Board;
use kernel_memory_addresses::{PhysicalRange, Size4K, VirtualAddress};
use kernel_sync::SpinMutex;
use kernel_vmem::{MapAttributes, MemoryType, PageTableMapper, Permissions};
use log::{info, warn};

/// Identity mappings cover the code performing the table switch.
const IDENTITY: MapAttributes = MapAttributes::new(
    Permissions::kernel_rw().with_execute(true),
    MemoryType::Normal,
);

/// The kernel's memory subsystems after boot: frames, the byte heap, the
/// VM zone and the linear map.
pub struct MemoryContext<M: 'static> {
    pages: &'static BuddyAllocator,
    heap: BinAllocator<'static>,
    vm: VmAllocator<'static, M>,
    resources: SpinMutex<ResourceTree>,
    linear: LinearMap,
    kernel_image: PhysicalRange,
    boot_memory: PhysicalRange,
}

impl<M: PageTableMapper + 'static> MemoryContext<M> {
    /// Bring up the memory core.
    ///
    /// `kernel_image` is kept away from the page allocator, as is whatever
    /// `boot` hands out here. `mapper` starts empty; it is filled and
    /// activated before any allocator runs.
    ///
    /// # Errors
    /// Any [`AllocError`]; the caller decides whether boot can continue.
    ///
    /// # Safety
    /// - Memory from `boot` must be reachable through `linear` both before
    ///   and after the switch.
    /// - See [`PageTableMapper::activate`].
    pub unsafe fn init(
        board: &dyn Board,
        kernel_image: PhysicalRange,
        mut boot: BootBumpAlloc,
        linear: LinearMap,
        zone: VmZone,
        mut mapper: M,
    ) -> Result<Self, AllocError> {
        let dram = board.dram_ranges();

        for range in board.identity_map_ranges() {
            let range = range.page_outer::<Size4K>();
            let va = VirtualAddress::new(range.start().as_u64());
            mapper.map_range(range.start(), va, range.size(), IDENTITY, &mut boot)?;
        }
        for range in dram {
            let range = range.page_inner::<Size4K>();
            let va = linear.phys_to_virt(range.start());
            mapper.map_range(range.start(), va, range.size(), MapAttributes::kernel_data(), &mut boot)?;
        }
        // SAFETY: forwarded to the caller.
        unsafe { mapper.activate(&mut boot) };
        info!("memory: page tables active");

        let links = boot.alloc_table(BuddyAllocator::metadata_len(dram), FreeLink::EMPTY)?;
        let slot = boot.alloc_uninit::<BuddyAllocator>()?;
        let boot_memory = boot.finish();

        let reserved = [kernel_image, boot_memory];
        let pages: &'static BuddyAllocator = slot.write(BuddyAllocator::new(dram, &reserved, links)?);

        info!(
            "memory: {} of {} pages free",
            pages.free_pages(),
            pages.total_pages()
        );
        Ok(Self {
            pages,
            heap: BinAllocator::new(pages, linear),
            vm: VmAllocator::new(zone, pages, mapper),
            resources: SpinMutex::new(ResourceTree::new()),
            linear,
            kernel_image,
            boot_memory,
        })
    }

    /// Record DRAM as "System RAM" and nest the kernel image and the
    /// consumed boot memory under it.
    ///
    /// Allocates from the global heap. Ranges that cannot be registered are
    /// logged and skipped.
    pub fn register_resources(&self, board: &dyn Board) {
        let mut resources = self.resources.lock_irq();
        for range in board.dram_ranges() {
            let range = range.page_inner::<Size4K>();
            if let Err(e) = resources.request("System RAM", range.start(), range.size()) {
                warn!("memory: cannot register {range:?}: {e}");
            }
        }
        register_child(&mut resources, "Kernel Image", self.kernel_image);
        register_child(&mut resources, "Boot Memory", self.boot_memory);
    }

    #[must_use]
    pub const fn pages(&self) -> &'static BuddyAllocator {
        self.pages
    }

    #[must_use]
    pub const fn heap(&self) -> &BinAllocator<'static> {
        &self.heap
    }

    #[must_use]
    pub const fn vm(&self) -> &VmAllocator<'static, M> {
        &self.vm
    }

    /// What owns physical memory.
    #[must_use]
    pub const fn resources(&self) -> &SpinMutex<ResourceTree> {
        &self.resources
    }

    #[must_use]
    pub const fn linear(&self) -> LinearMap {
        self.linear
    }

    /// Boot memory consumed during [`init`](Self::init), page rounded.
    #[must_use]
    pub const fn boot_memory(&self) -> PhysicalRange {
        self.boot_memory
    }

    /// Log frame usage, heap bins, VM areas and the resource tree.
    pub fn log_state(&self) {
        self.pages.log_state();
        self.heap.log_state();
        self.vm.log_areas();
        self.resources.lock_irq().log_tree();
    }
}

/// Nest `range` under the top-level resource that contains it.
fn register_child(tree: &mut ResourceTree, name: &'static str, range: PhysicalRange) {
    let range = range.page_outer::<Size4K>();
    if range.is_empty() {
        return;
    }
    let parent = tree.roots().iter().copied().find(|&id| {
        tree.get(id)
            .is_some_and(|r| r.range().contains_range(&range))
    });
    let Some(parent) = parent else {
        warn!("memory: {name} {range:?} is outside DRAM");
        return;
    };
    if let Err(e) = tree.append_child(parent, name, range.start(), range.size()) {
        warn!("memory: cannot register {name} {range:?}: {e}");
    }
}
