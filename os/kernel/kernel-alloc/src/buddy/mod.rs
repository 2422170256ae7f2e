//! # Buddy page allocator
//!
//! Physical memory is handed out in blocks of `2^order` contiguous 4 KiB
//! frames, `order` in `0..=MAX_ORDER` (4 KiB to 2 MiB). Every block is
//! aligned to its own size, so the buddy of a block is found by flipping a
//! single address bit.
//!
//! ```text
//!  order 2  [ 0 1 2 3 ]               [ 8 9 a b ]
//!  order 1              [ 4 5 ]
//!  order 0                      [ 6 ]
//!                              ^ frame 7 allocated
//! ```
//!
//! Free blocks of each order sit on a list sorted by address. A request is
//! served from the smallest order that fits, splitting one larger block
//! on the way down when that list is empty. Frees put the block back and, once the
//! list holds at least [`MERGE_THRESHOLD`] blocks, merge it with its buddy
//! if the buddy is also free, repeating one order up.
//!
//! ## Metadata
//!
//! The lists are threaded through a link table with one [`FreeLink`] per
//! frame of the managed span (see [`BuddyAllocator::metadata_len`]). The table
//! is carved from boot memory before the allocator exists; nothing is
//! stored inside the free pages themselves.

mod free_list;

pub use free_list::FreeLink;

use crate::{AllocError, PageAllocator};
use free_list::FreeList;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalRange, Size4K};
use kernel_sync::SpinMutex;
use kernel_vmem::FrameAlloc;
use log::{debug, info, trace, warn};

/// Largest block order (2 MiB blocks).
pub const MAX_ORDER: usize = 9;

/// Number of block orders.
pub const ORDER_COUNT: usize = MAX_ORDER + 1;

/// Number of frames in the largest block.
pub const MAX_BLOCK_PAGES: usize = 1 << MAX_ORDER;

/// Free-list length from which a free attempts to merge with its buddy.
pub const MERGE_THRESHOLD: usize = 2;

/// Upper bound on the managed span in frames. Keeps `index + block` below
/// the list sentinel.
const MAX_SPAN_PAGES: u64 = (u32::MAX >> 1) as u64;

/// Smallest order whose blocks hold `pages` frames, or `None` if `pages` is
/// zero or exceeds [`MAX_BLOCK_PAGES`].
///
/// ```rust
/// # use kernel_alloc::buddy::order_for_pages;
/// assert_eq!(order_for_pages(1), Some(0));
/// assert_eq!(order_for_pages(3), Some(2));
/// assert_eq!(order_for_pages(512), Some(9));
/// assert_eq!(order_for_pages(513), None);
/// ```
#[must_use]
pub const fn order_for_pages(pages: usize) -> Option<usize> {
    if pages == 0 || pages > MAX_BLOCK_PAGES {
        None
    } else {
        Some(pages.next_power_of_two().trailing_zeros() as usize)
    }
}

#[inline]
const fn block_bytes(order: usize) -> u64 {
    PAGE_SIZE << order
}

/// Physical page allocator.
///
/// All state sits behind one IRQ-masking spin lock.
pub struct BuddyAllocator {
    arena: SpinMutex<Arena>,
}

struct Arena {
    /// First frame of the managed span; link slot 0.
    base: PhysicalAddress,
    span_pages: u64,
    links: &'static mut [FreeLink],
    free: [FreeList; ORDER_COUNT],
    in_use: [usize; ORDER_COUNT],
    total_pages: usize,
}

impl BuddyAllocator {
    /// Number of [`FreeLink`] slots needed to manage `available`.
    #[must_use]
    pub fn metadata_len(available: &[PhysicalRange]) -> usize {
        span_of(available).map_or(0, |span| span.pages() as usize)
    }

    /// Build the allocator over `available` minus `reserved`.
    ///
    /// Available ranges are shrunk to whole pages; reserved ranges are grown
    /// to whole pages. Both may be unsorted and reserved ranges may overlap.
    /// Each remaining run is split greedily into the largest blocks its
    /// alignment and length allow.
    ///
    /// # Errors
    /// [`AllocError::InvalidArgument`] if there is no usable page, the span
    /// is too large, or `links` is shorter than
    /// [`metadata_len`](Self::metadata_len).
    pub fn new(
        available: &[PhysicalRange],
        reserved: &[PhysicalRange],
        links: &'static mut [FreeLink],
    ) -> Result<Self, AllocError> {
        let span = span_of(available).ok_or(AllocError::InvalidArgument)?;
        if span.pages() > MAX_SPAN_PAGES || (links.len() as u64) < span.pages() {
            warn!(
                "buddy: span {span:?} needs {} link slots, got {}",
                span.pages(),
                links.len()
            );
            return Err(AllocError::InvalidArgument);
        }

        let mut arena = Arena {
            base: span.start(),
            span_pages: span.pages(),
            links,
            free: [const { FreeList::new() }; ORDER_COUNT],
            in_use: [0; ORDER_COUNT],
            total_pages: 0,
        };
        for range in available {
            arena.add_range(range.page_inner::<Size4K>(), reserved);
        }

        info!(
            "buddy: managing {} free pages in {span:?}",
            arena.total_pages
        );
        Ok(Self {
            arena: SpinMutex::new(arena),
        })
    }

    /// Allocate a block of at least `pages` frames.
    ///
    /// The returned range spans the whole `2^order` block and is aligned to
    /// its size.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] if `pages` is zero.
    /// - [`AllocError::OutOfMemory`] if `pages` exceeds [`MAX_BLOCK_PAGES`]
    ///   or no block of a sufficient order is free.
    pub fn allocate(&self, pages: usize) -> Result<PhysicalRange, AllocError> {
        if pages == 0 {
            return Err(AllocError::InvalidArgument);
        }
        let order = order_for_pages(pages).ok_or(AllocError::OutOfMemory)?;
        let pa = self.arena.lock_irq().allocate(order)?;
        trace!("buddy: allocated {pa} order {order}");
        Ok(PhysicalRange::from_start_size(pa, block_bytes(order)))
    }

    /// Return a block from [`allocate`](Self::allocate).
    ///
    /// `block.pages()` may be the requested count or the full block size;
    /// both round to the same order. Blocks that are misaligned or outside
    /// the managed span trip a debug assertion and are otherwise dropped.
    pub fn free(&self, block: PhysicalRange) {
        let mut arena = self.arena.lock_irq();
        let order = order_for_pages(block.pages() as usize);
        let valid = order.is_some_and(|order| arena.owns(block.start(), order));
        debug_assert!(valid, "buddy: bad free of {block:?}");
        match order {
            Some(order) if valid => arena.free(block.start(), order),
            _ => warn!("buddy: ignoring bad free of {block:?}"),
        }
    }

    /// Free blocks on the list of `order`.
    #[must_use]
    pub fn free_count(&self, order: usize) -> usize {
        self.arena.lock_irq().free[order].len()
    }

    /// Blocks of `order` currently handed out.
    #[must_use]
    pub fn inuse_count(&self, order: usize) -> usize {
        self.arena.lock_irq().in_use[order]
    }

    /// Frames the allocator was initialized with (after reservations).
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.arena.lock_irq().total_pages
    }

    /// Frames currently on the free lists.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        let arena = self.arena.lock_irq();
        (0..ORDER_COUNT).map(|k| arena.free[k].len() << k).sum()
    }

    /// Frames currently handed out.
    #[must_use]
    pub fn used_pages(&self) -> usize {
        let arena = self.arena.lock_irq();
        (0..ORDER_COUNT).map(|k| arena.in_use[k] << k).sum()
    }

    /// Call `f` with the start of every free block of `order`, lowest first.
    ///
    /// The lock is held throughout; `f` must not call back into the allocator.
    pub fn for_each_free_block(&self, order: usize, mut f: impl FnMut(PhysicalAddress)) {
        let arena = self.arena.lock_irq();
        for idx in arena.free[order].iter(arena.links) {
            f(arena.address(idx));
        }
    }

    /// Dump per-order counters at `debug` level.
    pub fn log_state(&self) {
        let arena = self.arena.lock_irq();
        debug!(
            "buddy: span {} + {} pages, {} pages initially free",
            arena.base, arena.span_pages, arena.total_pages
        );
        for order in 0..ORDER_COUNT {
            debug!(
                "buddy:   order {order}: {} free, {} in use",
                arena.free[order].len(),
                arena.in_use[order]
            );
        }
    }
}

impl Arena {
    #[inline]
    fn index(&self, pa: PhysicalAddress) -> u32 {
        ((pa - self.base) / PAGE_SIZE) as u32
    }

    #[inline]
    fn address(&self, idx: u32) -> PhysicalAddress {
        self.base + u64::from(idx) * PAGE_SIZE
    }

    /// Whether a block of `order` at `pa` could have come from this arena.
    fn owns(&self, pa: PhysicalAddress, order: usize) -> bool {
        let end = self.base.as_u64() + self.span_pages * PAGE_SIZE;
        pa >= self.base
            && pa.as_u64() + block_bytes(order) <= end
            && pa.is_aligned_to(block_bytes(order))
    }

    /// Feed `range` minus every overlapping reserved range to the free lists.
    fn add_range(&mut self, range: PhysicalRange, reserved: &[PhysicalRange]) {
        let end = range.end().as_u64();
        let mut cursor = range.start().as_u64();

        while cursor < end {
            let window = PhysicalRange::new(PhysicalAddress::new(cursor), range.end());
            // Lowest reserved range still ahead of the cursor.
            let hole = reserved
                .iter()
                .map(PhysicalRange::page_outer::<Size4K>)
                .filter(|r| r.overlaps(&window))
                .min_by_key(PhysicalRange::start);

            let Some(hole) = hole else {
                self.add_run(cursor, end);
                break;
            };
            let hole_start = hole.start().as_u64();
            if hole_start > cursor {
                self.add_run(cursor, hole_start);
            }
            debug!("buddy: skipping reserved {hole:?}");
            cursor = cursor.max(hole.end().as_u64());
        }
    }

    /// Split the page-aligned run `[start, end)` into maximal aligned blocks.
    fn add_run(&mut self, mut start: u64, end: u64) {
        while start < end {
            let remaining = (end - start) / PAGE_SIZE;
            let order = (0..=MAX_ORDER)
                .rev()
                .find(|&k| 1 << k <= remaining && start.is_multiple_of(block_bytes(k)))
                .unwrap_or(0);

            let idx = self.index(PhysicalAddress::new(start));
            self.free[order].insert(self.links, idx);
            self.total_pages += 1 << order;
            start += block_bytes(order);
        }
    }

    fn allocate(&mut self, order: usize) -> Result<PhysicalAddress, AllocError> {
        self.ensure_free(order)?;
        let idx = self.free[order]
            .pop_front(self.links)
            .ok_or(AllocError::OutOfMemory)?;
        self.in_use[order] += 1;
        Ok(self.address(idx))
    }

    /// Make the list of `order` non-empty by splitting a larger block.
    fn ensure_free(&mut self, order: usize) -> Result<(), AllocError> {
        if !self.free[order].is_empty() {
            return Ok(());
        }
        if order == MAX_ORDER {
            return Err(AllocError::OutOfMemory);
        }
        self.ensure_free(order + 1)?;

        let idx = self.free[order + 1]
            .pop_front(self.links)
            .ok_or(AllocError::OutOfMemory)?;
        self.free[order].insert(self.links, idx);
        self.free[order].insert(self.links, idx + (1 << order));
        trace!("buddy: split {} order {}", self.address(idx), order + 1);
        Ok(())
    }

    fn free(&mut self, pa: PhysicalAddress, order: usize) {
        debug_assert!(self.in_use[order] > 0, "buddy: order {order} has nothing in use");
        self.in_use[order] = self.in_use[order].saturating_sub(1);

        let mut order = order;
        let mut idx = self.index(pa);
        let (mut prev, mut next) = self.free[order].insert(self.links, idx);

        while order < MAX_ORDER && self.free[order].len() >= MERGE_THRESHOLD {
            let step = 1 << order;
            let (low, high) = if self.address(idx).is_aligned_to(block_bytes(order + 1)) {
                match next {
                    Some(n) if n == idx + step => (idx, n),
                    _ => break,
                }
            } else {
                match prev {
                    Some(p) if p + step == idx => (p, idx),
                    _ => break,
                }
            };

            self.free[order].remove(self.links, low);
            self.free[order].remove(self.links, high);
            order += 1;
            idx = low;
            (prev, next) = self.free[order].insert(self.links, idx);
            trace!("buddy: merged {} into order {order}", self.address(idx));
        }
    }
}

/// Page-aligned hull of all non-empty `available` ranges.
fn span_of(available: &[PhysicalRange]) -> Option<PhysicalRange> {
    available
        .iter()
        .map(PhysicalRange::page_inner::<Size4K>)
        .filter(|r| !r.is_empty())
        .reduce(|a, b| PhysicalRange::new(a.start().min(b.start()), a.end().max(b.end())))
}

impl PageAllocator for BuddyAllocator {
    fn allocate_pages(&self, pages: usize) -> Result<PhysicalRange, AllocError> {
        self.allocate(pages)
    }

    fn free_pages(&self, block: PhysicalRange) {
        self.free(block);
    }
}

/// Lets the buddy allocator feed translation tables once it is running.
impl FrameAlloc for &BuddyAllocator {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        self.allocate(1).ok().map(|block| block.start())
    }

    fn free_4k(&mut self, frame: PhysicalAddress) {
        self.free(PhysicalRange::from_start_size(frame, PAGE_SIZE));
    }
}
