//! # Bin allocator
//!
//! Small objects come from seven size classes, 32 to 2048 bytes. Each class
//! keeps an intrusive LIFO list of free chunks; when a list runs dry one page
//! is taken from the buddy allocator and carved into chunks of that class.
//! Anything larger than the biggest class goes to the buddy allocator as a
//! whole block of pages.
//!
//! A free chunk stores the list link in its own first bytes:
//!
//! ```text
//! page (4 KiB, class 512)
//! +--------+--------+--------+-----+--------+
//! | chunk0 | chunk1 | chunk2 | ... | chunk7 |
//! +--------+--------+--------+-----+--------+
//!   next ->  next ->  next -> ...    None
//! ```
//!
//! Carved pages are never returned to the buddy allocator.

use crate::{AllocError, BuddyAllocator, ByteAllocator, LinearMap};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalRange, VirtualAddress, pages_for};
use kernel_sync::SpinMutex;
use log::{debug, trace};

/// Number of size classes.
pub const BIN_COUNT: usize = 7;

/// Chunk size of each class.
pub const BIN_SIZES: [usize; BIN_COUNT] = [32, 64, 128, 256, 512, 1024, 2048];

/// Class of the smallest chunk holding `size` bytes, if any.
///
/// ```rust
/// # use kernel_alloc::bins::class_for;
/// assert_eq!(class_for(1), Some(0));
/// assert_eq!(class_for(33), Some(1));
/// assert_eq!(class_for(2048), Some(6));
/// assert_eq!(class_for(2049), None);
/// ```
#[must_use]
pub const fn class_for(size: usize) -> Option<usize> {
    let mut class = 0;
    while class < BIN_COUNT {
        if size <= BIN_SIZES[class] {
            return Some(class);
        }
        class += 1;
    }
    None
}

/// Header written into every free chunk.
#[repr(C)]
struct Chunk {
    next: Option<NonNull<Chunk>>,
}

struct Bins {
    heads: [Option<NonNull<Chunk>>; BIN_COUNT],
    free: [usize; BIN_COUNT],
    pages: [usize; BIN_COUNT],
}

// Safety: the chunk pointers are only followed while the owning lock is held.
unsafe impl Send for Bins {}

impl Bins {
    const fn new() -> Self {
        Self {
            heads: [None; BIN_COUNT],
            free: [0; BIN_COUNT],
            pages: [0; BIN_COUNT],
        }
    }

    /// # Safety
    /// `chunk` must be writable, at least `BIN_SIZES[class]` bytes and owned
    /// by nobody else.
    unsafe fn push(&mut self, class: usize, chunk: NonNull<u8>) {
        let chunk = chunk.cast::<Chunk>();
        unsafe {
            chunk.write(Chunk {
                next: self.heads[class],
            });
        }
        self.heads[class] = Some(chunk);
        self.free[class] += 1;
    }

    fn pop(&mut self, class: usize) -> Option<NonNull<u8>> {
        let chunk = self.heads[class]?;
        // SAFETY: every listed chunk was initialized by `push`.
        self.heads[class] = unsafe { chunk.as_ref().next };
        self.free[class] -= 1;
        Some(chunk.cast())
    }

    /// Whether `chunk` is currently on the free list of `class`.
    fn contains(&self, class: usize, chunk: NonNull<u8>) -> bool {
        let mut cursor = self.heads[class];
        while let Some(c) = cursor {
            if c.cast() == chunk {
                return true;
            }
            // SAFETY: every listed chunk was initialized by `push`.
            cursor = unsafe { c.as_ref().next };
        }
        false
    }

    /// Split `page` into chunks of `class`, lowest address ending up first.
    ///
    /// # Safety
    /// `page` must be a writable, exclusively owned 4 KiB page.
    unsafe fn carve(&mut self, class: usize, page: NonNull<u8>) {
        let size = BIN_SIZES[class];
        for i in (0..PAGE_SIZE as usize / size).rev() {
            unsafe { self.push(class, page.add(i * size)) };
        }
        self.pages[class] += 1;
    }
}

/// Size-class allocator for kernel objects.
pub struct BinAllocator<'a> {
    pages: &'a BuddyAllocator,
    linear: LinearMap,
    bins: SpinMutex<Bins>,
}

impl<'a> BinAllocator<'a> {
    /// An empty allocator refilling from `pages`, reaching pages through
    /// `linear`.
    #[must_use]
    pub const fn new(pages: &'a BuddyAllocator, linear: LinearMap) -> Self {
        Self {
            pages,
            linear,
            bins: SpinMutex::new(Bins::new()),
        }
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// The chunk class is chosen for `max(size, align)`; chunks are aligned
    /// to their size because pages are carved from page-aligned addresses.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for a zero size or an alignment that
    ///   is not a power of two.
    /// - [`AllocError::OutOfMemory`] if the buddy allocator is exhausted.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(AllocError::InvalidArgument);
        }
        let need = size.max(align);
        match class_for(need) {
            Some(class) => self.allocate_chunk(class),
            None => self.allocate_pages(need),
        }
    }

    /// Release memory from [`allocate`](Self::allocate).
    ///
    /// Debug builds walk the class list and assert on a double free.
    ///
    /// # Safety
    /// `ptr` must come from this allocator with the same `size` and `align`
    /// and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let need = size.max(align);
        if let Some(class) = class_for(need) {
            let mut bins = self.bins.lock_irq();
            debug_assert!(!bins.contains(class, ptr), "bins: double free of {ptr:p}");
            unsafe { bins.push(class, ptr) };
            return;
        }
        let pa = self.linear.virt_to_phys(VirtualAddress::from_nonnull(ptr));
        self.pages
            .free(PhysicalRange::from_start_size(pa, pages_for(need as u64) * PAGE_SIZE));
    }

    /// In-place resizing is not supported.
    ///
    /// Always reports failure. Use [`ByteAllocator::remap`] to move an
    /// allocation instead.
    ///
    /// # Panics
    /// In debug builds, on every call.
    pub fn resize(&self, ptr: NonNull<u8>, size: usize, new_size: usize) -> bool {
        debug_assert!(false, "bins: resize of {ptr:p} from {size} to {new_size} bytes is unsupported");
        false
    }

    /// Free chunks currently listed in `class`.
    #[must_use]
    pub fn free_chunks(&self, class: usize) -> usize {
        self.bins.lock_irq().free[class]
    }

    /// Pages carved into `class` so far.
    #[must_use]
    pub fn pages_carved(&self, class: usize) -> usize {
        self.bins.lock_irq().pages[class]
    }

    /// Dump per-class free chunks and carved pages at `debug` level.
    pub fn log_state(&self) {
        let bins = self.bins.lock_irq();
        for (class, size) in BIN_SIZES.iter().enumerate() {
            debug!(
                "bins: {size:>4} B: {} free, {} pages",
                bins.free[class], bins.pages[class]
            );
        }
    }

    fn allocate_chunk(&self, class: usize) -> Result<NonNull<u8>, AllocError> {
        if let Some(chunk) = self.bins.lock_irq().pop(class) {
            return Ok(chunk);
        }

        // The bin lock is released while the buddy allocator runs.
        let page = self.pages.allocate(1)?;
        let va = self.linear.phys_to_virt(page.start());
        let page_ptr = NonNull::new(va.as_mut_ptr::<u8>()).ok_or(AllocError::OutOfMemory)?;
        trace!("bins: refilling {}-byte class from {}", BIN_SIZES[class], page.start());

        let mut bins = self.bins.lock_irq();
        // SAFETY: a fresh page from the buddy allocator, reached through the
        // linear map.
        unsafe { bins.carve(class, page_ptr) };
        bins.pop(class).ok_or(AllocError::OutOfMemory)
    }

    fn allocate_pages(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let pages = usize::try_from(pages_for(bytes as u64)).map_err(|_| AllocError::OutOfMemory)?;
        let block = self.pages.allocate(pages)?;
        let va = self.linear.phys_to_virt(block.start());
        trace!("bins: {bytes} bytes as {} pages at {}", block.pages(), block.start());
        NonNull::new(va.as_mut_ptr::<u8>()).ok_or(AllocError::OutOfMemory)
    }
}

impl ByteAllocator for BinAllocator<'_> {
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        Self::allocate(self, size, align)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe { Self::free(self, ptr, size, align) }
    }

    fn resize(&self, ptr: NonNull<u8>, size: usize, _align: usize, new_size: usize) -> bool {
        Self::resize(self, ptr, size, new_size)
    }
}

unsafe impl GlobalAlloc for BinAllocator<'_> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate(layout.size(), layout.align())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { self.free(ptr, layout.size(), layout.align()) }
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(ptr) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };
        unsafe { ByteAllocator::remap(self, ptr, layout.size(), layout.align(), new_size) }
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}
