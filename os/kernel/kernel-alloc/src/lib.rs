//! # Kernel Memory Core
//!
//! Physical page allocation, small-object allocation and kernel virtual
//! address space management for the ARM64 kernel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  Bin Allocator  (bins)   │   │  VM Area Allocator (vm)  │
//! │  • 32 B .. 2 KiB classes │   │  • guarded areas         │
//! │  • LIFO chunk lists      │   │  • io_remap              │
//! └────────────┬─────────────┘   └───────┬──────────┬───────┘
//!              │ pages                   │ pages    │ map / unmap
//! ┌────────────▼─────────────────────────▼──┐  ┌────▼─────────────────┐
//! │        Buddy Page Allocator (buddy)     │  │  PageTableMapper     │
//! │  • orders 0..=9 (4 KiB .. 2 MiB)        │  │  (kernel-vmem)       │
//! │  • sorted free lists, split / merge     │  └──────────────────────┘
//! └────────────▲────────────────────────────┘
//!              │ link table, early page tables
//! ┌────────────┴─────────────┐   ┌──────────────────────────┐
//! │  Boot bump allocator     │   │  Resource tree           │
//! │  (bootmem)               │   │  "who owns this address" │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! [`MemoryContext`] wires everything together during boot and owns the
//! allocators afterwards. Consumers borrow them, either concretely or as
//! [`PageAllocator`] / [`ByteAllocator`] trait objects.
//!
//! ## Physical Memory Access
//!
//! Physical memory is only ever touched through the [`LinearMap`]
//! (`va = pa + offset`). The buddy allocator stores its free-list links in a
//! separate table rather than inside free pages; only the bin allocator
//! writes list headers into the memory it manages.
//!
//! ## Concurrency
//!
//! The buddy, bin and VM allocators each own a spin lock taken with IRQs
//! masked ([`kernel_sync::Mutex::lock_irq`]). A lock is held for a single
//! short critical section per call; the only nesting is the VM allocator's
//! page-table backend pulling table frames from the buddy allocator.
//!
//! ## Errors
//!
//! Every fallible operation returns [`AllocError`] to its caller. Nothing
//! in this crate treats exhaustion as fatal; caller contract violations
//! (bad frees, resizing heap chunks) are asserted in debug builds only.
//!
//! ## Example
//!
//! ```rust
//! use kernel_alloc::{BuddyAllocator, FreeLink};
//! use kernel_memory_addresses::{PhysicalAddress, PhysicalRange};
//!
//! let ram = [PhysicalRange::from_start_size(PhysicalAddress::new(0x4000_0000), 16 << 20)];
//! let links = Box::leak(vec![FreeLink::EMPTY; BuddyAllocator::metadata_len(&ram)].into_boxed_slice());
//! let pages = BuddyAllocator::new(&ram, &[], links).unwrap();
//!
//! let block = pages.allocate(3).unwrap();
//! assert_eq!(block.pages(), 4);
//! assert!(block.start().is_aligned_to(4 * 4096));
//! pages.free(block);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]
// Physical and virtual addresses are 64 bit and the target is 64 bit.
#![allow(clippy::cast_possible_truncation)]

extern crate alloc;

mod api;
pub mod bins;
pub mod bootmem;
pub mod buddy;
pub mod context;
mod error;
pub mod linear_map;
pub mod resource;
pub mod vm;

#[cfg(test)]
mod testing;

pub use crate::api::{ByteAllocator, PageAllocator};
pub use crate::bins::BinAllocator;
pub use crate::bootmem::BootBumpAlloc;
pub use crate::buddy::{BuddyAllocator, FreeLink};
pub use crate::context::MemoryContext;
pub use crate::error::AllocError;
pub use crate::linear_map::LinearMap;
pub use crate::resource::{Resource, ResourceId, ResourceTree};
pub use crate::vm::{GuardPlacement, VmAllocator, VmAreaHandle, VmZone};
