//! # Virtual Memory Interface
//!
//! The architecture page-table interface consumed by the kernel memory core.
//!
//! ## What you get
//! - [`Granule`]: the three leaf sizes of the ARM64 4 KiB translation
//!   granule (4 KiB pages, 2 MiB and 1 GiB blocks) and the greedy selection
//!   rule used for large mappings.
//! - [`Permissions`], [`MemoryType`] and [`MapAttributes`] describing a
//!   mapping independent of the descriptor encoding.
//! - [`PageTableMapper`]: `map` / `unmap` / `translate` / `activate`, plus the
//!   provided [`map_range`](PageTableMapper::map_range) which tiles a range
//!   with the fewest descriptors.
//! - [`FrameAlloc`] (where translation tables come from) and [`PhysMapper`]
//!   (how the kernel reaches physical memory).
//!
//! ## ARM64 translation with a 4 KiB granule
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L0   |  L1   |  L2   |  L3   | Offset |
//! ```
//!
//! A level 1 descriptor may be a 1 GiB block, a level 2 descriptor a 2 MiB
//! block, and level 3 descriptors map 4 KiB pages.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod attributes;
mod granule;
mod mapper;

pub use crate::attributes::{MapAttributes, MemoryType, Permissions};
pub use crate::granule::Granule;
pub use crate::mapper::{FrameAlloc, MapError, PageTableMapper, PhysMapper, Run, runs};
pub use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
