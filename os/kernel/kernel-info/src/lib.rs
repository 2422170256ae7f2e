//! # Kernel Memory Layout and Board Interface
//!
//! This crate is the single source of truth for the ARM64 kernel's address
//! space layout and for the contract through which board code describes the
//! physical memory it brings up.
//!
//! ### Memory Layout ([`memory`])
//! Establishes the kernel's virtual memory architecture (48-bit VA, 4 KiB
//! granule, `TTBR0_EL1` for the user half and `TTBR1_EL1` for the kernel half):
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//!                       │   (reserved, not managed here)  │
//! USER_END              ├─────────────────────────────────┤ 0x0001_0000_0000_0000
//!                       │        (non-canonical)          │
//! LINEAR_MAP_BASE       ├─────────────────────────────────┤ 0xffff_0000_0000_0000
//!                       │   Linear Map of all DRAM        │
//!                       │   (virt = phys + offset)        │
//! VM_ZONE_START         ├─────────────────────────────────┤ 0xffff_8000_0000_0000
//!                       │   VM Area Zone                  │
//!                       │   (reservations, io-remaps)     │
//! VM_ZONE_END           ├─────────────────────────────────┤ 0xffff_ff00_0000_0000
//!                       │       Guard Region              │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ff80_0000_0000
//!                       │     Kernel Text & Data          │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Board Interface ([`board`])
//! The [`Board`](board::Board) trait is implemented by board support code
//! and consumed by the memory core during boot: it reports the available
//! DRAM banks and the ranges that must stay identity-mapped while the new
//! page tables are switched in.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod board;
pub mod memory;
