//! # Board Memory Description
//!
//! Board support code describes the machine's physical memory through the
//! [`Board`] trait. The memory core consumes it exactly once, during boot.

use kernel_memory_addresses::PhysicalRange;

/// What the memory core needs to know about the machine.
pub trait Board {
    /// Physical DRAM banks available to the kernel, in any order.
    ///
    /// Ranges need not be page aligned; partial pages at either end are
    /// dropped by the page allocator.
    fn dram_ranges(&self) -> &[PhysicalRange];

    /// Physical ranges (device registers, the running kernel image, the
    /// boot stack) that must stay identity mapped while the new page
    /// tables are activated.
    fn identity_map_ranges(&self) -> &[PhysicalRange];
}

/// A [`Board`] described by two static tables.
///
/// Convenient for boards whose memory map is known at compile time, and
/// for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticBoard<'a> {
    pub dram: &'a [PhysicalRange],
    pub identity: &'a [PhysicalRange],
}

impl Board for StaticBoard<'_> {
    fn dram_ranges(&self) -> &[PhysicalRange] {
        self.dram
    }

    fn identity_map_ranges(&self) -> &[PhysicalRange] {
        self.identity
    }
}
