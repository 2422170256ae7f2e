use alloc::vec::Vec;
use kernel_info::memory::GUARD_PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Where an unmapped guard page sits relative to the usable range.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum GuardPlacement {
    #[default]
    None,
    /// Below the usable range; catches underruns.
    Before,
    /// Above the usable range; catches overruns.
    After,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MappingState {
    NotMapped,
    Mapped,
}

/// What backs an area.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AreaKind {
    /// Fresh pages from the buddy allocator, owned by the area.
    Anonymous,
    /// An existing physical window (device registers), never freed.
    Device,
}

/// One leaf mapping installed for an area.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AreaMapping {
    pub va: VirtualAddress,
    pub pa: PhysicalAddress,
    pub size: u64,
    /// Whether `pa` goes back to the buddy allocator when the area is freed.
    pub owned: bool,
}

/// A reserved range of the VM zone, guard page included.
#[derive(Clone, Debug)]
pub struct VmArea {
    start: VirtualAddress,
    end: VirtualAddress,
    guard: GuardPlacement,
    pub(super) state: MappingState,
    kind: AreaKind,
    pub(super) mappings: Vec<AreaMapping>,
}

impl VmArea {
    pub(super) fn new(start: VirtualAddress, usable: u64, guard: GuardPlacement, kind: AreaKind) -> Self {
        Self {
            start,
            end: start + usable + guard_bytes(guard),
            guard,
            state: MappingState::NotMapped,
            kind,
            mappings: Vec::new(),
        }
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Exclusive end, guard page included.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[must_use]
    pub const fn guard(&self) -> GuardPlacement {
        self.guard
    }

    #[must_use]
    pub const fn state(&self) -> MappingState {
        self.state
    }

    #[must_use]
    pub const fn kind(&self) -> AreaKind {
        self.kind
    }

    #[must_use]
    pub fn usable_start(&self) -> VirtualAddress {
        match self.guard {
            GuardPlacement::Before => self.start + GUARD_PAGE_SIZE,
            GuardPlacement::None | GuardPlacement::After => self.start,
        }
    }

    #[must_use]
    pub fn usable_end(&self) -> VirtualAddress {
        match self.guard {
            GuardPlacement::After => VirtualAddress::new(self.end.as_u64() - GUARD_PAGE_SIZE),
            GuardPlacement::None | GuardPlacement::Before => self.end,
        }
    }

    #[must_use]
    pub fn usable_len(&self) -> u64 {
        self.usable_end() - self.usable_start()
    }

    /// The guard page, if any.
    #[must_use]
    pub fn guard_page(&self) -> Option<VirtualAddress> {
        match self.guard {
            GuardPlacement::None => None,
            GuardPlacement::Before => Some(self.start),
            GuardPlacement::After => Some(self.usable_end()),
        }
    }

    /// Whether `addr` lies in the area, guard page included.
    #[must_use]
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr >= self.start && addr < self.end
    }

    #[must_use]
    pub fn mappings(&self) -> &[AreaMapping] {
        &self.mappings
    }
}

pub(super) const fn guard_bytes(guard: GuardPlacement) -> u64 {
    match guard {
        GuardPlacement::None => 0,
        GuardPlacement::Before | GuardPlacement::After => GUARD_PAGE_SIZE,
    }
}
