use bitfield_struct::bitfield;

/// Access permissions requested for a mapping.
///
/// The page-table backend translates these into `AP[2:1]`, `UXN` and `PXN`
/// of the leaf descriptor. A mapping is always readable by the kernel;
/// `read` only matters for user mappings.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::Permissions;
/// let rw = Permissions::new().with_read(true).with_write(true);
/// assert!(rw.write());
/// assert!(!rw.execute());
/// ```
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Permissions {
    /// Readable.
    pub read: bool,
    /// Writable (clear maps read-only).
    pub write: bool,
    /// Executable at EL1 (clear sets `PXN`).
    pub execute: bool,
    /// Accessible from EL0 (clear restricts to the kernel, sets `UXN`).
    pub user: bool,
    #[bits(4)]
    __: u8,
}

impl Permissions {
    /// Kernel read/write, never executable.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_read(true).with_write(true)
    }

    /// Kernel read/execute.
    #[must_use]
    pub const fn kernel_rx() -> Self {
        Self::new().with_read(true).with_execute(true)
    }
}

/// Memory attribute selected through `MAIR_EL1` for a mapping.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum MemoryType {
    /// Normal, write-back cacheable DRAM.
    #[default]
    Normal,
    /// Normal memory, non-cacheable (e.g. DMA buffers shared with devices).
    NormalNonCacheable,
    /// Device-nGnRE: device registers, never speculated or gathered.
    Device,
}

/// Everything the page-table backend needs besides the addresses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MapAttributes {
    pub permissions: Permissions,
    pub memory_type: MemoryType,
}

impl MapAttributes {
    #[must_use]
    pub const fn new(permissions: Permissions, memory_type: MemoryType) -> Self {
        Self {
            permissions,
            memory_type,
        }
    }

    /// Kernel read/write normal memory (heap, VM areas, linear map).
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self::new(Permissions::kernel_rw(), MemoryType::Normal)
    }

    /// Kernel read/write device registers.
    #[must_use]
    pub const fn device() -> Self {
        Self::new(Permissions::kernel_rw(), MemoryType::Device)
    }
}
