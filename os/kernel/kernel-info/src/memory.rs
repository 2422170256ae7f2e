//! # Memory Layout

/// Size of the base translation granule.
pub const PAGE_SIZE: u64 = 4096;

/// Exclusive end of the user half (`TTBR0_EL1`, 48-bit VA).
///
/// The user region is reserved but not managed by the memory core.
pub const USER_END: u64 = 0x0001_0000_0000_0000;

/// Start of the linear map. Every physical address `pa` is visible to the
/// kernel at `LINEAR_MAP_BASE + pa`.
pub const LINEAR_MAP_BASE: u64 = 0xffff_0000_0000_0000;

/// Largest physical address span covered by the linear map.
pub const LINEAR_MAP_SIZE: u64 = 0x0000_8000_0000_0000;

/// Start of the kernel virtual zone handed out as VM areas.
pub const VM_ZONE_START: u64 = 0xffff_8000_0000_0000;

/// Exclusive end of the kernel virtual zone.
pub const VM_ZONE_END: u64 = 0xffff_ff00_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ff80_0000_0000;

/// Size of the unmapped guard page placed next to guarded VM areas.
pub const GUARD_PAGE_SIZE: u64 = PAGE_SIZE;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(USER_END <= LINEAR_MAP_BASE);
    assert!(LINEAR_MAP_BASE + LINEAR_MAP_SIZE <= VM_ZONE_START);
    assert!(VM_ZONE_START < VM_ZONE_END);
    assert!(VM_ZONE_END <= KERNEL_BASE);
    assert!(VM_ZONE_START.is_multiple_of(1 << 30));
    assert!(GUARD_PAGE_SIZE.is_multiple_of(PAGE_SIZE));
};
