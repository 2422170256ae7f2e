use kernel_vmem::MapError;

/// Errors returned by the memory core.
///
/// Every error is reported to the immediate caller; nothing is retried
/// internally, and nothing here is fatal by itself.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    /// Misaligned, zero-length or otherwise malformed request.
    #[error("invalid argument")]
    InvalidArgument,
    /// No free physical block of the requested order (or larger).
    #[error("out of physical memory")]
    OutOfMemory,
    /// The VM zone has no room left above the highest area.
    #[error("out of virtual memory")]
    OutOfVirtualMemory,
    /// The resource range overlaps an existing registration.
    #[error("range not available")]
    NotAvailable,
    /// No VM area contains the given address.
    #[error("no such area")]
    NotFound,
    /// The page-table backend failed.
    #[error("mapping failed: {0}")]
    Map(#[from] MapError),
}
