//! Errors of the boot memory subsystem. Anything returned from here is fatal to the boot process,
//! except for [`BootMemError::OverlapConflict`] which only disables the ramdisk.

/// The inputs describing physical memory are inconsistent. Continuing would corrupt the zone
/// accounting, so initialization is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("the memory bank list is empty")]
    NoBanks,
    #[error("more than {max} memory banks")]
    TooManyBanks { max: usize },
    #[error("memory bank {index} is empty")]
    EmptyBank { index: usize },
    #[error("memory banks {first} and {second} overlap")]
    OverlappingBanks { first: usize, second: usize },
    #[error("the first memory bank is high memory, there is no low memory to boot from")]
    HighMemoryFirst,
    #[error("{frames} frames of high memory found but high memory support is disabled")]
    HighMemoryUnsupported { frames: u64 },
    #[error("frames {start:#x}..{end:#x} are beyond the physical address space")]
    OutsideAddressSpace { start: u64, end: u64 },
    #[error("reservation of frames {start:#x}..{end:#x} lies outside of declared memory")]
    OutsideMemory { start: u64, end: u64 },
    #[error("frames {start:#x}..{end:#x} are not covered by the boot bitmap")]
    OutsideBitmap { start: u64, end: u64 },
    #[error("interval table is full ({max} entries)")]
    TableFull { max: usize },
    #[error("DMA zone of {bytes:#x} bytes is smaller than a page")]
    DmaZoneTooSmall { bytes: u64 },
    #[error("DMA zone of {dma_frames} frames exceeds the low memory zone of {low_frames} frames")]
    DmaZoneTooLarge { dma_frames: u64, low_frames: u64 },
    #[error("invalid allocation request: {size:#x} bytes aligned to {align:#x}")]
    InvalidRequest { size: u64, align: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootMemError {
    #[error("invalid memory configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// There is no fallback allocator this early, so this ends the boot.
    #[error("cannot allocate {size:#x} bytes (align {align:#x}) below {limit:#x}")]
    AllocationExhausted { size: u64, align: u64, limit: u64 },

    /// The region at `start` collides with memory that is already in use.
    #[error("0x{start:08x}+0x{size:08x} overlaps in-use memory region")]
    OverlapConflict { start: u64, size: u64 },
}

pub type Result<T> = core::result::Result<T, BootMemError>;
