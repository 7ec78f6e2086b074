//! Memory management
//!
//! Early physical memory bootstrap. The boot process hands over the memory banks reported by the
//! firmware and everything it has already placed in memory. This module turns them into zones,
//! serves early allocations from a bitmap and finally releases every unused frame to the general
//! page allocator:
//!
//! * [`BootMemoryContext`] collects memory and reservations, [`BootMemoryContext::finalize`]
//!   seals them
//! * [`BootMem`] owns the boot bitmap over low memory and the zones
//! * [`BootMem::handoff`] reclaims unused page descriptors, releases the bitmap's free frames and
//!   then high memory

pub mod bitmap;
pub mod context;
pub mod error;
pub mod handoff;
pub mod highmem;
pub mod interval;
pub mod limits;
pub mod memmap;
pub mod physical;
pub mod platform;
pub mod zone;

use log::info;
use types::mem::MemoryBank;

pub use context::{BootLayout, BootMemoryContext, PhysRegion, RamdiskStatus, SealedMemory};
pub use error::{BootMemError, ConfigError, Result};
pub use handoff::{BootMem, HandoffReport, PageAllocator};
pub use physical::{DirectMap, LinearMap};
pub use platform::Platform;

/// Result of a successful memory bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootOutcome {
    pub report: HandoffReport,
    pub ramdisk: RamdiskStatus,
}

/// Run the whole boot memory sequence: reserve `layout`, seal the tables, set up the bitmap and the
/// descriptor array, and hand everything free over to `allocator`.
pub fn bootstrap_subsystem(
    banks: &[MemoryBank],
    layout: &BootLayout,
    platform: Platform,
    map: &mut impl DirectMap,
    allocator: &mut impl PageAllocator,
) -> Result<BootOutcome> {
    let mut context = BootMemoryContext::new(banks, platform)?;
    let ramdisk = context.reserve_boot_layout(layout)?;

    let memory = context.finalize();
    memory.report();

    let mut bootmem = BootMem::init(memory, map)?;
    let memmap = bootmem.alloc_descriptor_array()?;
    let report = bootmem.handoff(&memmap, allocator)?;

    if let RamdiskStatus::Reserved(ramdisk) = ramdisk {
        info!("INITRD: {ramdisk}");
    }
    Ok(BootOutcome { report, ramdisk })
}
