//! Boot driver for the memory subsystem. The boot protocol code collects what the bootloader
//! passed to the kernel into a [`BootInfo`]; from there this module derives the memory banks and
//! the ramdisk location and runs the memory bootstrap. Any failure at this stage halts the core.

pub mod initrd;

use arrayvec::ArrayVec;
use log::{debug, error, info, warn};
use types::mem::{MemoryBank, MemoryRegion};

use crate::mem::context::{KernelImage, MAX_BANKS};
use crate::mem::physical::MemoryMap;
use crate::mem::platform::PHYS_MAP_LIMIT;
use crate::mem::{
    bootstrap_subsystem, BootLayout, BootOutcome, ConfigError, DirectMap, LinearMap,
    PageAllocator, PhysRegion, Platform, RamdiskStatus, Result,
};
use initrd::{find_ramdisk, BootTag, RamdiskSource};

/// Everything the bootloader and the early boot code tell us about memory.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    pub command_line: Option<&'a str>,
    pub memory_map: &'a [MemoryRegion],
    pub tags: &'a [BootTag],
    /// Ramdisk `(start, end)` from the device tree's chosen node.
    pub dt_initrd: Option<(u64, u64)>,
    pub dt_reserved: &'a [PhysRegion],
    pub kernel: KernelImage,
    pub page_tables: PhysRegion,
}

/// Memory banks of the usable regions in `memory_map`, split at the direct mapping limit.
pub fn memory_banks(memory_map: &[MemoryRegion]) -> Result<ArrayVec<MemoryBank, MAX_BANKS>> {
    let mut banks = ArrayVec::new();
    for bank in MemoryBank::from_memory_map(memory_map.iter().copied(), PHYS_MAP_LIMIT) {
        banks
            .try_push(bank)
            .map_err(|_| ConfigError::TooManyBanks { max: MAX_BANKS })?;
    }
    Ok(banks)
}

/// Set up physical memory and hand it to `allocator`.
pub fn try_boot_memory(
    info: &BootInfo,
    platform: Platform,
    map: &mut impl DirectMap,
    allocator: &mut impl PageAllocator,
) -> Result<BootOutcome> {
    info!("Command line: {}", info.command_line.unwrap_or("none"));
    info!("Bootloader-provided memory map:");
    info!("{}", info.memory_map.iter().copied().fmt());

    let banks = memory_banks(info.memory_map)?;
    for bank in &banks {
        debug!("bank {bank}");
    }

    let sources = info
        .command_line
        .map(RamdiskSource::CommandLine)
        .into_iter()
        .chain(info.tags.iter().copied().map(RamdiskSource::Tag))
        .chain(
            info.dt_initrd
                .map(|(start, end)| RamdiskSource::DeviceTree { start, end }),
        );
    let layout = BootLayout {
        kernel: info.kernel,
        ramdisk: find_ramdisk(sources, &LinearMap::new(platform.page_offset)),
        page_tables: info.page_tables,
        dt_reserved: info.dt_reserved,
    };

    let outcome = bootstrap_subsystem(&banks, &layout, platform, map, allocator)?;
    if let RamdiskStatus::Disabled { ramdisk, .. } = outcome.ramdisk {
        warn!("continuing without initrd at {ramdisk}");
    }
    Ok(outcome)
}

/// Like [`try_boot_memory`], but there is no way to continue without memory: halt on error.
pub fn boot_memory(
    info: &BootInfo,
    platform: Platform,
    map: &mut impl DirectMap,
    allocator: &mut impl PageAllocator,
) -> BootOutcome {
    match try_boot_memory(info, platform, map, allocator) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Halting: cannot set up physical memory: {err}");
            crate::arch::halt_core();
        }
    }
}
