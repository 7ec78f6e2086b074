//! Boot memory context: the bank list plus the memory and reserved interval tables.
//!
//! [`BootMemoryContext`] accepts reservations and steal allocations. Once everything the boot
//! process needs to protect is reserved, [`BootMemoryContext::finalize`] turns it into a
//! [`SealedMemory`], which only offers queries and allocations recorded as reservations. Nothing
//! can be stolen from memory after that point.

use core::fmt::{Display, Formatter};
use core::ops::Deref;

use arrayvec::ArrayVec;
use log::{debug, info, warn};
use types::fmt::{Bytes, Fmt};
use types::mem::{align_down, pfn_to_phys, FrameRange, MemoryBank, PAGE_SIZE};

use super::error::{BootMemError, ConfigError, Result};
use super::interval::IntervalTable;
use super::limits::BoundaryFrames;
use super::platform::Platform;

/// Most memory banks the firmware may report.
pub const MAX_BANKS: usize = 16;

/// A byte range of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysRegion {
    pub base: u64,
    pub size: u64,
}

impl PhysRegion {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Frames touched by this region.
    pub fn frames(&self) -> FrameRange {
        FrameRange::around(self.base, self.size)
    }
}

impl Display for PhysRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "0x{:08x}+0x{:08x} ({})",
            self.base,
            self.size,
            Fmt::<Bytes>::from(self.size)
        )
    }
}

/// Physical placement of the kernel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImage {
    pub text_start: u64,
    pub data_start: u64,
    pub bss_end: u64,
    /// Text runs from ROM, only data and bss occupy RAM.
    pub execute_in_place: bool,
}

impl KernelImage {
    pub fn region(&self) -> PhysRegion {
        let start = if self.execute_in_place {
            self.data_start
        } else {
            self.text_start
        };
        PhysRegion::new(start, self.bss_end.saturating_sub(start))
    }
}

/// Everything the boot process has placed in memory before the boot memory code runs.
#[derive(Debug, Clone, Copy)]
pub struct BootLayout<'a> {
    pub kernel: KernelImage,
    pub ramdisk: Option<PhysRegion>,
    /// Initial page tables set up by the boot code.
    pub page_tables: PhysRegion,
    /// Reserved memory nodes of the device tree.
    pub dt_reserved: &'a [PhysRegion],
}

/// Outcome of the ramdisk reservation. Only `Reserved` lets the boot process unpack the ramdisk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamdiskStatus {
    Absent,
    Reserved(PhysRegion),
    Disabled {
        ramdisk: PhysRegion,
        reason: BootMemError,
    },
}

/// State shared by both stages of the boot memory context.
pub struct Memblock {
    banks: ArrayVec<MemoryBank, MAX_BANKS>,
    limits: BoundaryFrames,
    platform: Platform,
    memory: IntervalTable,
    reserved: IntervalTable,
}

impl Memblock {
    pub fn banks(&self) -> &[MemoryBank] {
        &self.banks
    }

    pub fn limits(&self) -> &BoundaryFrames {
        &self.limits
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn memory(&self) -> &IntervalTable {
        &self.memory
    }

    pub fn reserved(&self) -> &IntervalTable {
        &self.reserved
    }

    /// Whether `pfn` is backed by memory.
    pub fn is_memory(&self, pfn: u64) -> bool {
        self.memory.contains(pfn)
    }

    /// Whether every frame touched by `[base, base + size)` is memory.
    pub fn is_region_memory(&self, base: u64, size: u64) -> bool {
        self.memory.contains_fully(FrameRange::around(base, size))
    }

    /// Whether any frame touched by `[base, base + size)` is reserved.
    pub fn is_region_reserved(&self, base: u64, size: u64) -> bool {
        self.reserved.overlaps(FrameRange::around(base, size))
    }

    /// Highest `align`-aligned block of `size` bytes in `memory \ reserved` that ends at or below
    /// `max_addr`.
    fn find_top_down(&self, size: u64, align: u64, max_addr: u64) -> Result<u64> {
        if size == 0 || !align.is_power_of_two() {
            return Err(ConfigError::InvalidRequest { size, align }.into());
        }
        let bytes = size
            .checked_add(PAGE_SIZE - 1)
            .map(|end| align_down(end, PAGE_SIZE))
            .ok_or(ConfigError::InvalidRequest { size, align })?;
        let align = core::cmp::max(align, PAGE_SIZE);

        self.memory
            .without(&self.reserved)
            .filter_map(|free| {
                let end = core::cmp::min(free.phys_end(), max_addr);
                let base = align_down(end.checked_sub(bytes)?, align);
                (base >= free.phys_start()).then_some(base)
            })
            .last()
            .ok_or(BootMemError::AllocationExhausted {
                size,
                align,
                limit: max_addr,
            })
    }

    fn dump(&self) {
        debug!("Boot memory tables:");
        for table in [&self.memory, &self.reserved] {
            for region in table.iter() {
                debug!("├─ {} {}", table.name(), region);
            }
        }
        debug!("└─ {}", self.limits);
    }
}

/// Memory layout while the boot process is still reserving what it has placed in memory.
pub struct BootMemoryContext {
    inner: Memblock,
}

impl BootMemoryContext {
    /// Sort and validate `banks` and record them as memory.
    pub fn new(banks: &[MemoryBank], platform: Platform) -> Result<Self> {
        if banks.is_empty() {
            return Err(ConfigError::NoBanks.into());
        }
        let mut sorted: ArrayVec<MemoryBank, MAX_BANKS> = banks
            .try_into()
            .map_err(|_| ConfigError::TooManyBanks { max: MAX_BANKS })?;
        sorted.sort_unstable_by_key(|bank| bank.start_frame);

        for (index, bank) in sorted.iter().enumerate() {
            if bank.frames().is_empty() {
                return Err(ConfigError::EmptyBank { index }.into());
            }
        }
        for (first, pair) in sorted.windows(2).enumerate() {
            if pair[0].frames().overlaps(&pair[1].frames()) {
                return Err(ConfigError::OverlappingBanks {
                    first,
                    second: first + 1,
                }
                .into());
            }
        }

        let limits = BoundaryFrames::find(&sorted)?;
        let mut memory = IntervalTable::new("memory", platform.phys_limit_frame());
        for bank in &sorted {
            memory.insert(bank.frames())?;
        }

        Ok(Self {
            inner: Memblock {
                banks: sorted,
                limits,
                platform,
                memory,
                reserved: IntervalTable::new("reserved", platform.phys_limit_frame()),
            },
        })
    }

    /// Mark `[base, base + size)` as in use. The region must lie within the span of memory.
    pub fn reserve(&mut self, base: u64, size: u64) -> Result<()> {
        let frames = FrameRange::around(base, size);
        if frames.is_empty() {
            return Ok(());
        }

        let span = match (self.memory.first(), self.memory.last()) {
            (Some(first), Some(last)) => FrameRange::new(first.start, last.end),
            _ => FrameRange::default(),
        };
        if !span.contains_range(&frames) {
            return Err(ConfigError::OutsideMemory {
                start: frames.start,
                end: frames.end,
            }
            .into());
        }
        self.inner.reserved.insert(frames)
    }

    /// Reserve the ramdisk unless it is unusable. An unusable ramdisk is not an error: boot goes on
    /// without it.
    pub fn reserve_ramdisk(&mut self, ramdisk: PhysRegion) -> Result<RamdiskStatus> {
        if ramdisk.is_empty() {
            return Ok(RamdiskStatus::Absent);
        }

        let reason = if !self.is_region_memory(ramdisk.base, ramdisk.size) {
            let frames = ramdisk.frames();
            BootMemError::Configuration(ConfigError::OutsideMemory {
                start: frames.start,
                end: frames.end,
            })
        } else if self.is_region_reserved(ramdisk.base, ramdisk.size) {
            BootMemError::OverlapConflict {
                start: ramdisk.base,
                size: ramdisk.size,
            }
        } else {
            self.reserve(ramdisk.base, ramdisk.size)?;
            return Ok(RamdiskStatus::Reserved(ramdisk));
        };

        warn!("INITRD: {ramdisk}: {reason} - disabling initrd");
        Ok(RamdiskStatus::Disabled { ramdisk, reason })
    }

    /// Take `size` bytes of low memory out of memory for good. The stolen range is neither free
    /// nor reserved afterwards, so no later stage will ever see it. Returns its physical address,
    /// which is reachable through the direct map.
    pub fn steal(&mut self, size: u64, align: u64) -> Result<u64> {
        let base = self.find_top_down(size, align, pfn_to_phys(self.limits.max_low))?;
        self.inner.memory.remove(FrameRange::around(base, size))?;
        debug!("stole {} at 0x{base:08x}", Fmt::<Bytes>::from(size));
        Ok(base)
    }

    /// Reserve everything in `layout` in boot order and run the platform's reservation hook.
    pub fn reserve_boot_layout(&mut self, layout: &BootLayout) -> Result<RamdiskStatus> {
        let kernel = layout.kernel.region();
        self.reserve(kernel.base, kernel.size)?;

        let ramdisk = match layout.ramdisk {
            Some(ramdisk) => self.reserve_ramdisk(ramdisk)?,
            None => RamdiskStatus::Absent,
        };

        self.reserve(layout.page_tables.base, layout.page_tables.size)?;
        for region in layout.dt_reserved {
            self.reserve(region.base, region.size)?;
        }
        if let Some(reserve) = self.platform.reserve {
            reserve(self)?;
        }
        Ok(ramdisk)
    }

    /// Seal the tables. No more reservations, no more steals.
    pub fn finalize(self) -> SealedMemory {
        self.inner.dump();
        SealedMemory { inner: self.inner }
    }
}

impl Deref for BootMemoryContext {
    type Target = Memblock;

    fn deref(&self) -> &Memblock {
        &self.inner
    }
}

/// Memory layout after all boot reservations are in. Neither reservations nor steals are possible
/// any more; only [`SealedMemory::alloc_base`] still takes memory.
pub struct SealedMemory {
    inner: Memblock,
}

impl SealedMemory {
    pub fn reservations_forbidden(&self) -> bool {
        true
    }

    /// Allocate `size` bytes as high as possible below `max_addr` and record them as reserved.
    /// Returns the physical address.
    pub fn alloc_base(&mut self, size: u64, align: u64, max_addr: u64) -> Result<u64> {
        let base = self.find_top_down(size, align, max_addr)?;
        self.inner.reserved.insert(FrameRange::around(base, size))?;
        Ok(base)
    }

    /// Log both tables.
    pub fn report(&self) {
        info!("{}", self.memory);
        info!("{}", self.reserved);
    }
}

impl Deref for SealedMemory {
    type Target = Memblock;

    fn deref(&self) -> &Memblock {
        &self.inner
    }
}
