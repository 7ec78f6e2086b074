//! Handoff from the boot bitmap to the general page allocator.

use core::fmt::{Display, Formatter};

use log::{debug, info};
use types::fmt::{Bytes, Fmt, Frames};
use types::mem::{align_down, align_up, pfn_to_phys, FrameRange};

use super::bitmap::{BitmapRelease, BootBitmap};
use super::context::SealedMemory;
use super::error::Result;
use super::highmem::free_highpages;
use super::limits::BoundaryFrames;
use super::memmap::{free_unused_memmap, DescriptorMap, FlatMemmap};
use super::physical::DirectMap;
use super::zone::ZoneSet;

/// The general page allocator, as far as the boot code is concerned.
pub trait PageAllocator {
    /// Set up the zones of the node before any page is released.
    fn register_zones(&mut self, zones: &ZoneSet);

    /// Take ownership of a free page.
    fn release_page(&mut self, pfn: u64);
}

/// The boot memory allocator: sealed tables, zones and the bitmap over low memory.
pub struct BootMem {
    memory: SealedMemory,
    zones: ZoneSet,
    bitmap: BootBitmap<'static>,
}

impl BootMem {
    /// Set up the bitmap and compute the zones. The bitmap's storage is taken from the top of low
    /// memory and reserved.
    pub fn init(mut memory: SealedMemory, map: &mut impl DirectMap) -> Result<Self> {
        let limits = *memory.limits();
        let frames = FrameRange::new(limits.min, limits.max_low);
        let bytes = BootBitmap::bytes_needed(frames.len());
        let align = memory.platform().cache_line_bytes;
        let phys = memory.alloc_base(bytes, align, pfn_to_phys(limits.max_low))?;

        // SAFETY: `alloc_base` reserved the range and nothing else refers to it.
        let map = unsafe { map.bytes_mut(phys, bytes) };
        let mut bitmap = BootBitmap::new(map, frames, FrameRange::around(phys, bytes))?;
        bitmap.init(memory.memory(), memory.reserved());

        let zones = memory.platform().zones.build(&limits, memory.memory())?;
        debug!("boundaries: {limits}");
        debug!("zones:\n{zones}");
        debug!(
            "DMA limit: 0x{:08x}",
            memory.platform().dma_limit(pfn_to_phys(limits.min))
        );
        Ok(Self {
            memory,
            zones,
            bitmap,
        })
    }

    pub fn limits(&self) -> &BoundaryFrames {
        self.memory.limits()
    }

    pub fn zones(&self) -> &ZoneSet {
        &self.zones
    }

    pub fn bitmap(&self) -> &BootBitmap<'static> {
        &self.bitmap
    }

    pub fn memory(&self) -> &SealedMemory {
        &self.memory
    }

    /// Allocate from low memory. See [`BootBitmap::alloc`].
    pub fn alloc(&mut self, size: u64, align: u64, limit: u64) -> Result<u64> {
        self.bitmap.alloc(size, align, limit)
    }

    /// Allocate the descriptor array for the node span, rounded out to max-order blocks.
    pub fn alloc_descriptor_array(&mut self) -> Result<FlatMemmap> {
        let platform = *self.memory.platform();
        let limits = *self.memory.limits();
        let granularity = platform.memmap_granularity();
        let first_pfn = align_down(limits.min, granularity);
        let end_pfn = align_up(limits.max_high, granularity);

        let size = (end_pfn - first_pfn) * platform.descriptor_size;
        let base_phys = self.alloc(size, platform.cache_line_bytes, pfn_to_phys(limits.max_low))?;
        debug!(
            "descriptor array: {} at 0x{base_phys:08x}",
            Fmt::<Bytes>::from(size)
        );

        Ok(FlatMemmap {
            base_phys,
            first_pfn,
            descriptor_size: platform.descriptor_size,
        })
    }

    /// Hand all free memory over to `allocator`. The bitmap is gone afterwards, and the tables
    /// are only kept for the report.
    pub fn handoff(
        self,
        memmap: &impl DescriptorMap,
        allocator: &mut impl PageAllocator,
    ) -> Result<HandoffReport> {
        let Self {
            memory,
            zones,
            mut bitmap,
        } = self;

        allocator.register_zones(&zones);

        let memmap_freed = free_unused_memmap(memory.banks(), memory.platform(), memmap, |phys, len| {
            bitmap.free(phys, len)
        })?;

        let low = bitmap.release_into(|pfn| allocator.release_page(pfn));
        let limits = *memory.limits();
        let high = free_highpages(memory.memory(), memory.reserved(), limits.max_low, |pfn| {
            allocator.release_page(pfn)
        });

        let report = HandoffReport {
            limits,
            total_frames: memory.memory().total_frames(),
            low,
            high_frames: high,
            memmap_freed,
        };
        info!("{report}");
        Ok(report)
    }
}

/// Summary of the handoff, printed to the kernel log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffReport {
    pub limits: BoundaryFrames,
    /// Frames backed by memory, high memory included.
    pub total_frames: u64,
    pub low: BitmapRelease,
    pub high_frames: u64,
    /// Bytes of descriptor storage given back before the handoff.
    pub memmap_freed: u64,
}

impl HandoffReport {
    pub fn free_frames(&self) -> u64 {
        self.low.total() + self.high_frames
    }

    pub fn reserved_frames(&self) -> u64 {
        self.total_frames - self.free_frames()
    }
}

impl Display for HandoffReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Memory: {}", Fmt::<Frames>::from(self.total_frames))?;
        writeln!(f, "├─ free:     {}", Fmt::<Frames>::from(self.free_frames()))?;
        writeln!(f, "├─ reserved: {}", Fmt::<Frames>::from(self.reserved_frames()))?;
        writeln!(f, "├─ highmem:  {}", Fmt::<Frames>::from(self.high_frames))?;
        write!(f, "└─ memmap:   {} freed", Fmt::<Bytes>::from(self.memmap_freed))
    }
}
