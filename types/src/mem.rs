use core::cmp::{max, min};
use core::fmt::{Display, Formatter, Result};

use crate::fmt::{Bytes, Fmt};

/// Number of address bits that select a byte within a page frame.
pub const PAGE_SHIFT: u32 = 12;

/// Size of a page frame in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Frame containing the byte at `addr`.
pub const fn pfn_down(addr: u64) -> u64 {
    addr >> PAGE_SHIFT
}

/// First frame starting at or above `addr`.
pub const fn pfn_up(addr: u64) -> u64 {
    addr.div_ceil(PAGE_SIZE)
}

/// Physical address of the first byte of frame `pfn`.
pub const fn pfn_to_phys(pfn: u64) -> u64 {
    pfn << PAGE_SHIFT
}

/// Round `value` up to the next multiple of `align`, which must be a power of two.
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to the previous multiple of `align`, which must be a power of two.
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// A half-open range `[start, end)` of physical page frame numbers.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRange {
    pub start: u64,
    pub end: u64,
}

impl FrameRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Frames lying completely inside the byte range `[base, base + size)`. This is how RAM is
    /// converted to frames: a partially present frame is not usable.
    pub fn inside(base: u64, size: u64) -> Self {
        let start = pfn_up(base);
        Self {
            start,
            end: max(start, pfn_down(base.saturating_add(size))),
        }
    }

    /// Frames touched by the byte range `[base, base + size)`. This is how reservations are
    /// converted to frames: a partially reserved frame is reserved.
    pub fn around(base: u64, size: u64) -> Self {
        Self {
            start: pfn_down(base),
            end: pfn_up(base.saturating_add(size)),
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, pfn: u64) -> bool {
        self.start <= pfn && pfn < self.end
    }

    /// Whether `other` lies entirely within this range. Empty ranges are contained everywhere.
    pub fn contains_range(&self, other: &FrameRange) -> bool {
        other.is_empty() || (self.start <= other.start && other.end <= self.end)
    }

    /// Whether both ranges share at least one frame.
    pub fn overlaps(&self, other: &FrameRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &FrameRange) -> Option<FrameRange> {
        self.crop(other.start, other.end)
    }

    pub fn crop_start(self, min_pfn: u64) -> Option<Self> {
        (min_pfn < self.end).then(|| Self {
            start: max(self.start, min_pfn),
            ..self
        })
    }

    pub fn crop_end(self, max_pfn: u64) -> Option<Self> {
        (max_pfn > self.start).then(|| Self {
            end: min(self.end, max_pfn),
            ..self
        })
    }

    /// Restrict the range to `[min_pfn, max_pfn)`, or `None` if nothing remains.
    pub fn crop(self, min_pfn: u64, max_pfn: u64) -> Option<Self> {
        self.crop_start(min_pfn)
            .and_then(|range| range.crop_end(max_pfn))
            .filter(|range| !range.is_empty())
    }

    pub fn phys_start(&self) -> u64 {
        pfn_to_phys(self.start)
    }

    pub fn phys_end(&self) -> u64 {
        pfn_to_phys(self.end)
    }

    pub fn byte_len(&self) -> u64 {
        pfn_to_phys(self.len())
    }

    pub fn iter(&self) -> core::ops::Range<u64> {
        self.start..self.end
    }
}

impl core::fmt::Debug for FrameRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{:#x}..{:#x}", self.start, self.end)
    }
}

impl Display for FrameRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "0x{:08x}-0x{:08x} ({})",
            self.phys_start(),
            self.phys_end(),
            Fmt::<Bytes>::from(self.byte_len())
        )
    }
}

/// One contiguous, hardware-reported range of RAM.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryBank {
    pub start_frame: u64,
    pub end_frame: u64,
    /// Frames of this bank are not permanently mapped into the kernel's address space.
    pub is_high_memory: bool,
}

impl MemoryBank {
    pub const fn low(start_frame: u64, end_frame: u64) -> Self {
        Self {
            start_frame,
            end_frame,
            is_high_memory: false,
        }
    }

    pub const fn high(start_frame: u64, end_frame: u64) -> Self {
        Self {
            start_frame,
            end_frame,
            is_high_memory: true,
        }
    }

    pub fn frames(&self) -> FrameRange {
        FrameRange::new(self.start_frame, self.end_frame)
    }

    /// Turn a firmware memory map into memory banks. Only usable regions are considered. Regions
    /// are split at `lowmem_limit` (a physical address); everything above it is high memory. The
    /// result is in firmware order and still needs to be sorted.
    pub fn from_memory_map<T>(regions: T, lowmem_limit: u64) -> impl Iterator<Item = MemoryBank>
    where
        T: Iterator<Item = MemoryRegion> + Clone,
    {
        let (low, high) = regions.filter(MemoryRegion::is_usable).split_once(lowmem_limit);
        let bank = |region: MemoryRegion, is_high_memory| {
            let frames = region.frames();
            (!frames.is_empty()).then_some(MemoryBank {
                start_frame: frames.start,
                end_frame: frames.end,
                is_high_memory,
            })
        };

        low.filter_map(move |region| bank(region, false))
            .chain(high.filter_map(move |region| bank(region, true)))
    }
}

impl Display for MemoryBank {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} ({})",
            self.frames(),
            if self.is_high_memory { "highmem" } else { "lowmem" }
        )
    }
}

/// A region of the physical address space as reported by the firmware or bootloader.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base_addr: u64,
    pub length: u64,
    pub class: MemoryRegionType,
}

impl MemoryRegion {
    pub const fn new(base_addr: u64, length: u64, class: MemoryRegionType) -> Self {
        Self {
            base_addr,
            length,
            class,
        }
    }

    pub fn with_end_addr(self, end_addr: u64) -> Self {
        Self {
            length: end_addr - self.base_addr,
            ..self
        }
    }

    pub fn end_addr(&self) -> u64 {
        self.base_addr.saturating_add(self.length)
    }

    /// Frames entirely covered by this region.
    pub fn frames(&self) -> FrameRange {
        FrameRange::inside(self.base_addr, self.length)
    }

    pub fn is_usable(&self) -> bool {
        self.class == MemoryRegionType::Available
    }
}

impl core::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "(@ 0x{:x}, len: {} KiB, {})",
            self.base_addr,
            self.length / 1024,
            self.class,
        )
    }
}

impl Display for MemoryRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "@ 0x{:x}: {} ({})",
            self.base_addr,
            Fmt::<Bytes>::from(self.length),
            self.class
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    Available,
    Unusable,
    Reclaimable,
}

impl Display for MemoryRegionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match self {
            Self::Available => "usable",
            Self::Unusable => "reserved",
            Self::Reclaimable => "reclaimable",
        })
    }
}

pub trait RangeFilterExt<T> {
    /// Restrict every region to the address range `[start, end)`; `None` means no upper bound.
    fn filter_range(self, start: u64, end: Option<u64>) -> RangeFilter<T>;

    /// Split the memory map iterator at address `addr` into two iterators.
    fn split_once(self, addr: u64) -> (RangeFilter<T>, RangeFilter<T>);
}

impl<T> RangeFilterExt<T> for T
where
    T: Iterator<Item = MemoryRegion> + Clone,
{
    fn filter_range(self, start: u64, end: Option<u64>) -> RangeFilter<T> {
        RangeFilter {
            iter: self,
            start,
            end,
        }
    }

    fn split_once(self, addr: u64) -> (RangeFilter<T>, RangeFilter<T>) {
        (
            self.clone().filter_range(0, Some(addr)),
            self.filter_range(addr, None),
        )
    }
}

#[derive(Clone)]
pub struct RangeFilter<T> {
    iter: T,
    start: u64,
    end: Option<u64>,
}

/// Check whether `region` overlaps with the address range `[start, end)`.
fn overlaps_with(region: &MemoryRegion, start: u64, end: Option<u64>) -> bool {
    region.end_addr() > start && end.map_or(true, |end| region.base_addr < end)
}

impl<T> Iterator for RangeFilter<T>
where
    T: Iterator<Item = MemoryRegion>,
{
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, end) = (self.start, self.end);
        let region = self.iter.find(|region| overlaps_with(region, start, end))?;
        let end = self
            .end
            .map_or(region.end_addr(), |end| min(end, region.end_addr()));

        Some(
            MemoryRegion {
                base_addr: max(self.start, region.base_addr),
                ..region
            }
            .with_end_addr(end),
        )
    }
}

impl<T> core::fmt::Debug for RangeFilter<T>
where
    T: Iterator<Item = MemoryRegion> + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list().entries((*self).clone()).finish()
    }
}
