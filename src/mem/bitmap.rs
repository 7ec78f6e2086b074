//! Bootstrap bitmap allocator.
//!
//! One bit per frame of low memory (`[min, max_low)`), set for reserved frames and clear for free
//! ones. It serves allocations until the general page allocator takes over, at which point every
//! clear bit is handed over and the bitmap's own storage is released last.

use core::fmt::{Display, Formatter};

use log::debug;
use types::fmt::{Fmt, Frames};
use types::mem::{align_up, pfn_down, pfn_to_phys, FrameRange, PAGE_SHIFT, PAGE_SIZE};

use super::error::{BootMemError, ConfigError, Result};
use super::interval::IntervalTable;

pub struct BootBitmap<'a> {
    map: &'a mut [u8],
    /// Frames covered by the bitmap.
    frames: FrameRange,
    /// Frames holding `map` itself. Reserved while the bitmap is in use.
    storage: FrameRange,
}

/// Frames handed over by [`BootBitmap::release_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitmapRelease {
    pub free_frames: u64,
    pub storage_frames: u64,
}

impl BitmapRelease {
    pub fn total(&self) -> u64 {
        self.free_frames + self.storage_frames
    }
}

impl<'a> BootBitmap<'a> {
    /// Size of a bitmap covering `frames` frames, rounded to whole 32-bit words.
    pub const fn bytes_needed(frames: u64) -> u64 {
        align_up(frames.div_ceil(8), 4)
    }

    pub const fn pages_needed(frames: u64) -> u64 {
        Self::bytes_needed(frames).div_ceil(PAGE_SIZE)
    }

    /// Create a bitmap over `frames` backed by `map`. Every frame starts out reserved.
    pub fn new(map: &'a mut [u8], frames: FrameRange, storage: FrameRange) -> Result<Self> {
        if (map.len() as u64) < Self::bytes_needed(frames.len()) {
            return Err(ConfigError::OutsideBitmap {
                start: frames.start,
                end: frames.end,
            }
            .into());
        }
        map.fill(0xff);
        Ok(Self {
            map,
            frames,
            storage,
        })
    }

    /// Clear every frame backed by `memory`, then set every frame in `reserved` again. A frame that
    /// is both memory and reserved ends up reserved.
    pub fn init(&mut self, memory: &IntervalTable, reserved: &IntervalTable) {
        self.map.fill(0xff);
        let FrameRange { start, end } = self.frames;
        for region in memory.clipped(start, end) {
            self.mark(region, false);
        }
        for region in reserved.clipped(start, end) {
            self.mark(region, true);
        }
        debug!(
            "boot bitmap: {} covering {}, {} free",
            self.storage,
            self.frames,
            Fmt::<Frames>::from(self.free_frames())
        );
    }

    /// Set or clear the bits of `range`, which must lie within the bitmap.
    fn mark(&mut self, range: FrameRange, reserved: bool) {
        for pfn in range.iter() {
            let bit = (pfn - self.frames.start) as usize;
            let mask = 1u8 << (bit % 8);
            if reserved {
                self.map[bit / 8] |= mask;
            } else {
                self.map[bit / 8] &= !mask;
            }
        }
    }

    /// Frames outside the bitmap count as reserved.
    pub fn is_reserved(&self, pfn: u64) -> bool {
        if !self.frames.contains(pfn) {
            return true;
        }
        let bit = (pfn - self.frames.start) as usize;
        self.map[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn frames(&self) -> FrameRange {
        self.frames
    }

    pub fn storage(&self) -> FrameRange {
        self.storage
    }

    pub fn free_frames(&self) -> u64 {
        self.frames.iter().filter(|&pfn| !self.is_reserved(pfn)).count() as u64
    }

    pub fn reserved_frames(&self) -> u64 {
        self.frames.len() - self.free_frames()
    }

    fn check(&self, range: FrameRange) -> Result<()> {
        if range.is_empty() || self.frames.contains_range(&range) {
            Ok(())
        } else {
            Err(ConfigError::OutsideBitmap {
                start: range.start,
                end: range.end,
            }
            .into())
        }
    }

    /// Mark every frame touched by `[phys, phys + len)` as reserved.
    pub fn reserve(&mut self, phys: u64, len: u64) -> Result<()> {
        let range = FrameRange::around(phys, len);
        self.check(range)?;
        self.mark(range, true);
        Ok(())
    }

    /// Mark every frame completely inside `[phys, phys + len)` as free.
    pub fn free(&mut self, phys: u64, len: u64) -> Result<()> {
        let range = FrameRange::inside(phys, len);
        self.check(range)?;
        self.mark(range, false);
        Ok(())
    }

    /// Claim the lowest run of free frames that holds `size` bytes, starts at a multiple of
    /// `align` and ends at or below the physical address `limit`. Returns the physical address.
    pub fn alloc(&mut self, size: u64, align: u64, limit: u64) -> Result<u64> {
        if size == 0 || !align.is_power_of_two() {
            return Err(ConfigError::InvalidRequest { size, align }.into());
        }

        let count = size.div_ceil(PAGE_SIZE);
        let step = core::cmp::max(1, align >> PAGE_SHIFT);
        let end = core::cmp::min(self.frames.end, pfn_down(limit));

        let mut start = align_up(self.frames.start, step);
        while start + count <= end {
            let run = FrameRange::new(start, start + count);
            match run.iter().rev().find(|&pfn| self.is_reserved(pfn)) {
                Some(busy) => start = align_up(busy + 1, step),
                None => {
                    self.mark(run, true);
                    return Ok(pfn_to_phys(start));
                }
            }
        }

        Err(BootMemError::AllocationExhausted { size, align, limit })
    }

    /// Hand every free frame to `release`, followed by the frames that stored the bitmap.
    pub fn release_into(self, mut release: impl FnMut(u64)) -> BitmapRelease {
        let mut freed = BitmapRelease::default();
        for pfn in self.frames.iter().filter(|&pfn| !self.is_reserved(pfn)) {
            release(pfn);
            freed.free_frames += 1;
        }

        // The bitmap must not be read past this point.
        for pfn in self.storage.iter() {
            release(pfn);
            freed.storage_frames += 1;
        }
        freed
    }
}

impl Display for BootBitmap<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: {} free, {} reserved",
            self.frames,
            Fmt::<Frames>::from(self.free_frames()),
            Fmt::<Frames>::from(self.reserved_frames())
        )
    }
}
