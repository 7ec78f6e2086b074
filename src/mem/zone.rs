//! Zone sizes and holes.
//!
//! The general page allocator manages frames per zone. Low memory always forms one zone; with DMA
//! support its bottom is carved out into a zone of its own, and high memory gets a third zone.
//! For each zone the allocator needs the number of frames spanned and how many of those are holes,
//! i.e. not backed by any memory bank.

use core::fmt::{Display, Formatter};

use arrayvec::ArrayVec;
use types::fmt::{Fmt, Frames};
use types::mem::{FrameRange, PAGE_SHIFT, PAGE_SIZE};

use super::error::{ConfigError, Result};
use super::interval::IntervalTable;
use super::limits::BoundaryFrames;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    /// Bottom of low memory, reachable by devices with limited addressing.
    Dma,
    /// Permanently mapped low memory.
    Normal,
    /// Memory that needs temporary mappings.
    HighMem,
}

impl Display for ZoneKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Dma => "DMA",
            Self::Normal => "Normal",
            Self::HighMem => "HighMem",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub kind: ZoneKind,
    pub base_frame: u64,
    pub frame_count: u64,
    pub hole_count: u64,
}

impl Zone {
    /// Account for `frames`: every frame not covered by `memory` is a hole.
    fn measure(kind: ZoneKind, frames: FrameRange, memory: &IntervalTable) -> Self {
        let present: u64 = memory
            .clipped(frames.start, frames.end)
            .map(|region| region.len())
            .sum();

        Self {
            kind,
            base_frame: frames.start,
            frame_count: frames.len(),
            hole_count: frames.len() - present,
        }
    }

    pub fn frames(&self) -> FrameRange {
        FrameRange::new(self.base_frame, self.base_frame + self.frame_count)
    }
}

impl Display for Zone {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:<8} {}, holes: {}",
            self.kind,
            self.frames(),
            Fmt::<Frames>::from(self.hole_count)
        )
    }
}

/// The zones of the single memory node, ordered by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSet {
    zones: ArrayVec<Zone, 3>,
}

impl ZoneSet {
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn get(&self, kind: ZoneKind) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.kind == kind)
    }

    pub fn total_frames(&self) -> u64 {
        self.zones.iter().map(|zone| zone.frame_count).sum()
    }

    pub fn total_holes(&self) -> u64 {
        self.zones.iter().map(|zone| zone.hole_count).sum()
    }
}

impl Display for ZoneSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let mut zones = self.zones.iter().peekable();
        while let Some(zone) = zones.next() {
            let branch = if zones.peek().is_some() { "├─" } else { "└─" };
            writeln!(f, "{branch} {zone}")?;
        }
        Ok(())
    }
}

/// Selects which zones exist on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneSetBuilder {
    highmem: bool,
    dma_zone_bytes: Option<u64>,
}

impl ZoneSetBuilder {
    /// Low memory only.
    pub const fn new() -> Self {
        Self {
            highmem: false,
            dma_zone_bytes: None,
        }
    }

    pub const fn with_highmem(self) -> Self {
        Self {
            highmem: true,
            ..self
        }
    }

    /// Carve a DMA zone of `bytes` from the bottom of low memory. Zero disables the DMA zone;
    /// other sizes below a page are rejected by [`ZoneSetBuilder::build`].
    pub const fn with_dma_zone(self, bytes: u64) -> Self {
        Self {
            dma_zone_bytes: if bytes == 0 { None } else { Some(bytes) },
            ..self
        }
    }

    pub const fn dma_zone_bytes(&self) -> Option<u64> {
        self.dma_zone_bytes
    }

    pub const fn has_highmem(&self) -> bool {
        self.highmem
    }

    /// Compute the zone sizes and holes for the node spanning `limits`.
    pub fn build(&self, limits: &BoundaryFrames, memory: &IntervalTable) -> Result<ZoneSet> {
        if !self.highmem && limits.has_high_memory() {
            return Err(ConfigError::HighMemoryUnsupported {
                frames: limits.high_frames(),
            }
            .into());
        }

        let low = FrameRange::new(limits.min, limits.max_low);
        let mut zones = ArrayVec::new();

        if let Some(bytes) = self.dma_zone_bytes.filter(|&bytes| bytes < PAGE_SIZE) {
            return Err(ConfigError::DmaZoneTooSmall { bytes }.into());
        }

        match self.dma_zone_bytes.map(|bytes| bytes >> PAGE_SHIFT) {
            Some(dma_frames) if dma_frames > low.len() => {
                return Err(ConfigError::DmaZoneTooLarge {
                    dma_frames,
                    low_frames: low.len(),
                }
                .into());
            }
            // A DMA zone as large as low memory is just low memory.
            Some(dma_frames) if dma_frames < low.len() => {
                let split = low.start + dma_frames;
                zones.push(Zone::measure(
                    ZoneKind::Dma,
                    FrameRange::new(low.start, split),
                    memory,
                ));
                zones.push(Zone::measure(
                    ZoneKind::Normal,
                    FrameRange::new(split, low.end),
                    memory,
                ));
            }
            _ => zones.push(Zone::measure(ZoneKind::Normal, low, memory)),
        }

        if self.highmem {
            zones.push(Zone::measure(
                ZoneKind::HighMem,
                FrameRange::new(limits.max_low, limits.max_high),
                memory,
            ));
        }

        Ok(ZoneSet { zones })
    }
}
