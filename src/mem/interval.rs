//! Sorted tables of frame ranges. The boot code keeps two of them: the frames that are backed by
//! RAM ("memory") and the frames that are in use before any allocator exists ("reserved").

use core::cmp::{max, min};
use core::fmt::{Display, Formatter};

use arrayvec::ArrayVec;
use types::fmt::{Fmt, Frames};
use types::mem::FrameRange;

use super::error::{ConfigError, Result};

/// Capacity of an interval table. Inserting merges neighbours, so this only limits the number of
/// disjoint ranges.
pub const MAX_REGIONS: usize = 128;

/// An ordered set of disjoint, non-adjacent frame ranges.
#[derive(Clone)]
pub struct IntervalTable {
    name: &'static str,
    /// First frame beyond the physical address space.
    limit: u64,
    regions: ArrayVec<FrameRange, MAX_REGIONS>,
}

impl IntervalTable {
    pub fn new(name: &'static str, limit: u64) -> Self {
        Self {
            name,
            limit,
            regions: ArrayVec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn check_bounds(&self, range: FrameRange) -> Result<()> {
        if range.end > self.limit || range.start > range.end {
            return Err(ConfigError::OutsideAddressSpace {
                start: range.start,
                end: range.end,
            }
            .into());
        }
        Ok(())
    }

    /// Add `range` to the table, merging it with every range it overlaps or touches.
    pub fn insert(&mut self, range: FrameRange) -> Result<()> {
        self.check_bounds(range)?;
        if range.is_empty() {
            return Ok(());
        }

        // First region that ends at or after the new start is the first merge candidate.
        let first = self.regions.partition_point(|region| region.end < range.start);
        let mut merged = range;
        let mut last = first;
        while last < self.regions.len() && self.regions[last].start <= merged.end {
            merged.start = min(merged.start, self.regions[last].start);
            merged.end = max(merged.end, self.regions[last].end);
            last += 1;
        }

        if first == last {
            self.regions
                .try_insert(first, merged)
                .map_err(|_| ConfigError::TableFull { max: MAX_REGIONS })?;
        } else {
            self.regions[first] = merged;
            self.regions.drain(first + 1..last);
        }
        Ok(())
    }

    /// Remove `range` from the table, clipping or splitting the ranges it overlaps.
    pub fn remove(&mut self, range: FrameRange) -> Result<()> {
        self.check_bounds(range)?;
        if range.is_empty() {
            return Ok(());
        }

        let mut index = self.regions.partition_point(|region| region.end <= range.start);
        while index < self.regions.len() && self.regions[index].start < range.end {
            let region = self.regions[index];
            let left = FrameRange::new(region.start, min(region.end, range.start));
            let right = FrameRange::new(max(region.start, range.end), region.end);

            match (left.is_empty(), right.is_empty()) {
                (false, false) => {
                    self.regions[index] = left;
                    self.regions
                        .try_insert(index + 1, right)
                        .map_err(|_| ConfigError::TableFull { max: MAX_REGIONS })?;
                    break;
                }
                (false, true) => {
                    self.regions[index] = left;
                    index += 1;
                }
                (true, false) => {
                    self.regions[index] = right;
                    index += 1;
                }
                (true, true) => {
                    self.regions.remove(index);
                }
            }
        }
        Ok(())
    }

    /// Whether every frame of `range` is in the table.
    pub fn contains_fully(&self, range: FrameRange) -> bool {
        range.is_empty() || self.regions.iter().any(|region| region.contains_range(&range))
    }

    /// Whether any frame of `range` is in the table.
    pub fn overlaps(&self, range: FrameRange) -> bool {
        self.regions.iter().any(|region| region.overlaps(&range))
    }

    pub fn contains(&self, pfn: u64) -> bool {
        self.regions.iter().any(|region| region.contains(pfn))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = FrameRange> + Clone + '_ {
        self.regions.iter().copied()
    }

    /// All ranges restricted to `[start, end)`, empty results skipped.
    pub fn clipped(&self, start: u64, end: u64) -> impl Iterator<Item = FrameRange> + '_ {
        self.iter().filter_map(move |region| region.crop(start, end))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn first(&self) -> Option<FrameRange> {
        self.regions.first().copied()
    }

    pub fn last(&self) -> Option<FrameRange> {
        self.regions.last().copied()
    }

    pub fn total_frames(&self) -> u64 {
        self.iter().map(|region| region.len()).sum()
    }

    /// The parts of `range` not covered by this table, in ascending order.
    pub fn subtract_from(&self, range: FrameRange) -> Subtract<'_> {
        Subtract {
            holes: self.regions.iter(),
            cursor: range.start,
            end: range.end,
        }
    }

    /// Every frame range of this table that is not covered by `holes`.
    pub fn without<'a>(
        &'a self,
        holes: &'a IntervalTable,
    ) -> impl Iterator<Item = FrameRange> + 'a {
        self.iter().flat_map(move |region| holes.subtract_from(region))
    }
}

impl Display for IntervalTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        for region in self.iter() {
            writeln!(f, "├─ {region}")?;
        }
        write!(
            f,
            "└─ {}: {} in {} regions",
            self.name,
            Fmt::<Frames>::from(self.total_frames()),
            self.len()
        )
    }
}

impl core::fmt::Debug for IntervalTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over `range \ holes`: a cursor walks `range` and jumps over every hole it meets,
/// yielding the gaps in between.
#[derive(Clone)]
pub struct Subtract<'a> {
    holes: core::slice::Iter<'a, FrameRange>,
    cursor: u64,
    end: u64,
}

impl Iterator for Subtract<'_> {
    type Item = FrameRange;

    fn next(&mut self) -> Option<FrameRange> {
        while self.cursor < self.end {
            let Some(hole) = self.holes.next() else {
                let rest = FrameRange::new(self.cursor, self.end);
                self.cursor = self.end;
                return Some(rest);
            };

            // Entirely below the cursor: nothing to skip.
            if hole.end <= self.cursor {
                continue;
            }

            let gap = FrameRange::new(self.cursor, min(hole.start, self.end));
            self.cursor = min(self.end, max(self.cursor, hole.end));
            if !gap.is_empty() {
                return Some(gap);
            }
        }
        None
    }
}
