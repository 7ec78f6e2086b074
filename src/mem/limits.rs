use core::fmt::{Display, Formatter};

use types::mem::{pfn_to_phys, MemoryBank};

use super::error::{ConfigError, Result};

/// Zone boundaries derived from the bank list.
///
/// ```text
/// +--max_high-----+---------------+
/// |               |               |
/// |               |          high |
/// +--max_low------+---------------+
/// |               |    normal     |
/// +---min---------+---------------+
/// |               | DMA           |
/// +---------------+---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryFrames {
    /// Lowest present frame.
    pub min: u64,
    /// End of the last low memory bank.
    pub max_low: u64,
    /// End of the last bank.
    pub max_high: u64,
}

impl BoundaryFrames {
    /// Derive the boundaries from `banks`, which must be sorted by start frame.
    pub fn find(banks: &[MemoryBank]) -> Result<Self> {
        let (first, last) = match banks {
            [] => return Err(ConfigError::NoBanks.into()),
            [first, .., last] => (first, last),
            [only] => (only, only),
        };

        let first_high = banks
            .iter()
            .position(|bank| bank.is_high_memory)
            .unwrap_or(banks.len());
        let last_low = first_high
            .checked_sub(1)
            .ok_or(ConfigError::HighMemoryFirst)?;

        let limits = Self {
            min: first.start_frame,
            max_low: banks[last_low].end_frame,
            max_high: last.end_frame,
        };
        debug_assert!(limits.min <= limits.max_low && limits.max_low <= limits.max_high);
        Ok(limits)
    }

    pub fn has_high_memory(&self) -> bool {
        self.max_high > self.max_low
    }

    pub fn low_frames(&self) -> u64 {
        self.max_low - self.min
    }

    pub fn high_frames(&self) -> u64 {
        self.max_high - self.max_low
    }
}

impl Display for BoundaryFrames {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "min 0x{:08x}, max_low 0x{:08x}, max_high 0x{:08x}",
            pfn_to_phys(self.min),
            pfn_to_phys(self.max_low),
            pfn_to_phys(self.max_high)
        )
    }
}
