//! Release of high memory. High frames are not covered by the boot bitmap, so they go straight from
//! the interval tables to the page allocator.

use log::debug;
use types::fmt::{Fmt, Frames};

use super::interval::IntervalTable;

/// Release every frame at or above `max_low` that is memory and not reserved, one page at a time.
/// Returns the number of pages released.
pub fn free_highpages(
    memory: &IntervalTable,
    reserved: &IntervalTable,
    max_low: u64,
    mut release: impl FnMut(u64),
) -> u64 {
    let mut released = 0;
    for range in memory.clipped(max_low, u64::MAX) {
        for free in reserved.subtract_from(range) {
            debug!("├─ highmem {free}");
            free.iter().for_each(&mut release);
            released += free.len();
        }
    }
    debug!("└─ highmem: {} released", Fmt::<Frames>::from(released));
    released
}
