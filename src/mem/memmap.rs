//! Page descriptor array and reclamation of the parts nobody will ever look at.
//!
//! The descriptor array holds one record per frame of the node span. Frames in gaps between banks
//! never get used, so the descriptor storage backing those gaps can go back to the bitmap before
//! the handoff. The page allocator insists on valid descriptors around every bank up to the next
//! max-order boundary, which limits how much of a gap can be reclaimed. With sparse memory the
//! allocator also expects descriptors for the whole section a bank starts in.

use log::debug;
use types::fmt::{Bytes, Fmt};
use types::mem::{align_down, align_up, MemoryBank, PAGE_SIZE};

use super::error::Result;
use super::platform::{MemmapModel, Platform};

/// Where the descriptor of a frame lives.
pub trait DescriptorMap {
    /// Physical address of the descriptor of `pfn`.
    fn descriptor_phys(&self, pfn: u64) -> u64;

    fn descriptor_size(&self) -> u64;
}

/// A single descriptor array starting at `first_pfn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatMemmap {
    pub base_phys: u64,
    pub first_pfn: u64,
    pub descriptor_size: u64,
}

impl DescriptorMap for FlatMemmap {
    fn descriptor_phys(&self, pfn: u64) -> u64 {
        debug_assert!(pfn >= self.first_pfn);
        self.base_phys + (pfn - self.first_pfn) * self.descriptor_size
    }

    fn descriptor_size(&self) -> u64 {
        self.descriptor_size
    }
}

/// Free the whole pages of descriptor storage that only back frames in `[start_pfn, end_pfn)`.
/// Pages shared with descriptors of neighbouring frames are kept. Returns the bytes freed.
pub fn free_memmap(
    memmap: &impl DescriptorMap,
    start_pfn: u64,
    end_pfn: u64,
    free: &mut impl FnMut(u64, u64) -> Result<()>,
) -> Result<u64> {
    let size = memmap.descriptor_size();

    // Descriptor storage right after the last frame before the gap, and right after the last
    // frame of the gap.
    let pg = align_up(memmap.descriptor_phys(start_pfn - 1) + size, PAGE_SIZE);
    let pgend = align_down(memmap.descriptor_phys(end_pfn - 1) + size, PAGE_SIZE);

    if pg < pgend {
        free(pg, pgend - pg)?;
        Ok(pgend - pg)
    } else {
        Ok(0)
    }
}

/// Walk `banks` (sorted) and free the descriptor storage of every gap between them. Returns the
/// number of bytes handed to `free`.
pub fn free_unused_memmap(
    banks: &[MemoryBank],
    platform: &Platform,
    memmap: &impl DescriptorMap,
    mut free: impl FnMut(u64, u64) -> Result<()>,
) -> Result<u64> {
    let max_order = platform.max_order_pages;
    let mut prev_end = 0;
    let mut freed = 0;

    for bank in banks {
        let bank_start = match platform.memmap {
            // Free up to the section the bank starts in, or up to the bank itself when it
            // starts in the section of the previous bank.
            MemmapModel::Sparse { pages_per_section } => core::cmp::max(
                core::cmp::min(bank.start_frame, align_up(prev_end, pages_per_section)),
                align_down(bank.start_frame, pages_per_section),
            ),
            MemmapModel::Flat => align_down(bank.start_frame, max_order),
        };

        if prev_end != 0 && prev_end < bank_start {
            freed += free_memmap(memmap, prev_end, bank_start, &mut free)?;
        }

        prev_end = align_up(bank.end_frame, max_order);
    }

    if let MemmapModel::Sparse { pages_per_section } = platform.memmap {
        let section_end = align_up(prev_end, pages_per_section);
        if prev_end != section_end {
            freed += free_memmap(memmap, prev_end, section_end, &mut free)?;
        }
    }

    debug!("freed {} of unused page descriptors", Fmt::<Bytes>::from(freed));
    Ok(freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::platform::{MAX_ORDER_NR_PAGES, PAGES_PER_SECTION};
    use types::mem::pfn_to_phys;

    const BASE: u64 = 0x0010_0000;

    fn flat(max_order_pages: u64) -> Platform {
        Platform::pc().with_memmap(MemmapModel::Flat, max_order_pages)
    }

    fn reclaim(
        banks: &[MemoryBank],
        platform: &Platform,
        descriptor_size: u64,
    ) -> (u64, Vec<(u64, u64)>) {
        let memmap = FlatMemmap {
            base_phys: BASE,
            first_pfn: 0,
            descriptor_size,
        };
        let mut freed = Vec::new();
        let total = free_unused_memmap(banks, platform, &memmap, |phys, len| {
            freed.push((phys, len));
            Ok(())
        })
        .unwrap();
        (total, freed)
    }

    #[test]
    fn gap_between_banks_frees_whole_pages() {
        // Descriptors of frames 50..60 sit at 50 KiB..60 KiB: pages 13 and 14 hold nothing else.
        let banks = [MemoryBank::low(0, 50), MemoryBank::low(60, 100)];
        let (total, freed) = reclaim(&banks, &flat(1), 1024);
        assert_eq!(freed, [(BASE + 13 * PAGE_SIZE, 2 * PAGE_SIZE)]);
        assert_eq!(total, 2 * PAGE_SIZE);
    }

    #[test]
    fn sub_page_gap_frees_nothing() {
        // 10 descriptors of 32 bytes never fill a page.
        let banks = [MemoryBank::low(0, 50), MemoryBank::low(60, 100)];
        assert_eq!(reclaim(&banks, &flat(1), 32), (0, Vec::new()));
    }

    #[test]
    fn contiguous_banks_free_nothing() {
        let banks = [MemoryBank::low(0, 50), MemoryBank::low(50, 100)];
        assert_eq!(reclaim(&banks, &flat(1), 4096), (0, Vec::new()));
    }

    #[test]
    fn gap_within_max_order_block_is_kept() {
        let banks = [MemoryBank::low(0, 0x300), MemoryBank::low(0x380, 0x1000)];
        assert_eq!(reclaim(&banks, &flat(MAX_ORDER_NR_PAGES), 32), (0, Vec::new()));
    }

    #[test]
    fn flat_gap_is_rounded_to_max_order_blocks() {
        // Kept: descriptors up to 0x400 and from 0x2000. 0x1c00 descriptors of 32 bytes in between.
        let banks = [MemoryBank::low(0, 0x300), MemoryBank::low(0x2100, 0x3000)];
        let (total, freed) = reclaim(&banks, &flat(MAX_ORDER_NR_PAGES), 32);
        assert_eq!(freed, [(BASE + 0x400 * 32, 0x1c00 * 32)]);
        assert_eq!(total, 0x1c00 * 32);
    }

    fn sparse() -> Platform {
        Platform::pc().with_memmap(
            MemmapModel::Sparse {
                pages_per_section: PAGES_PER_SECTION,
            },
            MAX_ORDER_NR_PAGES,
        )
    }

    #[test]
    fn sparse_frees_missing_sections() {
        // Second bank starts two sections later: the rest of the first section and both empty
        // sections are freed, plus the tail of the last section.
        let banks = [
            MemoryBank::low(0, 0x1800),
            MemoryBank::low(3 * PAGES_PER_SECTION, 3 * PAGES_PER_SECTION + 0x800),
        ];
        let (total, freed) = reclaim(&banks, &sparse(), 32);
        let tail = 3 * PAGES_PER_SECTION + 0x800;
        assert_eq!(
            freed,
            [
                (BASE + 0x1800 * 32, (3 * PAGES_PER_SECTION - 0x1800) * 32),
                (BASE + tail * 32, (PAGES_PER_SECTION - 0x800) * 32),
            ]
        );
        assert_eq!(total, (4 * PAGES_PER_SECTION - 0x2000) * 32);

        let empty = (
            BASE + PAGES_PER_SECTION * 32,
            BASE + 3 * PAGES_PER_SECTION * 32,
        );
        let (phys, len) = freed[0];
        assert!(phys <= empty.0 && empty.1 <= phys + len);
        assert!(freed.iter().all(|&(phys, len)| phys % PAGE_SIZE == 0 && len % PAGE_SIZE == 0));
    }

    #[test]
    fn sparse_gap_within_a_section() {
        // Both banks share the first section: the gap between them goes, max-order rounded.
        let banks = [
            MemoryBank::low(0, 0x800),
            MemoryBank::low(0x2000, 0x2800),
        ];
        let (total, freed) = reclaim(&banks, &sparse(), 32);
        assert_eq!(freed[0], (BASE + 0x800 * 32, 0x1800 * 32));
        assert_eq!(total, (0x1800 + PAGES_PER_SECTION - 0x2800) * 32);
    }

    #[test]
    fn descriptor_addresses() {
        let memmap = FlatMemmap {
            base_phys: pfn_to_phys(0x80),
            first_pfn: 0x400,
            descriptor_size: 32,
        };
        assert_eq!(memmap.descriptor_phys(0x400), pfn_to_phys(0x80));
        assert_eq!(memmap.descriptor_phys(0x480), pfn_to_phys(0x80) + 0x80 * 32);
    }
}
