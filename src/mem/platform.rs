//! Machine description: everything the boot memory code needs to know about the platform besides
//! the memory banks themselves.

use types::mem::PAGE_SHIFT;

use super::context::BootMemoryContext;
use super::error::Result;
use super::zone::ZoneSetBuilder;

/// Max size of physical memory direct mapping on 32-bit x86 (virtual address space size limit).
pub const PHYS_MAP_LIMIT: u64 = 0x0800_0000; // 128 MiB

/// ISA DMA controllers can only address the first 16 MiB.
pub const ISA_DMA_LIMIT: u64 = 0x0100_0000;

/// Cache line size of the Pentium III.
pub const L1_CACHE_BYTES: u64 = 32;

/// Largest buddy allocation order plus one.
pub const MAX_ORDER: u32 = 11;

/// Frames in a maximum-order buddy block.
pub const MAX_ORDER_NR_PAGES: u64 = 1 << (MAX_ORDER - 1);

/// Size of a sparse memory section (64 MiB) as a power of two.
pub const SECTION_SIZE_BITS: u32 = 26;

pub const PAGES_PER_SECTION: u64 = 1 << (SECTION_SIZE_BITS - PAGE_SHIFT);

/// Size of one page descriptor on a 32-bit kernel.
pub const PAGE_DESCRIPTOR_SIZE: u64 = 32;

/// Platform hook that adds machine specific reservations before the tables are sealed.
pub type ReserveFn = fn(&mut BootMemoryContext) -> Result<()>;

/// How page descriptors are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemmapModel {
    /// One descriptor array for the whole node. Descriptors must exist for every frame from a
    /// bank start rounded down to a max-order block up to the bank end rounded up.
    Flat,
    /// Descriptors only exist for present memory sections.
    Sparse { pages_per_section: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct Platform {
    /// Width of a physical address. 32 without PAE, 36 with.
    pub phys_addr_bits: u32,
    pub cache_line_bytes: u64,
    /// Frames in a maximum-order buddy block.
    pub max_order_pages: u64,
    pub descriptor_size: u64,
    pub memmap: MemmapModel,
    pub zones: ZoneSetBuilder,
    /// Difference between a kernel virtual address and its physical address for directly mapped
    /// memory.
    pub page_offset: u64,
    pub reserve: Option<ReserveFn>,
}

impl Platform {
    /// A Pentium-class PC: ISA DMA zone below 16 MiB, direct mapping up to 128 MiB, high memory
    /// above that, kernel mapped at 3 GiB.
    pub const fn pc() -> Self {
        Self {
            phys_addr_bits: 32,
            cache_line_bytes: L1_CACHE_BYTES,
            max_order_pages: MAX_ORDER_NR_PAGES,
            descriptor_size: PAGE_DESCRIPTOR_SIZE,
            memmap: MemmapModel::Flat,
            zones: ZoneSetBuilder::new()
                .with_highmem()
                .with_dma_zone(ISA_DMA_LIMIT),
            page_offset: 0xc000_0000,
            reserve: None,
        }
    }

    pub const fn with_zones(self, zones: ZoneSetBuilder) -> Self {
        Self { zones, ..self }
    }

    pub const fn with_memmap(self, memmap: MemmapModel, max_order_pages: u64) -> Self {
        Self {
            memmap,
            max_order_pages,
            ..self
        }
    }

    pub const fn with_descriptor_size(self, descriptor_size: u64) -> Self {
        Self {
            descriptor_size,
            ..self
        }
    }

    pub const fn with_reserve(self, reserve: ReserveFn) -> Self {
        Self {
            reserve: Some(reserve),
            ..self
        }
    }

    /// First frame beyond the physical address space.
    pub const fn phys_limit_frame(&self) -> u64 {
        1 << (self.phys_addr_bits - PAGE_SHIFT)
    }

    /// Highest physical address reachable with a DMA-zone allocation.
    pub fn dma_limit(&self, memory_start: u64) -> u64 {
        match self.zones.dma_zone_bytes() {
            Some(size) => memory_start + size - 1,
            None => 0xffff_ffff,
        }
    }

    /// Frames covered by one descriptor array allocation unit.
    pub fn memmap_granularity(&self) -> u64 {
        match self.memmap {
            MemmapModel::Flat => self.max_order_pages,
            MemmapModel::Sparse { pages_per_section } => {
                core::cmp::max(self.max_order_pages, pages_per_section)
            }
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::pc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc_limits() {
        let pc = Platform::pc();
        assert_eq!(pc.phys_limit_frame(), 0x10_0000);
        assert_eq!(pc.dma_limit(0), 0x00ff_ffff);
        assert_eq!(
            pc.with_zones(ZoneSetBuilder::new()).dma_limit(0),
            0xffff_ffff
        );
    }

    #[test]
    fn sparse_granularity() {
        let sparse = Platform::pc().with_memmap(
            MemmapModel::Sparse {
                pages_per_section: PAGES_PER_SECTION,
            },
            MAX_ORDER_NR_PAGES,
        );
        assert_eq!(sparse.memmap_granularity(), PAGES_PER_SECTION);
        assert_eq!(Platform::pc().memmap_granularity(), MAX_ORDER_NR_PAGES);
    }
}
