use core::fmt::{Display, Formatter, Result};
use types::fmt::{Bytes, Fmt};
use types::mem::MemoryRegion;

/// Access to physical memory before any page allocator or mapper exists.
pub trait DirectMap {
    /// Byte view of `[phys, phys + len)`.
    ///
    /// # Safety
    ///
    /// The range must be mapped, reserved for the caller and not referenced anywhere else for as
    /// long as the returned slice lives.
    unsafe fn bytes_mut(&mut self, phys: u64, len: u64) -> &'static mut [u8];
}

/// The kernel's linear mapping of low memory: virtual address = physical address + `page_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearMap {
    page_offset: u64,
}

impl LinearMap {
    pub const fn new(page_offset: u64) -> Self {
        Self { page_offset }
    }

    pub fn phys_to_virt(&self, phys: u64) -> u64 {
        phys + self.page_offset
    }

    /// `None` if `virt` lies below the linear mapping.
    pub fn virt_to_phys(&self, virt: u64) -> Option<u64> {
        virt.checked_sub(self.page_offset)
    }
}

impl DirectMap for LinearMap {
    unsafe fn bytes_mut(&mut self, phys: u64, len: u64) -> &'static mut [u8] {
        let virt = self.phys_to_virt(phys) as usize as *mut u8;
        // SAFETY: upheld by the caller.
        unsafe { core::slice::from_raw_parts_mut(virt, len as usize) }
    }
}

pub trait MemoryMap: Iterator<Item = MemoryRegion> + Clone {
    fn fmt(&self) -> MemoryMapFmt<Self> {
        MemoryMapFmt { iter: self.clone() }
    }

    fn filter_usable(&self) -> impl Iterator<Item = MemoryRegion> {
        self.clone().filter(MemoryRegion::is_usable)
    }
}

impl<T> MemoryMap for T where T: Iterator<Item = MemoryRegion> + Clone {}

/// Tree view of a memory map, one line per region.
#[derive(Clone)]
pub struct MemoryMapFmt<I> {
    iter: I,
}

impl<T: Iterator<Item = MemoryRegion> + Clone> Display for MemoryMapFmt<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let mut total_bytes_available = 0;
        for region in self.iter.clone() {
            writeln!(f, "├─ {}", region)?;
            if region.is_usable() {
                total_bytes_available += region.length;
            }
        }

        write!(
            f,
            "└─ total memory available: {}",
            Fmt::<Bytes>::from(total_bytes_available)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::mem::MemoryRegionType;

    #[test]
    fn linear_map_translation() {
        let map = LinearMap::new(0xc000_0000);
        assert_eq!(map.phys_to_virt(0x1000), 0xc000_1000);
        assert_eq!(map.virt_to_phys(0xc040_0000), Some(0x40_0000));
        assert_eq!(map.virt_to_phys(0x1000), None);
    }

    #[test]
    fn memory_map_tree() {
        let regions = [
            MemoryRegion::new(0, 0x9_f000, MemoryRegionType::Available),
            MemoryRegion::new(0xf_0000, 0x1_0000, MemoryRegionType::Unusable),
            MemoryRegion::new(0x10_0000, 0x3f0_0000, MemoryRegionType::Available),
        ];
        let text = format!("{}", regions.iter().copied().fmt());
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("├─ @ 0xf0000"));
        assert_eq!(lines[3], "└─ total memory available: 63 MiB");
        assert_eq!(regions.iter().copied().filter_usable().count(), 2);
    }
}
