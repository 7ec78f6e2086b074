use std::collections::BTreeSet;

use bootmem::boot::{try_boot_memory, BootInfo};
use bootmem::mem::context::KernelImage;
use bootmem::mem::memmap::{DescriptorMap, FlatMemmap};
use bootmem::mem::platform::MemmapModel;
use bootmem::mem::zone::{ZoneKind, ZoneSet, ZoneSetBuilder};
use bootmem::mem::{
    BootMem, BootMemError, BootMemoryContext, ConfigError, DirectMap, PageAllocator, PhysRegion,
    Platform, RamdiskStatus,
};
use types::mem::{pfn_to_phys, MemoryBank, MemoryRegion, MemoryRegionType, PAGE_SIZE};

/// Page allocator that only records what it is given.
#[derive(Default)]
struct Recorder {
    zones: Option<ZoneSet>,
    pages: Vec<u64>,
    released_before_zones: bool,
}

impl PageAllocator for Recorder {
    fn register_zones(&mut self, zones: &ZoneSet) {
        self.zones = Some(zones.clone());
    }

    fn release_page(&mut self, pfn: u64) {
        self.released_before_zones |= self.zones.is_none();
        self.pages.push(pfn);
    }
}

/// Backs every physical range with fresh host memory.
struct LeakMap;

impl DirectMap for LeakMap {
    unsafe fn bytes_mut(&mut self, _phys: u64, len: u64) -> &'static mut [u8] {
        vec![0u8; len as usize].leak()
    }
}

/// A small machine: high memory, no DMA zone.
fn platform() -> Platform {
    Platform::pc().with_zones(ZoneSetBuilder::new().with_highmem())
}

/// Descriptor array somewhere outside of the tested memory.
const NOWHERE: FlatMemmap = FlatMemmap {
    base_phys: 0x4000_0000,
    first_pfn: 0,
    descriptor_size: 32,
};

#[test]
fn scenario_a_single_bank_with_reservation() {
    let mut ctx = BootMemoryContext::new(&[MemoryBank::low(0, 100)], platform()).unwrap();
    ctx.reserve(pfn_to_phys(10), 10 * PAGE_SIZE).unwrap();

    let bootmem = BootMem::init(ctx.finalize(), &mut LeakMap).unwrap();
    let normal = *bootmem.zones().get(ZoneKind::Normal).unwrap();
    assert_eq!((normal.frame_count, normal.hole_count), (100, 0));

    // The bitmap lives in the topmost free page until the handoff.
    let bitmap = bootmem.bitmap();
    assert_eq!(bitmap.storage().iter().collect::<Vec<_>>(), [99]);
    assert_eq!(bitmap.free_frames(), 89);
    assert!((10..20).all(|pfn| bitmap.is_reserved(pfn)));

    let mut recorder = Recorder::default();
    let report = bootmem.handoff(&NOWHERE, &mut recorder).unwrap();
    assert_eq!(report.total_frames, 100);
    assert_eq!(report.free_frames(), 90);
    assert_eq!(report.reserved_frames(), 10);

    let expected: Vec<u64> = (0..10).chain(20..100).collect();
    let released: BTreeSet<u64> = recorder.pages.iter().copied().collect();
    assert_eq!(released.into_iter().collect::<Vec<_>>(), expected);
    assert_eq!(recorder.pages.last(), Some(&99));
    assert!(!recorder.released_before_zones);
}

#[test]
fn scenario_b_gap_between_banks() {
    let platform = platform()
        .with_memmap(MemmapModel::Flat, 1)
        .with_descriptor_size(1024);
    let banks = [MemoryBank::low(0, 50), MemoryBank::low(60, 100)];
    let ctx = BootMemoryContext::new(&banks, platform).unwrap();

    let mut bootmem = BootMem::init(ctx.finalize(), &mut LeakMap).unwrap();
    assert_eq!(bootmem.zones().get(ZoneKind::Normal).unwrap().hole_count, 10);

    // 100 descriptors of 1 KiB fill frames 0..25.
    let memmap = bootmem.alloc_descriptor_array().unwrap();
    assert_eq!(memmap.base_phys, 0);
    assert_eq!(memmap.descriptor_phys(50), 50 * 1024);

    let mut recorder = Recorder::default();
    let report = bootmem.handoff(&memmap, &mut recorder).unwrap();

    // Descriptors of frames 50..60 occupy 50 KiB..60 KiB; only pages 13 and 14 are theirs alone.
    assert_eq!(report.memmap_freed, 2 * PAGE_SIZE);
    let released: BTreeSet<u64> = recorder.pages.iter().copied().collect();
    assert!(released.contains(&13) && released.contains(&14));
    assert!(!released.contains(&12) && !released.contains(&15));
    assert!((50..60).all(|pfn| !released.contains(&pfn)));
    assert_eq!(report.free_frames(), 90 - 25 + 2);
}

#[test]
fn scenario_c_high_memory_around_reservation() {
    let banks = [MemoryBank::low(0, 50), MemoryBank::high(50, 120)];
    let mut ctx = BootMemoryContext::new(&banks, platform()).unwrap();
    ctx.reserve(pfn_to_phys(70), 10 * PAGE_SIZE).unwrap();

    let mut bootmem = BootMem::init(ctx.finalize(), &mut LeakMap).unwrap();
    let limits = *bootmem.limits();
    assert_eq!((limits.min, limits.max_low, limits.max_high), (0, 50, 120));

    let memmap = bootmem.alloc_descriptor_array().unwrap();
    let mut recorder = Recorder::default();
    let report = bootmem.handoff(&memmap, &mut recorder).unwrap();

    let high: Vec<u64> = recorder.pages.iter().copied().filter(|&pfn| pfn >= 50).collect();
    let expected: Vec<u64> = (50..70).chain(80..120).collect();
    assert_eq!(high, expected);
    assert_eq!(report.high_frames, 60);

    let zones = recorder.zones.unwrap();
    let highmem = zones.get(ZoneKind::HighMem).unwrap();
    assert_eq!((highmem.base_frame, highmem.frame_count, highmem.hole_count), (50, 70, 0));
    assert_eq!(zones.total_frames(), 120);
}

#[test]
fn scenario_d_reservation_outside_memory() {
    let mut ctx = BootMemoryContext::new(&[MemoryBank::low(0, 100)], platform()).unwrap();
    assert_eq!(
        ctx.reserve(pfn_to_phys(200), 10 * PAGE_SIZE),
        Err(BootMemError::Configuration(ConfigError::OutsideMemory {
            start: 200,
            end: 210
        }))
    );
}

#[test]
fn high_memory_needs_a_high_zone() {
    let banks = [MemoryBank::low(0, 50), MemoryBank::high(50, 120)];
    let platform = Platform::pc().with_zones(ZoneSetBuilder::new());
    let ctx = BootMemoryContext::new(&banks, platform).unwrap();
    assert!(matches!(
        BootMem::init(ctx.finalize(), &mut LeakMap),
        Err(BootMemError::Configuration(ConfigError::HighMemoryUnsupported { frames: 70 }))
    ));
}

#[test]
fn stolen_memory_is_never_released() {
    let mut ctx = BootMemoryContext::new(&[MemoryBank::low(0, 100)], platform()).unwrap();
    let stolen = ctx.steal(4 * PAGE_SIZE, 4 * PAGE_SIZE).unwrap();
    assert_eq!(stolen, pfn_to_phys(96));

    let bootmem = BootMem::init(ctx.finalize(), &mut LeakMap).unwrap();
    assert_eq!(bootmem.zones().get(ZoneKind::Normal).unwrap().hole_count, 4);

    let mut recorder = Recorder::default();
    let report = bootmem.handoff(&NOWHERE, &mut recorder).unwrap();
    assert!(recorder.pages.iter().all(|&pfn| pfn < 96));
    assert_eq!(report.total_frames, 96);
    assert_eq!(report.free_frames(), 96);
}

fn pc_memory_map() -> [MemoryRegion; 3] {
    [
        MemoryRegion::new(0, 0x9_f000, MemoryRegionType::Available),
        MemoryRegion::new(0xf_0000, 0x1_0000, MemoryRegionType::Unusable),
        MemoryRegion::new(0x10_0000, 0x0ff0_0000, MemoryRegionType::Available),
    ]
}

const KERNEL: KernelImage = KernelImage {
    text_start: 0x10_0000,
    data_start: 0x14_0000,
    bss_end: 0x18_0000,
    execute_in_place: false,
};

fn boot_info<'a>(memory_map: &'a [MemoryRegion], command_line: &'a str) -> BootInfo<'a> {
    BootInfo {
        command_line: Some(command_line),
        memory_map,
        tags: &[],
        dt_initrd: None,
        dt_reserved: &[],
        kernel: KERNEL,
        page_tables: PhysRegion::new(0x18_0000, 0x2000),
    }
}

#[test]
fn full_boot_of_a_256_mib_pc() {
    let map = pc_memory_map();
    let info = boot_info(&map, "root=/dev/ram0 initrd=0x800000,4M");
    let mut recorder = Recorder::default();
    let outcome = try_boot_memory(&info, Platform::pc(), &mut LeakMap, &mut recorder).unwrap();

    assert_eq!(
        outcome.ramdisk,
        RamdiskStatus::Reserved(PhysRegion::new(0x80_0000, 4 << 20))
    );

    let zones = recorder.zones.as_ref().unwrap();
    let dma = zones.get(ZoneKind::Dma).unwrap();
    assert_eq!((dma.frame_count, dma.hole_count), (0x1000, 0x61));
    assert_eq!(zones.get(ZoneKind::Normal).unwrap().hole_count, 0);
    assert_eq!(zones.get(ZoneKind::HighMem).unwrap().frame_count, 0x8000);

    let report = outcome.report;
    assert_eq!(report.total_frames, 0xff9f);
    assert_eq!(report.high_frames, 0x8000);
    // Kernel, page tables, ramdisk and 2 MiB of page descriptors.
    assert_eq!(report.reserved_frames(), 0x80 + 2 + 0x400 + 0x200);

    let released: BTreeSet<u64> = recorder.pages.iter().copied().collect();
    assert_eq!(released.len(), recorder.pages.len(), "page released twice");
    assert!((0x100..0x182).all(|pfn| !released.contains(&pfn)));
    assert!((0x800..0xc00).all(|pfn| !released.contains(&pfn)));
    assert!((0x9f..0x100).all(|pfn| !released.contains(&pfn)));
    assert!(!recorder.released_before_zones);
}

#[test]
fn ramdisk_over_the_kernel_is_dropped() {
    let map = pc_memory_map();
    let info = boot_info(&map, "initrd=0x140000,64K");
    let mut recorder = Recorder::default();
    let outcome = try_boot_memory(&info, Platform::pc(), &mut LeakMap, &mut recorder).unwrap();

    assert_eq!(
        outcome.ramdisk,
        RamdiskStatus::Disabled {
            ramdisk: PhysRegion::new(0x14_0000, 0x1_0000),
            reason: BootMemError::OverlapConflict {
                start: 0x14_0000,
                size: 0x1_0000
            }
        }
    );
    assert_eq!(outcome.report.reserved_frames(), 0x80 + 2 + 0x200);
}

#[test]
fn no_usable_memory() {
    let map = [MemoryRegion::new(0, 0x10_0000, MemoryRegionType::Unusable)];
    let info = boot_info(&map, "");
    let result = try_boot_memory(&info, Platform::pc(), &mut LeakMap, &mut Recorder::default());
    assert_eq!(result, Err(BootMemError::Configuration(ConfigError::NoBanks)));
}
