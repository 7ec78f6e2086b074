//! Where the bootloader put the initial ramdisk.
//!
//! The location can come from the `initrd=<start>,<size>` kernel parameter, from a tagged boot
//! record or from the device tree. All of them end up as a [`PhysRegion`].

use log::warn;

use crate::mem::{LinearMap, PhysRegion};

/// Legacy tagged boot records describing the ramdisk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootTag {
    /// Deprecated: the start is a kernel virtual address.
    Initrd { virt_start: u64, size: u64 },
    Initrd2 { phys_start: u64, size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamdiskSource<'a> {
    CommandLine(&'a str),
    Tag(BootTag),
    /// `linux,initrd-start` and `linux,initrd-end` of the device tree.
    DeviceTree { start: u64, end: u64 },
}

impl RamdiskSource<'_> {
    fn ramdisk(&self, map: &LinearMap) -> Option<PhysRegion> {
        match *self {
            Self::CommandLine(cmdline) => parse_initrd_param(cmdline),
            Self::Tag(BootTag::Initrd { virt_start, size }) => {
                warn!("ATAG_INITRD is deprecated; please update your bootloader.");
                Some(PhysRegion::new(map.virt_to_phys(virt_start)?, size))
            }
            Self::Tag(BootTag::Initrd2 { phys_start, size }) => {
                Some(PhysRegion::new(phys_start, size))
            }
            Self::DeviceTree { start, end } => {
                Some(PhysRegion::new(start, end.checked_sub(start)?))
            }
        }
    }
}

/// The ramdisk of the first source that describes a non-empty one.
pub fn find_ramdisk<'a>(
    sources: impl IntoIterator<Item = RamdiskSource<'a>>,
    map: &LinearMap,
) -> Option<PhysRegion> {
    sources
        .into_iter()
        .filter_map(|source| source.ramdisk(map))
        .find(|ramdisk| !ramdisk.is_empty())
}

/// Parse the last `initrd=<start>,<size>` parameter of `cmdline`. Without the comma the parameter
/// is ignored.
pub fn parse_initrd_param(cmdline: &str) -> Option<PhysRegion> {
    let value = cmdline
        .split_whitespace()
        .filter_map(|param| param.strip_prefix("initrd="))
        .last()?;

    let (start, rest) = memparse(value);
    let size = rest.strip_prefix(',')?;
    let (size, _) = memparse(size);
    Some(PhysRegion::new(start, size))
}

/// Parse a size such as `0x400000`, `010`, `64M` or `1g`. Returns the value and the unparsed rest
/// of `text`. No digits at all parse as 0.
pub fn memparse(text: &str) -> (u64, &str) {
    let (radix, digits) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .filter(|hex| hex.starts_with(|c: char| c.is_ascii_hexdigit()))
    {
        (16, hex)
    } else if text.starts_with('0') {
        (8, text)
    } else {
        (10, text)
    };

    let len = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    let value = digits[..len].chars().fold(0u64, |value, c| {
        let digit = c.to_digit(radix).map_or(0, u64::from);
        value.wrapping_mul(u64::from(radix)).wrapping_add(digit)
    });

    let rest = &digits[len..];
    let shift = match rest.chars().next() {
        Some('E' | 'e') => 60,
        Some('P' | 'p') => 50,
        Some('T' | 't') => 40,
        Some('G' | 'g') => 30,
        Some('M' | 'm') => 20,
        Some('K' | 'k') => 10,
        _ => return (value, rest),
    };
    (value << shift, &rest[1..])
}
