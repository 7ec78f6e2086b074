//! Early physical memory bootstrap for my Pentium III PC kernel.
//!
//! The boot code describes memory banks, reservations and the ramdisk location. From that, [`mem`]
//! computes zone boundaries, runs a bitmap allocator until the page allocator exists and finally
//! hands every unused page frame over to it. [`boot`] is the driver which halts the core if any of
//! this fails.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod boot;
pub mod logging;
pub mod mem;
