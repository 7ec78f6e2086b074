//! Plain data shared by the boot memory code: frame ranges, firmware memory regions, memory banks
//! and the byte size formatter used in the kernel log.

#![cfg_attr(not(test), no_std)]

pub mod fmt;
pub mod mem;
