use core::{
    fmt::{Display, Formatter, Result},
    marker::PhantomData,
};

use crate::mem::PAGE_SHIFT;

/// Unit marker: the formatted value is a number of bytes.
pub struct Bytes;

/// Unit marker: the formatted value is a number of page frames.
pub struct Frames;

/// Human readable size, e.g. `12 MiB`. The unit of the wrapped value is selected via the type
/// parameter, so `Fmt::<Frames>::from(256)` prints `256 pages (1024 KiB)`.
pub struct Fmt<U> {
    value: u64,
    unit: PhantomData<U>,
}

impl<U> From<u64> for Fmt<U> {
    fn from(value: u64) -> Self {
        Self {
            value,
            unit: PhantomData,
        }
    }
}

fn write_bytes(f: &mut Formatter<'_>, bytes: u64) -> Result {
    match bytes {
        b if b < 10 * 1024 => write!(f, "{b} B"),
        kb if kb < 10 * 1024u64.pow(2) => write!(f, "{} KiB", kb >> 10),
        mb if mb < 10 * 1024u64.pow(3) => write!(f, "{} MiB", mb >> 20),
        gb => write!(f, "{} GiB", gb >> 30),
    }
}

impl Display for Fmt<Bytes> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write_bytes(f, self.value)
    }
}

impl Display for Fmt<Frames> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{} pages (", self.value)?;
        write_bytes(f, self.value.saturating_mul(1 << PAGE_SHIFT))?;
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::{Bytes, Fmt, Frames};

    #[test]
    fn byte_sizes() {
        assert_eq!(format!("{}", Fmt::<Bytes>::from(4823)), "4823 B");
        assert_eq!(format!("{}", Fmt::<Bytes>::from(64 * 1024)), "64 KiB");
        assert_eq!(format!("{}", Fmt::<Bytes>::from(128 << 20)), "128 MiB");
        assert_eq!(format!("{}", Fmt::<Bytes>::from(12 << 30)), "12 GiB");
    }

    #[test]
    fn frame_counts() {
        assert_eq!(format!("{}", Fmt::<Frames>::from(1)), "1 pages (4096 B)");
        assert_eq!(format!("{}", Fmt::<Frames>::from(4096)), "4096 pages (16 MiB)");
    }
}
