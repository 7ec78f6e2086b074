/// An x86 I/O port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port(pub u16);

impl Port {
    /// The Bochs/QEMU debug console.
    pub const DEBUG_CONSOLE: Port = Port(0xe9);

    pub fn write_u8(&self, value: u8) {
        unsafe {
            core::arch::asm!(
                "outb %al, %dx",
                in("al") value,
                in("dx") self.0,
                options(att_syntax, nomem, nostack, preserves_flags)
            );
        }
    }
}

/// [`core::fmt::Write`] adapter that sends every byte to a port.
pub struct PortWriter(pub Port);

impl core::fmt::Write for PortWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        s.bytes().for_each(|byte| self.0.write_u8(byte));
        Ok(())
    }
}
