#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod io;

/// Disable interrupts and stop execution on this core indefinitely.
#[inline(always)]
pub fn halt_core() -> ! {
    irq_disable();
    loop {
        wait_for_irq();
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
fn wait_for_irq() {
    unsafe {
        core::arch::asm!("hlt");
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
fn irq_disable() {
    unsafe {
        core::arch::asm!("cli");
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline(always)]
fn wait_for_irq() {
    core::hint::spin_loop();
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline(always)]
fn irq_disable() {}
