//
// the riscv Platform Level Interrupt Controller (PLIC).
//

use crate::memlayout::{PLIC, UART0_IRQ, VIRTIO0_IRQ};
use crate::proc::cpuid;
use crate::{PLIC_SCLAIM, PLIC_SENABLE, PLIC_SPRIORITY};

pub fn plicinit() {
    unsafe {
        // set desired IRQ priorities non-zero (otherwise disabled).
        ((PLIC + UART0_IRQ * 4) as *mut u32).write_volatile(1);
        ((PLIC + VIRTIO0_IRQ * 4) as *mut u32).write_volatile(1);
    }
}

pub fn plicinithart() {
    let hart = cpuid();

    unsafe {
        // set enable bits for this hart's S-mode
        // for the uart and virtio disk.
        (PLIC_SENABLE!(hart) as *mut u32)
            .write_volatile((1 << UART0_IRQ) | (1 << VIRTIO0_IRQ));

        // set this hart's S-mode priority threshold to 0.
        (PLIC_SPRIORITY!(hart) as *mut u32).write_volatile(0);
    }
}

// ask the PLIC what interrupt we should serve.
pub fn plic_claim() -> u32 {
    let hart = cpuid();
    unsafe { (PLIC_SCLAIM!(hart) as *const u32).read_volatile() }
}

// tell the PLIC we've served this IRQ.
pub fn plic_complete(irq: u32) {
    let hart = cpuid();
    unsafe {
        (PLIC_SCLAIM!(hart) as *mut u32).write_volatile(irq);
    }
}
