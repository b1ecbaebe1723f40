// Physical memory layout

// qemu -machine virt is set up like this,
// based on qemu's hw/riscv/virt.c:
//
// 00001000 -- boot ROM, provided by qemu
// 02000000 -- CLINT
// 0C000000 -- PLIC
// 10000000 -- uart0
// 10001000 -- virtio disk
// 80000000 -- boot ROM jumps here in machine mode
//             -kernel loads the kernel here
// unused RAM after 80000000.

// the kernel uses physical memory thus:
// 80000000 -- entry.S, then kernel text and data
// end -- start of the frame allocation area: first KERN_PAGES
//        frames form the kernel pool, the rest the user pool
// PHYSTOP -- end of RAM used by the kernel

use crate::riscv::{MAXVA, PGSIZE};

// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x10000000;
pub const UART0_IRQ: usize = 10;

// virtio mmio interface
pub const VIRTIO0: usize = 0x10001000;
pub const VIRTIO0_IRQ: usize = 1;

// core local interruptor (CLINT), which contains the timer.
pub const CLINT: usize = 0x2000000;
pub const CLINT_MTIME: usize = CLINT + 0xBFF8; // cycles since boot.
#[macro_export]
macro_rules! CLINT_MTIMECMP {
    ( $hartid:expr ) => {
        $crate::memlayout::CLINT + 0x4000 + 8 * ($hartid)
    };
}

// qemu puts platform-level interrupt controller (PLIC) here.
pub const PLIC: usize = 0x0c000000;
#[macro_export]
macro_rules! PLIC_SENABLE {
    ( $hart:expr ) => {
        $crate::memlayout::PLIC + 0x2080 + ($hart) * 0x100
    };
}
#[macro_export]
macro_rules! PLIC_SPRIORITY {
    ( $hart:expr ) => {
        $crate::memlayout::PLIC + 0x201000 + ($hart) * 0x2000
    };
}
#[macro_export]
macro_rules! PLIC_SCLAIM {
    ( $hart:expr ) => {
        $crate::memlayout::PLIC + 0x201004 + ($hart) * 0x2000
    };
}

// the kernel expects there to be RAM
// for use by the kernel and user pages
// from physical address 0x80000000 to PHYSTOP.
pub const KERNBASE: usize = 0x80000000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

// map the trampoline page to the highest address,
// in both user and kernel space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

// the trapframe page sits just under the trampoline in
// every user address space; the user stack grows down from it.
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

// User memory layout.
//   guard page    (no mapping, catches null derefs)
//   code + data   from USER_BASE
//   heap          grows up from the end of code+data
//   ...
//   mmap window   [MMAP_BEGIN, MMAP_END)
//   user stack    grows down from TRAPFRAME
//   TRAPFRAME     (p->trapframe, used by the trampoline)
//   TRAMPOLINE    (the same page as in the kernel)
pub const USER_BASE: usize = PGSIZE;

// the window uvm_mmap hands out pages from; 34 pages between its top
// and the trampoline are left for the trapframe and user stack.
pub const MMAP_NPAGES: usize = 8096;
pub const MMAP_END: usize = MAXVA - 34 * PGSIZE;
pub const MMAP_BEGIN: usize = MMAP_END - MMAP_NPAGES * PGSIZE;

// map kernel stacks into the kernel page table below the trampoline,
// one page each, with an unmapped guard page between neighbours so
// an overflow faults instead of corrupting the next stack.
#[macro_export]
macro_rules! KSTACK {
    ( $p:expr ) => {
        $crate::memlayout::TRAMPOLINE - (($p) + 1) * 2 * $crate::riscv::PGSIZE
    };
}
