#![no_std]
#![no_main]
#![allow(static_mut_refs)]

mod asm;
mod riscv;
mod memlayout;
mod param;
mod uart;
mod start;
mod spinlock;
mod sleeplock;
mod proc;
mod console;
mod printf;
mod logger;
mod pmem;
mod string;
mod vm;
mod mmap;
mod uvm;
mod trap;
mod plic;
mod buf;
mod bio;
mod fs;
mod syscall;
mod virtio;

#[cfg(feature = "selftest")]
mod selftest;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::proc::cpuid;
use crate::riscv::__sync_synchronize;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    printf::panicking();
    printf!("\nhart {} panic: ", cpuid());
    if let Some(p) = info.location() {
        printf!("{}:{}: {}\n", p.file(), p.line(), info.message());
    } else {
        printf!("{}\n", info.message());
    }
    abort();
}

fn abort() -> ! {
    loop {
        unsafe { core::arch::asm!("wfi") }
    }
}

static STARTED: AtomicBool = AtomicBool::new(false);

// start() jumps here in supervisor mode on all CPUs.
#[no_mangle]
pub extern "C" fn kmain() -> ! {
    if cpuid() == 0 {
        console::consoleinit();
        logger::loginit();
        printf!("\nternos kernel is booting\n\n");

        pmem::pmeminit(); // physical frame pools
        log::info!(
            "frame pools initialized ({} kernel / {} user frames)",
            pmem::pmem_allocable(true),
            pmem::pmem_allocable(false)
        );

        vm::kvminit(); // create kernel page table
        vm::kvminithart(); // turn on paging
        log::info!("paging on");

        proc::procinit(); // process table
        trap::trapinit(); // system tick
        trap::trapinithart(); // install kernel trap vector
        plic::plicinit(); // set up interrupt controller
        plic::plicinithart(); // ask PLIC for device interrupts
        log::info!("traps and interrupts initialized");

        mmap::mmapinit(); // mmap interval-node pool
        bio::binit(); // buffer cache
        virtio::virtio_disk::virtio_disk_init(); // emulated hard disk
        log::info!("buffer cache and disk initialized");

        proc::userinit(); // first user process
        log::info!("first process ready");

        __sync_synchronize();
        STARTED.store(true, Ordering::Release);
    } else {
        while !STARTED.load(Ordering::Acquire) {}

        __sync_synchronize();
        printf!("hart {} starting\n", cpuid());
        vm::kvminithart(); // turn on paging
        trap::trapinithart(); // install kernel trap vector
        plic::plicinithart(); // ask PLIC for device interrupts
    }

    proc::scheduler();
}
