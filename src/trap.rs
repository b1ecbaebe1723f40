use crate::memlayout::{TRAMPOLINE, TRAPFRAME, UART0_IRQ, VIRTIO0_IRQ};
use crate::plic::{plic_claim, plic_complete};
use crate::proc::{cpuid, mycpu, myproc, wakeup, yield_cpu, ProcState};
use crate::riscv::{
    intr_get, intr_off, intr_on, r_satp, r_scause, r_sepc, r_sip, r_sstatus, r_stval, r_tp, w_sepc,
    w_sip, w_sstatus, w_stvec, PageTable, PGSIZE, SSTATUS_SPIE, SSTATUS_SPP,
};
use crate::spinlock::Spinlock;
use crate::syscall::syscall;
use crate::uart::uart_intr;
use crate::virtio::virtio_disk::virtio_disk_intr;
use crate::MAKE_SATP;

/// The system clock: a tick counter bumped by hart 0 only.
/// Sleepers wait on the counter's address.
pub struct Ticks {
    pub lock: Spinlock,
    pub ticks: u64,
}

pub static mut SYS_TICKS: Ticks = Ticks {
    lock: Spinlock::new("time"),
    ticks: 0,
};

pub fn ticks_chan() -> usize {
    unsafe { &SYS_TICKS.ticks as *const u64 as usize }
}

extern "C" {
    // in kernelvec.S, calls kerneltrap().
    static kernelvec: u8;
    // in trampoline.S
    static _trampoline: u8;
    static uservec: u8;
    static userret: u8;
}

pub fn trapinit() {
    // the tick counter and its lock are statically initialized.
}

// set up to take exceptions and traps while in the kernel.
pub fn trapinithart() {
    w_stvec(unsafe { &kernelvec } as *const u8 as usize);
}

const SCAUSE_INTERRUPT: u64 = 1 << 63;
const IRQ_S_SOFT: u64 = 1; // timer ticks, reflected from M-mode as SSIP
const IRQ_S_EXT: u64 = 9; // PLIC
const EXC_ECALL_U: u64 = 8;

fn exception_name(id: u64) -> &'static str {
    match id {
        0 => "Instruction address misaligned",
        1 => "Instruction access fault",
        2 => "Illegal instruction",
        3 => "Breakpoint",
        4 => "Load address misaligned",
        5 => "Load access fault",
        6 => "Store/AMO address misaligned",
        7 => "Store/AMO access fault",
        8 => "Environment call from U-mode",
        9 => "Environment call from S-mode",
        12 => "Instruction page fault",
        13 => "Load page fault",
        15 => "Store/AMO page fault",
        _ => "unknown exception",
    }
}

// The machine-mode timer vector raises a supervisor software
// interrupt on every CLINT tick. Hart 0 owns the global clock.
fn clockintr() {
    if cpuid() == 0 {
        let t = unsafe { &mut SYS_TICKS };
        t.lock.acquire();
        t.ticks += 1;
        wakeup(ticks_chan());
        t.lock.release();
    }

    // acknowledge the software interrupt.
    w_sip(r_sip() & !2);

    // force the running process to give up the CPU.
    let c = mycpu();
    if c.proc.is_some() && myproc().state == ProcState::Running {
        yield_cpu();
    }
}

// external interrupts, routed through the PLIC.
fn devintr() {
    let irq = plic_claim();

    if irq == UART0_IRQ as u32 {
        uart_intr();
    } else if irq == VIRTIO0_IRQ as u32 {
        virtio_disk_intr();
    } else if irq != 0 {
        log::warn!("unexpected interrupt irq={}", irq);
    }

    if irq != 0 {
        plic_complete(irq);
    }
}

//
// handle an interrupt, exception, or system call from user space.
// called from trampoline.S
//
#[no_mangle]
extern "C" fn usertrap() {
    if r_sstatus() & SSTATUS_SPP != 0 {
        panic!("usertrap: not from user mode");
    }

    // we're now in the kernel, so send interrupts and exceptions
    // to kerneltrap().
    w_stvec(unsafe { &kernelvec } as *const u8 as usize);

    let p = myproc();
    let tf = unsafe { &mut *p.trapframe };

    // save user program counter.
    tf.epc = r_sepc() as u64;

    let scause = r_scause();
    if scause & SCAUSE_INTERRUPT != 0 {
        match scause & 0xf {
            IRQ_S_SOFT => clockintr(),
            IRQ_S_EXT => devintr(),
            other => log::warn!("usertrap: unexpected interrupt {}", other),
        }
    } else if scause == EXC_ECALL_U {
        // sepc points to the ecall instruction,
        // but we want to return to the next instruction.
        tf.epc += 4;

        // an interrupt will change sepc, scause, and sstatus,
        // so enable only now that we're done with those registers.
        intr_on();

        syscall();
    } else {
        log::error!(
            "usertrap: {} pid={} sepc={:#x} stval={:#x}",
            exception_name(scause & 0xf),
            p.pid,
            r_sepc(),
            r_stval()
        );
        panic!("usertrap");
    }

    usertrapret();
}

//
// return to user space
//
pub fn usertrapret() {
    let p = myproc();

    // we're about to switch the destination of traps from
    // kerneltrap() to usertrap(), so turn off interrupts until
    // we're back in user space, where usertrap() is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to uservec in
    // trampoline.S.
    let uservec_addr = unsafe { &uservec } as *const u8 as usize;
    let trampoline_addr = unsafe { &_trampoline } as *const u8 as usize;
    w_stvec(TRAMPOLINE + (uservec_addr - trampoline_addr));

    // set up trapframe values that uservec will need when
    // the process next traps into the kernel.
    let tf = unsafe { &mut *p.trapframe };
    tf.kernel_satp = r_satp() as u64; // kernel page table
    tf.kernel_sp = (p.kstack + PGSIZE) as u64; // process's kernel stack
    tf.kernel_trap = usertrap as usize as u64;
    tf.kernel_hartid = r_tp(); // hartid for cpuid()

    // set up the registers that trampoline.S's sret will use
    // to get to user space.

    // set S Previous Privilege mode to User, enable interrupts there.
    let mut x = r_sstatus();
    x &= !SSTATUS_SPP;
    x |= SSTATUS_SPIE;
    w_sstatus(x);

    // set S Exception Program Counter to the saved user pc.
    w_sepc(tf.epc as usize);

    // tell trampoline.S the user page table to switch to.
    let satp = MAKE_SATP!(p.pagetable as *const PageTable as usize);

    // jump to userret in trampoline.S at the top of memory, which
    // switches to the user page table, restores user registers,
    // and switches to user mode with sret.
    let userret_addr = unsafe { &userret } as *const u8 as usize;
    let fp = TRAMPOLINE + (userret_addr - trampoline_addr);
    unsafe {
        let userret_fn: extern "C" fn(usize, usize) -> ! = core::mem::transmute(fp);
        userret_fn(TRAPFRAME, satp);
    }
}

// interrupts and exceptions from kernel code go here via kernelvec,
// on whatever the current kernel stack is.
#[no_mangle]
extern "C" fn kerneltrap() {
    let sepc = r_sepc();
    let sstatus = r_sstatus();
    let scause = r_scause();

    if sstatus & SSTATUS_SPP == 0 {
        panic!("kerneltrap: not from supervisor mode");
    }
    if intr_get() {
        panic!("kerneltrap: interrupts enabled");
    }

    if scause & SCAUSE_INTERRUPT != 0 {
        match scause & 0xf {
            IRQ_S_SOFT => clockintr(),
            IRQ_S_EXT => devintr(),
            other => log::warn!("kerneltrap: unexpected interrupt {}", other),
        }
    } else {
        // an exception in supervisor mode is a kernel bug.
        log::error!(
            "kerneltrap: {} scause={:#x} sepc={:#x} stval={:#x}",
            exception_name(scause & 0xf),
            scause,
            sepc,
            r_stval()
        );
        panic!("kerneltrap");
    }

    // clockintr() may have yielded, clobbering sepc and sstatus.
    w_sepc(sepc);
    w_sstatus(sstatus);
}
