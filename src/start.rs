use core::arch::asm;

use crate::kmain;
use crate::memlayout::CLINT_MTIME;
use crate::param::{NCPU, TIMER_INTERVAL};
use crate::riscv::*;
use crate::CLINT_MTIMECMP;

// entry.S needs one stack per CPU.
#[repr(C, align(16))]
struct Stack0Aligned([u8; 4096 * NCPU]);
#[no_mangle]
static stack0: Stack0Aligned = Stack0Aligned([0; 4096 * NCPU]);

// a scratch area per CPU for machine-mode timer interrupts.
static mut TIMER_SCRATCH: [[u64; 5]; NCPU] = [[0; 5]; NCPU];

extern "C" {
    // in kernelvec.S: the machine-mode timer vector.
    fn timervec();
}

// entry.S jumps here in machine mode on stack0, once per hart.
#[no_mangle]
extern "C" fn start() -> ! {
    // set M Previous Privilege mode to Supervisor, for mret.
    let mut x = r_mstatus();
    x &= !MSTATUS_MPP_MASK;
    x |= MSTATUS_MPP_S;
    w_mstatus(x);

    // set M Exception Program Counter to kmain, for mret.
    w_mepc(kmain as usize);

    // disable paging for now.
    w_satp(0);

    // delegate all interrupts and exceptions to supervisor mode.
    w_medeleg(0xffff);
    w_mideleg(0xffff);
    w_sie(r_sie() | SIE_SEIE | SIE_STIE | SIE_SSIE);

    // configure Physical Memory Protection to give supervisor mode
    // access to all of physical memory.
    w_pmpaddr0(0x3ffffffffffff);
    w_pmpcfg0(0xf);

    // ask for clock interrupts.
    timerinit();

    // keep each CPU's hartid in its tp register, for cpuid().
    w_tp(r_mhartid());

    // switch to supervisor mode and jump to kmain().
    unsafe { asm!("mret", options(noreturn)) }
}

// arrange to receive timer interrupts.
// they will arrive in machine mode at timervec in kernelvec.S,
// which bumps mtimecmp and raises a software interrupt for
// the supervisor-mode clock handler.
fn timerinit() {
    // each CPU has a separate source of timer interrupts.
    let id = r_mhartid() as usize;

    // ask the CLINT for a timer interrupt.
    unsafe {
        (CLINT_MTIMECMP!(id) as *mut u64)
            .write_volatile((CLINT_MTIME as *const u64).read_volatile() + TIMER_INTERVAL);
    }

    // prepare information in scratch[] for timervec.
    // scratch[0..2] : space for timervec to save registers.
    // scratch[3] : address of this hart's CLINT MTIMECMP register.
    // scratch[4] : desired interval (in cycles) between interrupts.
    unsafe {
        let scratch = &mut TIMER_SCRATCH[id];
        scratch[3] = CLINT_MTIMECMP!(id) as u64;
        scratch[4] = TIMER_INTERVAL;
        w_mscratch(scratch.as_ptr() as usize);
    }

    // set the machine-mode trap handler.
    w_mtvec(timervec as usize);

    // enable machine-mode interrupts.
    w_mstatus(r_mstatus() | MSTATUS_MIE);

    // enable machine-mode timer interrupts.
    w_mie(r_mie() | MIE_MTIE);
}
