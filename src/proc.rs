use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::fs;
use crate::memlayout::{MMAP_BEGIN, MMAP_NPAGES, TRAMPOLINE, TRAPFRAME, USER_BASE};
use crate::mmap::{node, region_alloc, region_clone_chain, region_free_chain, Handle, NIL};
use crate::param::{NCPU, NPROC, ROOTDEV};
use crate::pmem::{pmem_alloc, pmem_free};
use crate::riscv::{intr_get, intr_on, r_tp, PageTable, PteFlags, PGSIZE};
use crate::spinlock::{pop_off, push_off, Spinlock};
use crate::string::memmove;
use crate::trap::usertrapret;
use crate::uvm::uvm_copy;
use crate::vm::{kvmmap, mappages, uvm_create, uvm_destroy};
use crate::KSTACK;

// Saved registers for kernel context switches.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Context {
    pub ra: u64,
    pub sp: u64,

    // callee-saved
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    const fn zeroed() -> Self {
        Context {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

extern "C" {
    // in switch.S: save the old callee-saves + ra/sp, load the new.
    fn swtch(old: *mut Context, new: *mut Context);

    // in initcode.S: the first user program, copied into pid 1.
    static initcode_start: u8;
    static initcode_end: u8;
}

// Per-CPU state.
pub struct Cpu {
    pub proc: Option<usize>, // index of the process running on this cpu, or None.
    pub context: Context,    // swtch() here to enter scheduler().
    pub noff: i32,           // Depth of push_off() nesting.
    pub intena: bool,        // Were interrupts enabled before push_off()?
}

impl Cpu {
    const fn new() -> Self {
        Cpu {
            proc: None,
            context: Context::zeroed(),
            noff: 0,
            intena: false,
        }
    }
}

// per-process data for the trap handling code in trampoline.S.
// sits in a page by itself just under the trampoline page in the
// user page table. uservec saves user registers here, then loads
// kernel_sp, kernel_hartid, kernel_satp and jumps to kernel_trap.
// usertrapret() and userret set up the kernel_* fields, restore the
// user registers, switch to the user page table and enter user space.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Trapframe {
    /*   0 */ pub kernel_satp: u64, // kernel page table
    /*   8 */ pub kernel_sp: u64, // top of process's kernel stack
    /*  16 */ pub kernel_trap: u64, // usertrap()
    /*  24 */ pub epc: u64, // saved user program counter
    /*  32 */ pub kernel_hartid: u64, // saved kernel tp
    /*  40 */ pub ra: u64,
    /*  48 */ pub sp: u64,
    /*  56 */ pub gp: u64,
    /*  64 */ pub tp: u64,
    /*  72 */ pub t0: u64,
    /*  80 */ pub t1: u64,
    /*  88 */ pub t2: u64,
    /*  96 */ pub s0: u64,
    /* 104 */ pub s1: u64,
    /* 112 */ pub a0: u64,
    /* 120 */ pub a1: u64,
    /* 128 */ pub a2: u64,
    /* 136 */ pub a3: u64,
    /* 144 */ pub a4: u64,
    /* 152 */ pub a5: u64,
    /* 160 */ pub a6: u64,
    /* 168 */ pub a7: u64,
    /* 176 */ pub s2: u64,
    /* 184 */ pub s3: u64,
    /* 192 */ pub s4: u64,
    /* 200 */ pub s5: u64,
    /* 208 */ pub s6: u64,
    /* 216 */ pub s7: u64,
    /* 224 */ pub s8: u64,
    /* 232 */ pub s9: u64,
    /* 240 */ pub s10: u64,
    /* 248 */ pub s11: u64,
    /* 256 */ pub t3: u64,
    /* 264 */ pub t4: u64,
    /* 272 */ pub t5: u64,
    /* 280 */ pub t6: u64,
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

// Per-process state.
pub struct Proc {
    pub lock: Spinlock,

    // p.lock must be held when using these:
    pub state: ProcState,
    pub chan: usize, // If non-zero, sleeping on chan
    pub xstate: i32, // Exit status to be returned to parent's wait
    pub pid: i32,

    // the parent's slot index; only touched in exit/wait/fork under
    // the locks those paths already take.
    pub parent: Option<usize>,

    // these are private to the process, so p.lock need not be held.
    pub kstack: usize,              // Virtual address of kernel stack
    pub heap_top: usize,            // First byte past the heap
    pub ustack_pages: usize,        // Pages of user stack below TRAPFRAME
    pub mmap: Handle,               // Head of the free-interval list
    pub pagetable: *mut PageTable,  // User page table
    pub trapframe: *mut Trapframe,  // data page for trampoline.S
    pub context: Context,           // swtch() here to run process
    pub name: &'static str,         // Process name (debugging)
}

impl Proc {
    const fn new() -> Self {
        Proc {
            lock: Spinlock::new("proc"),
            state: ProcState::Unused,
            chan: 0,
            xstate: 0,
            pid: 0,
            parent: None,
            kstack: 0,
            heap_top: 0,
            ustack_pages: 0,
            mmap: NIL,
            pagetable: ptr::null_mut(),
            trapframe: ptr::null_mut(),
            context: Context::zeroed(),
            name: "",
        }
    }
}

static mut CPUS: [Cpu; NCPU] = [const { Cpu::new() }; NCPU];
static mut PROCS: [Proc; NPROC] = [const { Proc::new() }; NPROC];

// slot of the first process; it never exits and adopts orphans.
static mut INIT_PROC: usize = 0;

static PID_LOCK: Spinlock = Spinlock::new("nextpid");
static mut NEXT_PID: i32 = 1;

// Must be called with interrupts disabled, to prevent a race with the
// process being moved to a different CPU.
pub fn cpuid() -> usize {
    r_tp() as usize
}

// Return this CPU's cpu struct.
// Interrupts must be disabled.
pub fn mycpu() -> &'static mut Cpu {
    unsafe { &mut CPUS[cpuid()] }
}

pub(crate) fn proc_slot(idx: usize) -> &'static mut Proc {
    unsafe { &mut PROCS[idx] }
}

// the channel a process sleeps on while waiting for its children.
fn proc_chan(idx: usize) -> usize {
    unsafe { &PROCS[idx] as *const Proc as usize }
}

fn init_idx() -> usize {
    unsafe { INIT_PROC }
}

// Return the current struct proc.
pub fn myproc() -> &'static mut Proc {
    proc_slot(myproc_idx())
}

pub fn myproc_idx() -> usize {
    push_off();
    let idx = mycpu().proc.expect("myproc: no process");
    pop_off();
    idx
}

fn allocpid() -> i32 {
    PID_LOCK.acquire();
    let pid = unsafe { NEXT_PID };
    unsafe {
        NEXT_PID = match NEXT_PID.checked_add(1) {
            Some(n) => n,
            None => panic!("allocpid: overflow"),
        };
    }
    PID_LOCK.release();
    pid
}

// Allocate a page for each process's kernel stack.
// Map it high in the kernel address space, with an unmapped
// guard page below it.
pub fn proc_mapstacks(kpgtbl: &mut PageTable) {
    for idx in 0..NPROC {
        let pa = pmem_alloc(true);
        kvmmap(
            kpgtbl,
            KSTACK!(idx),
            pa as usize,
            PGSIZE,
            PteFlags::R | PteFlags::W,
        );
    }
}

// initialize the proc table.
pub fn procinit() {
    for idx in 0..NPROC {
        // the locks are statically initialized; just record each
        // slot's kernel stack address.
        proc_slot(idx).kstack = KSTACK!(idx);
    }
}

// Look in the process table for an UNUSED slot.
// If found, initialize state required to run in the kernel
// and return the slot index with its lock held.
// If there is no free slot, return None.
fn allocproc() -> Option<usize> {
    for idx in 0..NPROC {
        let p = proc_slot(idx);
        p.lock.acquire();
        if p.state != ProcState::Unused {
            p.lock.release();
            continue;
        }

        p.pid = allocpid();

        // Allocate a trapframe page.
        p.trapframe = pmem_alloc(false) as *mut Trapframe;

        // A user page table with trampoline and trapframe pre-mapped.
        p.pagetable = proc_pagetable(p.trapframe as usize);

        // Set up a new context to start executing at forkret,
        // which returns to user space.
        p.context = Context::zeroed();
        p.context.ra = forkret as usize as u64;
        p.context.sp = (p.kstack + PGSIZE) as u64;

        return Some(idx);
    }
    None
}

// free a proc structure and the data hanging from it,
// including user pages.
// p.lock must be held.
fn freeproc(p: &mut Proc) {
    if !p.trapframe.is_null() {
        pmem_free(p.trapframe as usize, false);
    }
    p.trapframe = ptr::null_mut();

    if !p.pagetable.is_null() {
        uvm_destroy(unsafe { &mut *p.pagetable });
    }
    p.pagetable = ptr::null_mut();

    region_free_chain(p.mmap);
    p.mmap = NIL;

    p.pid = 0;
    p.parent = None;
    p.name = "";
    p.chan = 0;
    p.xstate = 0;
    p.heap_top = 0;
    p.ustack_pages = 0;
    p.state = ProcState::Unused;
}

// Create a user page table for a given process, with no user memory,
// but with trampoline and trapframe pages.
fn proc_pagetable(trapframe: usize) -> *mut PageTable {
    let pagetable = uvm_create();
    let pgtbl = unsafe { &mut *pagetable };

    // map the trampoline code (for system call return)
    // at the highest user virtual address.
    // only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    extern "C" {
        static _trampoline: u8;
    }
    let trampoline_addr = unsafe { &_trampoline } as *const u8 as usize;
    mappages(
        pgtbl,
        TRAMPOLINE,
        trampoline_addr,
        PGSIZE,
        PteFlags::R | PteFlags::X,
    );

    // map the trapframe page just below the trampoline page.
    mappages(
        pgtbl,
        TRAPFRAME,
        trapframe,
        PGSIZE,
        PteFlags::R | PteFlags::W,
    );

    pagetable
}

// Set up the first user process.
//
// Its address space:
//   trampoline  (1 page, shared)
//   trapframe   (1 page)
//   ustack      (1 page)
//   ...         mmap window, empty
//   ...
//               <- heap_top
//   code + data (1 page, the embedded initcode)
//   guard       (1 page, never mapped)
pub fn userinit() {
    let idx = allocproc().expect("userinit: no slot");
    let p = proc_slot(idx);
    let pgtbl = unsafe { &mut *p.pagetable };

    // one page of user stack directly below the trapframe.
    let page = pmem_alloc(false);
    mappages(
        pgtbl,
        TRAPFRAME - PGSIZE,
        page as usize,
        PGSIZE,
        PteFlags::R | PteFlags::W | PteFlags::U,
    );
    p.ustack_pages = 1;

    // one page of code+data, holding initcode.
    let code_len =
        unsafe { &initcode_end as *const u8 as usize - &initcode_start as *const u8 as usize };
    if code_len > PGSIZE {
        panic!("userinit: initcode too big");
    }
    let page = pmem_alloc(false);
    mappages(
        pgtbl,
        USER_BASE,
        page as usize,
        PGSIZE,
        PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U,
    );
    memmove(page, unsafe { &initcode_start } as *const u8, code_len);

    p.heap_top = USER_BASE + PGSIZE;

    // the whole mmap window starts out free.
    p.mmap = region_alloc();
    let m = node(p.mmap);
    m.begin = MMAP_BEGIN;
    m.npages = MMAP_NPAGES;
    m.next = NIL;

    // prepare for the very first "return" from kernel to user.
    let tf = unsafe { &mut *p.trapframe };
    tf.epc = USER_BASE as u64; // user program counter
    tf.sp = TRAPFRAME as u64; // user stack pointer

    p.name = "init";
    unsafe {
        INIT_PROC = idx;
    }

    p.state = ProcState::Runnable;
    p.lock.release();
}

// A fork child's very first scheduling by scheduler()
// will swtch to forkret.
extern "C" fn forkret() {
    // Still holding p.lock from scheduler.
    myproc().lock.release();

    static FIRST: AtomicBool = AtomicBool::new(true);
    if FIRST.swap(false, Ordering::AcqRel) {
        // File system startup must run in the context of a regular
        // process (it sleeps on disk I/O), so it cannot run in kmain().
        fs::fsinit(ROOTDEV);

        #[cfg(feature = "selftest")]
        crate::selftest::run();
    }

    usertrapret();
}

// Create a new process, copying the parent.
// Sets up the child kernel stack to return as if from fork().
// Returns the child's pid in the parent.
pub fn fork() -> i32 {
    let pidx = myproc_idx();
    let p = proc_slot(pidx);

    let cidx = allocproc().expect("fork: no free proc slot");
    let c = proc_slot(cidx);

    c.heap_top = p.heap_top;
    c.ustack_pages = p.ustack_pages;

    // the child's view of the mmap window must match the pages it is
    // about to receive, so clone the parent's free list.
    c.mmap = region_clone_chain(p.mmap);
    c.parent = Some(pidx);

    uvm_copy(
        unsafe { &mut *p.pagetable },
        unsafe { &mut *c.pagetable },
        c.heap_top,
        c.ustack_pages,
        p.mmap,
    );

    // the child resumes at the same user pc, seeing 0 from fork.
    unsafe {
        *c.trapframe = *p.trapframe;
        (*c.trapframe).a0 = 0;
    }

    c.name = p.name;
    let pid = c.pid;

    c.state = ProcState::Runnable;
    c.lock.release();

    pid
}

// Pass the exiting process's abandoned children to init.
// Caller must hold the exiting process's lock.
fn reparent(parent: usize) {
    for idx in 0..NPROC {
        if idx == parent {
            continue;
        }
        let p = proc_slot(idx);
        if p.parent == Some(parent) {
            p.lock.acquire();
            p.parent = Some(init_idx());
            p.lock.release();
        }
    }
}

// Wake a single process sleeping on its own wait channel.
// Caller must hold that process's lock.
fn wakeup_one(idx: usize) {
    let p = proc_slot(idx);
    if !p.lock.holding() {
        panic!("wakeup_one");
    }
    if p.state == ProcState::Sleeping && p.chan == proc_chan(idx) {
        p.state = ProcState::Runnable;
    }
}

// Exit the current process. Does not return.
// The process stays a zombie until its parent calls wait().
pub fn exit(status: i32) -> ! {
    let pidx = myproc_idx();
    if pidx == init_idx() {
        panic!("init exiting");
    }

    // init may be sleeping in wait(); it is about to gain children.
    let ip = proc_slot(init_idx());
    ip.lock.acquire();
    wakeup_one(init_idx());
    ip.lock.release();

    // If our own parent exits concurrently, p.parent is rewritten to
    // init under p.lock, so take a snapshot first.
    let p = proc_slot(pidx);
    p.lock.acquire();
    let parent = p.parent.expect("exit: no parent");
    p.lock.release();

    // Lock order: parent before child, same as wait().
    let pp = proc_slot(parent);
    pp.lock.acquire();
    p.lock.acquire();

    reparent(pidx);
    wakeup_one(parent);

    p.xstate = status;
    p.state = ProcState::Zombie;

    pp.lock.release();

    // Jump into the scheduler, never to return.
    sched();
    panic!("zombie exit");
}

// Wait for a child process to exit, copy its exit status to addr
// (if addr is non-zero) and return its pid; -1 if this process has
// no children or the status copy fails.
pub fn wait(addr: usize) -> i32 {
    let pidx = myproc_idx();
    let p = proc_slot(pidx);

    p.lock.acquire();
    loop {
        let mut havekids = false;
        for idx in 0..NPROC {
            if idx == pidx {
                continue;
            }
            let np = proc_slot(idx);
            if np.parent != Some(pidx) {
                continue;
            }

            // make sure the child isn't still in exit() or swtch().
            np.lock.acquire();
            havekids = true;
            if np.state == ProcState::Zombie {
                let pid = np.pid;
                if addr != 0 {
                    let n = crate::vm::copyout(
                        unsafe { &mut *p.pagetable },
                        addr,
                        &np.xstate as *const i32 as *const u8,
                        core::mem::size_of::<i32>(),
                    );
                    if n != core::mem::size_of::<i32>() {
                        np.lock.release();
                        p.lock.release();
                        return -1;
                    }
                }
                freeproc(np);
                np.lock.release();
                p.lock.release();
                return pid;
            }
            np.lock.release();
        }

        if !havekids {
            p.lock.release();
            return -1;
        }

        // Wait for a child to exit.
        sleep(proc_chan(pidx), &p.lock);
    }
}

// Per-CPU process scheduler.
// Each CPU calls scheduler() after setting itself up.
// Scheduler never returns. It loops, doing:
//  - choose a process to run.
//  - swtch to start running that process.
//  - eventually that process transfers control
//    via swtch back to the scheduler.
pub fn scheduler() -> ! {
    let c = mycpu();
    c.proc = None;

    loop {
        // The only place in the kernel where this hart sits with
        // interrupts enabled and no process: let devices through.
        intr_on();

        for idx in 0..NPROC {
            let p = proc_slot(idx);
            p.lock.acquire();
            if p.state == ProcState::Runnable {
                // Switch to the chosen process. It is the process's
                // job to release its lock and then reacquire it
                // before jumping back to us.
                p.state = ProcState::Running;
                c.proc = Some(idx);
                unsafe {
                    swtch(&mut c.context, &mut p.context);
                }

                // Process is done running for now.
                c.proc = None;
            }
            p.lock.release();
        }
    }
}

// Switch to scheduler. Must hold only p.lock and have changed
// proc.state. Saves and restores intena because intena is a property
// of this kernel thread, not this CPU.
pub fn sched() {
    let p = myproc();
    let c = mycpu();

    if !p.lock.holding() {
        panic!("sched p->lock");
    }
    if c.noff != 1 {
        panic!("sched locks");
    }
    if p.state == ProcState::Running {
        panic!("sched running");
    }
    if intr_get() {
        panic!("sched interruptible");
    }

    let intena = c.intena;
    unsafe {
        swtch(&mut p.context, &mut c.context);
    }
    mycpu().intena = intena;
}

// Give up the CPU for one scheduling round.
pub fn yield_cpu() {
    let p = myproc();
    p.lock.acquire();
    p.state = ProcState::Runnable;
    sched();
    p.lock.release();
}

// Atomically release lk and sleep on chan.
// Reacquires lk when awakened.
pub fn sleep(chan: usize, lk: &Spinlock) {
    let p = myproc();

    // Must acquire p.lock in order to change p.state and then call
    // sched. Once we hold p.lock, we can be guaranteed that we won't
    // miss any wakeup (wakeup locks p.lock), so it's okay to release
    // lk.
    let guard_is_self = ptr::eq(lk, &p.lock);
    if !guard_is_self {
        p.lock.acquire();
        lk.release();
    }

    // Go to sleep.
    p.chan = chan;
    p.state = ProcState::Sleeping;

    sched();

    // Tidy up.
    p.chan = 0;

    // Reacquire original lock.
    if !guard_is_self {
        p.lock.release();
        lk.acquire();
    }
}

// Wake up all processes sleeping on chan.
// Must be called without any p.lock.
pub fn wakeup(chan: usize) {
    for idx in 0..NPROC {
        let p = proc_slot(idx);
        p.lock.acquire();
        if p.state == ProcState::Sleeping && p.chan == chan {
            p.state = ProcState::Runnable;
        }
        p.lock.release();
    }
}
