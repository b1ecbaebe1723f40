use crate::memlayout::{KERNBASE, PHYSTOP, PLIC, TRAMPOLINE, UART0, VIRTIO0};
use crate::pmem::{pmem_alloc, pmem_free};
use crate::proc::proc_mapstacks;
use crate::riscv::{sfence_vma, w_satp, PageTable, Pte, PteFlags, MAXVA, PGSIZE};
use crate::string::memmove;
use crate::{MAKE_SATP, PGROUNDDOWN, PX};

/*
 * the kernel's page table.
 */
static mut KERNEL_PAGETABLE: *mut PageTable = core::ptr::null_mut();

extern "C" {
    static etext: u8; // kernel.ld sets this to end of kernel code.
    static _trampoline: u8; // trampoline.S
}

// Make a direct-map page table for the kernel.
fn kvmmake() -> *mut PageTable {
    let kpgtbl = uvm_create();
    let kpgtbl_ref = unsafe { &mut *kpgtbl };

    // uart registers
    kvmmap(kpgtbl_ref, UART0, UART0, PGSIZE, PteFlags::R | PteFlags::W);

    // virtio mmio disk interface
    kvmmap(kpgtbl_ref, VIRTIO0, VIRTIO0, PGSIZE, PteFlags::R | PteFlags::W);

    // PLIC
    kvmmap(kpgtbl_ref, PLIC, PLIC, 0x400000, PteFlags::R | PteFlags::W);

    // map kernel text executable and read-only.
    let etext_addr = unsafe { &etext } as *const u8 as usize;
    kvmmap(
        kpgtbl_ref,
        KERNBASE,
        KERNBASE,
        etext_addr - KERNBASE,
        PteFlags::R | PteFlags::X,
    );

    // map kernel data and the physical RAM we'll make use of.
    kvmmap(
        kpgtbl_ref,
        etext_addr,
        etext_addr,
        PHYSTOP - etext_addr,
        PteFlags::R | PteFlags::W,
    );

    // map the trampoline for trap entry/exit to
    // the highest virtual address in the kernel.
    let trampoline_addr = unsafe { &_trampoline } as *const u8 as usize;
    kvmmap(
        kpgtbl_ref,
        TRAMPOLINE,
        trampoline_addr,
        PGSIZE,
        PteFlags::R | PteFlags::X,
    );

    // allocate and map a kernel stack for each process slot.
    proc_mapstacks(kpgtbl_ref);

    kpgtbl
}

// Initialize the one kernel page table.
pub fn kvminit() {
    unsafe {
        KERNEL_PAGETABLE = kvmmake();
    }
}

// Switch the hart's page table register to the kernel's page table,
// and enable paging.
pub fn kvminithart() {
    // wait for any previous writes to the page table memory to finish.
    sfence_vma();

    w_satp(MAKE_SATP!(unsafe { KERNEL_PAGETABLE } as usize));

    // flush stale entries from the TLB.
    sfence_vma();
}

// add a mapping to the kernel page table.
// only used when booting.
// does not flush TLB or enable paging.
pub fn kvmmap(kpgtbl: &mut PageTable, va: usize, pa: usize, sz: usize, perm: PteFlags) {
    mappages(kpgtbl, va, pa, sz, perm);
}

// Return a mutable reference to the PTE in page table pagetable
// that corresponds to virtual address va. If alloc is true,
// create any required page-table pages (from the kernel pool).
//
// The risc-v Sv39 scheme has three levels of page-table
// pages. A page-table page contains 512 64-bit PTEs.
// A 64-bit virtual address is split into five fields:
//   39..63 -- must be zero.
//   30..38 -- 9 bits of level-2 index.
//   21..29 -- 9 bits of level-1 index.
//   12..20 -- 9 bits of level-0 index.
//    0..11 -- 12 bits of byte offset within the page.
pub fn walk(pagetable: &mut PageTable, va: usize, alloc: bool) -> Option<&'static mut Pte> {
    if va >= MAXVA {
        panic!("walk");
    }

    let mut curr: *mut PageTable = pagetable;
    for level in (1..3).rev() {
        let pte = unsafe { &mut (*curr).0[PX!(level, va)] };
        if pte.is_valid() {
            curr = pte.pa() as *mut PageTable;
        } else {
            if !alloc {
                return None;
            }
            let next = pmem_alloc(true) as *mut PageTable;
            *pte = Pte::new(next as usize, PteFlags::V);
            curr = next;
        }
    }

    Some(unsafe { &mut (*curr).0[PX!(0, va)] })
}

// Create PTEs for virtual addresses starting at va that refer to
// physical addresses starting at pa.
// Requires va and pa page-aligned, len > 0, va + len <= MAXVA;
// mapping over an existing mapping is fatal.
pub fn mappages(pagetable: &mut PageTable, va: usize, pa: usize, len: usize, perm: PteFlags) {
    if va % PGSIZE != 0 {
        panic!("mappages: va not aligned");
    }
    if pa % PGSIZE != 0 {
        panic!("mappages: pa not aligned");
    }
    if len == 0 || va + len > MAXVA {
        panic!("mappages: bad range");
    }

    let mut a = va;
    let mut pa = pa;
    let last = PGROUNDDOWN!(va + len - 1);
    loop {
        let pte = walk(pagetable, a, true).expect("mappages: walk");
        if pte.is_valid() {
            panic!("mappages: remap");
        }
        *pte = Pte::new(pa, perm | PteFlags::V);
        if a == last {
            break;
        }
        a += PGSIZE;
        pa += PGSIZE;
    }
}

// Remove the mappings in [va, va + len). va must be page-aligned and
// the range fully mapped with leaf entries.
// Optionally free the underlying user frames.
pub fn unmappages(pagetable: &mut PageTable, va: usize, len: usize, free_frames: bool) {
    if va % PGSIZE != 0 {
        panic!("unmappages: not aligned");
    }
    if len == 0 || va + len > MAXVA {
        panic!("unmappages: bad range");
    }

    let mut a = va;
    while a < va + len {
        let pte = walk(pagetable, a, false).expect("unmappages: walk");
        if !pte.is_valid() {
            panic!("unmappages: not mapped");
        }
        if !pte.is_leaf() {
            panic!("unmappages: not a leaf");
        }
        if free_frames {
            pmem_free(pte.pa(), false);
        }
        *pte = Pte::invalid();
        a += PGSIZE;
    }
}

// create an empty page table, backed by one kernel-pool frame.
pub fn uvm_create() -> *mut PageTable {
    pmem_alloc(true) as *mut PageTable
}

// Recursively free page-table pages and, at the bottom level,
// the user frames they map. level counts down from 2 (the root).
pub(crate) fn freewalk(pagetable: &mut PageTable, level: usize) {
    for pte in &mut pagetable.0 {
        if !pte.is_valid() {
            continue;
        }
        if level > 0 {
            if pte.is_leaf() {
                panic!("freewalk: leaf above level 0");
            }
            let child = unsafe { &mut *(pte.pa() as *mut PageTable) };
            freewalk(child, level - 1);
        } else {
            pmem_free(pte.pa(), false);
        }
        *pte = Pte::invalid();
    }

    pmem_free(pagetable as *mut PageTable as usize, true);
}

// Destroy a user page table and free everything it maps.
// The trapframe and trampoline are shared with the kernel and must be
// unmapped (without freeing their frames) before the recursive walk.
pub fn uvm_destroy(pagetable: &mut PageTable) {
    unmappages(pagetable, crate::memlayout::TRAPFRAME, PGSIZE, false);
    unmappages(pagetable, TRAMPOLINE, PGSIZE, false);
    freewalk(pagetable, 2);
}

// Look up a user virtual address and return its physical counterpart,
// or None if the page is unmapped or not user-accessible.
fn user_pa(pagetable: &mut PageTable, va: usize) -> Option<usize> {
    let pte = walk(pagetable, va, false)?;
    if !pte.is_valid() || !pte.flags().contains(PteFlags::U) {
        return None;
    }
    Some(pte.pa())
}

// Copy from user to kernel.
// Copy len bytes to dst from virtual address srcva in a given
// user page table. Stops at the first unmapped page; returns the
// number of bytes actually copied so callers can see truncation.
pub fn copyin(pagetable: &mut PageTable, dst: *mut u8, srcva: usize, len: usize) -> usize {
    let mut copied = 0;
    let mut dst = dst;
    let mut srcva = srcva;
    let mut len = len;

    while len > 0 {
        let va0 = PGROUNDDOWN!(srcva);
        let pa0 = match user_pa(pagetable, va0) {
            Some(pa) => pa,
            None => return copied,
        };
        let n = core::cmp::min(PGSIZE - (srcva - va0), len);
        memmove(dst, (pa0 + (srcva - va0)) as *const u8, n);

        len -= n;
        copied += n;
        dst = unsafe { dst.add(n) };
        srcva = va0 + PGSIZE;
    }
    copied
}

// Copy from kernel to user.
// Copy len bytes from src to virtual address dstva in a given
// user page table. Same truncation contract as copyin.
pub fn copyout(pagetable: &mut PageTable, dstva: usize, src: *const u8, len: usize) -> usize {
    let mut copied = 0;
    let mut src = src;
    let mut dstva = dstva;
    let mut len = len;

    while len > 0 {
        let va0 = PGROUNDDOWN!(dstva);
        let pa0 = match user_pa(pagetable, va0) {
            Some(pa) => pa,
            None => return copied,
        };
        let n = core::cmp::min(PGSIZE - (dstva - va0), len);
        memmove((pa0 + (dstva - va0)) as *mut u8, src, n);

        len -= n;
        copied += n;
        src = unsafe { src.add(n) };
        dstva = va0 + PGSIZE;
    }
    copied
}

// Copy a null-terminated string from user to kernel.
// Copy bytes to dst from virtual address srcva in a given user page
// table, until a '\0', or max. Returns the string length (excluding
// the nul) on success, or Err on an unmapped page or a missing nul.
pub fn copyin_str(
    pagetable: &mut PageTable,
    dst: &mut [u8],
    srcva: usize,
    max: usize,
) -> Result<usize, ()> {
    let mut srcva = srcva;
    let mut copied = 0;
    let max = core::cmp::min(max, dst.len());

    while copied < max {
        let va0 = PGROUNDDOWN!(srcva);
        let pa0 = match user_pa(pagetable, va0) {
            Some(pa) => pa,
            None => return Err(()),
        };
        let mut n = core::cmp::min(PGSIZE - (srcva - va0), max - copied);
        let mut p = (pa0 + (srcva - va0)) as *const u8;
        while n > 0 {
            let c = unsafe { p.read() };
            dst[copied] = c;
            if c == 0 {
                return Ok(copied);
            }
            copied += 1;
            n -= 1;
            p = unsafe { p.add(1) };
        }
        srcva = va0 + PGSIZE;
    }
    Err(())
}
