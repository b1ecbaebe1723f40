use core::ptr;

use crate::memlayout::PHYSTOP;
use crate::param::KERN_PAGES;
use crate::riscv::PGSIZE;
use crate::spinlock::Spinlock;
use crate::string::memset;
use crate::PGROUNDUP;

extern "C" {
    // first address after kernel.
    // defined by kernel.ld.
    static mut end: u8;
}

struct Run {
    next: *mut Run,
}

/// One range of allocatable frames with its own LIFO free list.
/// The list nodes live in the free frames themselves.
struct AllocRegion {
    begin: usize,
    end: usize,
    lock: Spinlock,
    allocable: u32,
    freelist: *mut Run,
}

// Frames for kernel data structures (page tables, kernel stacks, disk
// queues) come from the first KERN_PAGES allocatable frames; user
// memory comes from the rest. Keeping the pools disjoint means a
// runaway user allocation cannot starve the kernel of metadata frames.
static mut KERN_REGION: AllocRegion = AllocRegion {
    begin: 0,
    end: 0,
    lock: Spinlock::new("kern_region"),
    allocable: 0,
    freelist: ptr::null_mut(),
};

static mut USER_REGION: AllocRegion = AllocRegion {
    begin: 0,
    end: 0,
    lock: Spinlock::new("user_region"),
    allocable: 0,
    freelist: ptr::null_mut(),
};

fn region(in_kernel: bool) -> &'static mut AllocRegion {
    unsafe {
        if in_kernel {
            &mut KERN_REGION
        } else {
            &mut USER_REGION
        }
    }
}

pub fn pmeminit() {
    let alloc_begin = PGROUNDUP!(unsafe { &end } as *const u8 as usize);

    unsafe {
        KERN_REGION.begin = alloc_begin;
        KERN_REGION.end = alloc_begin + KERN_PAGES * PGSIZE;
        USER_REGION.begin = KERN_REGION.end;
        USER_REGION.end = PHYSTOP;
    }

    freerange(alloc_begin, region(true).end, true);
    freerange(region(false).begin, PHYSTOP, false);
}

fn freerange(pa_start: usize, pa_end: usize, in_kernel: bool) {
    let mut p = PGROUNDUP!(pa_start);
    while p + PGSIZE <= pa_end {
        pmem_free(p, in_kernel);
        p += PGSIZE;
    }
}

/// Return one zeroed frame from the requested pool.
/// Running a pool dry is fatal.
pub fn pmem_alloc(in_kernel: bool) -> *mut u8 {
    let region = region(in_kernel);

    region.lock.acquire();
    let r = region.freelist;
    if r.is_null() {
        panic!("pmem_alloc: out of memory");
    }
    unsafe {
        region.freelist = (*r).next;
    }
    region.allocable -= 1;
    region.lock.release();

    memset(r as *mut u8, 0, PGSIZE);
    r as *mut u8
}

/// Free the frame at physical address pa, which normally should have
/// been returned by a call to pmem_alloc(). (The exception is when
/// initializing the pools; see pmeminit above.)
pub fn pmem_free(pa: usize, in_kernel: bool) {
    let region = region(in_kernel);

    if pa % PGSIZE != 0 || pa < region.begin || pa >= region.end {
        panic!("pmem_free: page out of range");
    }

    // Scrub before relinking so stale data never leaks to the next owner.
    memset(pa as *mut u8, 0, PGSIZE);

    let r = pa as *mut Run;
    region.lock.acquire();
    unsafe {
        (*r).next = region.freelist;
    }
    region.freelist = r;
    region.allocable += 1;
    region.lock.release();
}

/// How many frames the pool could still hand out.
pub fn pmem_allocable(in_kernel: bool) -> u32 {
    let region = region(in_kernel);
    region.lock.acquire();
    let n = region.allocable;
    region.lock.release();
    n
}
