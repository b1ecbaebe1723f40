use crate::memlayout::{MMAP_BEGIN, MMAP_END, USER_BASE};
use crate::mmap::{node, NIL};
use crate::proc::myproc;
use crate::riscv::{PteFlags, PGSIZE};
use crate::syscall::{argaddr, ERR};
use crate::uvm::{uvm_heap_grow, uvm_heap_ungrow, uvm_mmap, uvm_munmap};

// Move the heap top to the requested address; 0 queries it.
// Returns the (new) heap top, or -1 if the heap would collide with
// the user stack region.
pub fn sys_brk() -> u64 {
    let new_top = argaddr(0);
    let p = myproc();
    let old_top = p.heap_top;

    if new_top == 0 {
        return old_top as u64;
    }

    // the single code+data page sits right below the heap.
    if new_top < USER_BASE + PGSIZE {
        return ERR;
    }

    let pgtbl = unsafe { &mut *p.pagetable };
    if new_top > old_top {
        match uvm_heap_grow(pgtbl, old_top, new_top - old_top) {
            Some(top) => p.heap_top = top,
            None => return ERR,
        }
    } else {
        p.heap_top = uvm_heap_ungrow(pgtbl, old_top, old_top - new_top);
    }
    p.heap_top as u64
}

// Map len bytes of fresh user memory at start, or anywhere (first
// fit) when start is 0. Returns the mapped address.
pub fn sys_mmap() -> u64 {
    let start = argaddr(0);
    let len = argaddr(1);

    if len == 0 || len % PGSIZE != 0 {
        return ERR;
    }
    let npages = len / PGSIZE;
    let perm = PteFlags::U | PteFlags::R | PteFlags::W;

    if start == 0 {
        // kernel picks the spot: first free interval that is big enough.
        let p = myproc();
        let mut h = p.mmap;
        while h != NIL && node(h).npages < npages {
            h = node(h).next;
        }
        if h == NIL {
            return ERR;
        }
        let begin = node(h).begin;
        match uvm_mmap(begin, npages, perm) {
            Ok(()) => begin as u64,
            Err(()) => ERR,
        }
    } else {
        let end = match start.checked_add(len) {
            Some(e) => e,
            None => return ERR,
        };
        if start % PGSIZE != 0 || start < MMAP_BEGIN || end > MMAP_END {
            return ERR;
        }
        match uvm_mmap(start, npages, perm) {
            Ok(()) => start as u64,
            Err(()) => ERR,
        }
    }
}

// Unmap [start, start + len), returning it to the free list.
pub fn sys_munmap() -> u64 {
    let start = argaddr(0);
    let len = argaddr(1);

    if len == 0 || len % PGSIZE != 0 || start % PGSIZE != 0 {
        return ERR;
    }
    let end = match start.checked_add(len) {
        Some(e) => e,
        None => return ERR,
    };
    if start < MMAP_BEGIN || end > MMAP_END {
        return ERR;
    }

    uvm_munmap(start, len / PGSIZE);
    0
}
