// Per-process user address-space operations: the sparse mmap window,
// the heap, and the fork-time copy. The page-table mechanics live in
// vm.rs; this layer keeps a process's free-interval list and its page
// table telling the same story.

use crate::memlayout::{MMAP_BEGIN, MMAP_END, TRAPFRAME, USER_BASE};
use crate::mmap::{node, region_alloc, region_free, Handle, NIL};
use crate::pmem::pmem_alloc;
use crate::proc::myproc;
use crate::riscv::{PageTable, PteFlags, PGSIZE};
use crate::string::memmove;
use crate::vm::{mappages, unmappages, walk};
use crate::PGROUNDUP;

/// Carve [begin, begin + npages*PGSIZE) out of the current process's
/// free list and back it with fresh user frames mapped with perm.
/// Fails (list untouched) when the range is not contained in a single
/// free interval.
pub fn uvm_mmap(begin: usize, npages: usize, perm: PteFlags) -> Result<(), ()> {
    if npages == 0 {
        return Ok(());
    }
    if begin % PGSIZE != 0 {
        panic!("uvm_mmap: begin not aligned");
    }

    let p = myproc();
    let nstart = begin;
    let nend = begin + npages * PGSIZE;

    let mut prev: Handle = NIL;
    let mut cur = p.mmap;
    while cur != NIL {
        let ostart = node(cur).begin;
        let oend = ostart + node(cur).npages * PGSIZE;

        if nstart >= ostart && nend <= oend {
            if nstart == ostart && nend == oend {
                // consume the whole interval
                let next = node(cur).next;
                if prev == NIL {
                    p.mmap = next;
                } else {
                    node(prev).next = next;
                }
                region_free(cur);
            } else if nstart == ostart {
                // cut prefix
                node(cur).begin = nend;
                node(cur).npages = (oend - nend) / PGSIZE;
            } else if nend == oend {
                // cut suffix
                node(cur).npages = (nstart - ostart) / PGSIZE;
            } else {
                // split in the middle
                let tail = region_alloc();
                node(tail).begin = nend;
                node(tail).npages = (oend - nend) / PGSIZE;
                node(tail).next = node(cur).next;
                node(cur).npages = (nstart - ostart) / PGSIZE;
                node(cur).next = tail;
            }

            let pgtbl = unsafe { &mut *p.pagetable };
            let mut va = nstart;
            while va < nend {
                mappages(pgtbl, va, pmem_alloc(false) as usize, PGSIZE, perm);
                va += PGSIZE;
            }
            return Ok(());
        }

        prev = cur;
        cur = node(cur).next;
    }

    Err(())
}

/// Undo a uvm_mmap: unmap the range, free the frames, and give the
/// interval back to the free list, coalescing with its neighbours.
/// Unmapping pages that are not mapped (e.g. an interval that is
/// already free) is fatal.
pub fn uvm_munmap(begin: usize, npages: usize) {
    if npages == 0 {
        return;
    }
    if begin % PGSIZE != 0 {
        panic!("uvm_munmap: begin not aligned");
    }

    let p = myproc();
    let end = begin + npages * PGSIZE;

    let pgtbl = unsafe { &mut *p.pagetable };
    unmappages(pgtbl, begin, npages * PGSIZE, true);

    // find the insertion point: prev ends at or before begin,
    // cur starts at or after end.
    let mut prev: Handle = NIL;
    let mut cur = p.mmap;
    while cur != NIL && node(cur).begin < begin {
        prev = cur;
        cur = node(cur).next;
    }

    if cur != NIL && end > node(cur).begin {
        panic!("uvm_munmap: overlaps free interval");
    }
    if prev != NIL && node(prev).begin + node(prev).npages * PGSIZE > begin {
        panic!("uvm_munmap: overlaps free interval");
    }

    let merge_left = prev != NIL && node(prev).begin + node(prev).npages * PGSIZE == begin;
    let merge_right = cur != NIL && end == node(cur).begin;

    if merge_left && merge_right {
        // the freed interval bridges both neighbours; absorb the
        // right node into the left one.
        node(prev).npages += npages + node(cur).npages;
        node(prev).next = node(cur).next;
        region_free(cur);
    } else if merge_left {
        node(prev).npages += npages;
    } else if merge_right {
        node(cur).begin = begin;
        node(cur).npages += npages;
    } else {
        let h = region_alloc();
        node(h).begin = begin;
        node(h).npages = npages;
        node(h).next = cur;
        if prev == NIL {
            p.mmap = h;
        } else {
            node(prev).next = h;
        }
    }
}

/// Grow the heap by len bytes, mapping fresh U|R|W pages for every
/// page boundary crossed. The returned heap top is exact, not
/// page-rounded. Returns None (heap untouched) if the new top would
/// run into the trap structures at the top of the address space.
pub fn uvm_heap_grow(pgtbl: &mut PageTable, heap_top: usize, len: usize) -> Option<usize> {
    let new_top = heap_top + len;
    if new_top > TRAPFRAME - PGSIZE {
        return None;
    }

    let mut va = PGROUNDUP!(heap_top);
    while va < PGROUNDUP!(new_top) {
        mappages(
            pgtbl,
            va,
            pmem_alloc(false) as usize,
            PGSIZE,
            PteFlags::U | PteFlags::R | PteFlags::W,
        );
        va += PGSIZE;
    }

    Some(new_top)
}

/// Shrink the heap by len bytes, unmapping and freeing the whole
/// pages that fall out of the new top.
pub fn uvm_heap_ungrow(pgtbl: &mut PageTable, heap_top: usize, len: usize) -> usize {
    let new_top = heap_top - len;
    if PGROUNDUP!(new_top) < PGROUNDUP!(heap_top) {
        let npages = (PGROUNDUP!(heap_top) - PGROUNDUP!(new_top)) / PGSIZE;
        unmappages(pgtbl, PGROUNDUP!(new_top), npages * PGSIZE, true);
    }
    new_top
}

// Copy the mappings of [begin, end) from old into new, backing them
// with fresh user frames and duplicating the contents. Used by fork.
fn copy_range(old: &mut PageTable, new: &mut PageTable, begin: usize, end: usize) {
    let mut va = begin;
    while va < end {
        let pte = walk(old, va, false).expect("uvm_copy: no pte");
        if !pte.is_valid() {
            panic!("uvm_copy: page not present");
        }
        let pa = pte.pa();
        let flags = pte.flags();

        let page = pmem_alloc(false);
        memmove(page, pa as *const u8, PGSIZE);
        mappages(new, va, page as usize, PGSIZE, flags);
        va += PGSIZE;
    }
}

/// Duplicate a user address space for fork: the code+heap range, the
/// user stack, and every currently-mapped page of the mmap window.
/// The mapped mmap pages are exactly the gaps between the free
/// intervals, walked with a cursor from MMAP_BEGIN to MMAP_END.
/// Trampoline and trapframe are the new page table's own, installed
/// when it was created.
pub fn uvm_copy(
    old: &mut PageTable,
    new: &mut PageTable,
    heap_top: usize,
    ustack_pages: usize,
    mmap_list: Handle,
) {
    copy_range(old, new, USER_BASE, PGROUNDUP!(heap_top));
    copy_range(old, new, TRAPFRAME - ustack_pages * PGSIZE, TRAPFRAME);

    let mut cursor = MMAP_BEGIN;
    let mut h = mmap_list;
    while h != NIL {
        let free_begin = node(h).begin;
        copy_range(old, new, cursor, free_begin);
        cursor = free_begin + node(h).npages * PGSIZE;
        h = node(h).next;
    }
    copy_range(old, new, cursor, MMAP_END);
}
