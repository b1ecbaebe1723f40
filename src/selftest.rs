//! In-kernel test suites, compiled behind the `selftest` feature and
//! run once from pid 1's kernel context before it enters user space.
//! Each case prints one line and panics on the first violated
//! invariant, so a surviving boot is a passing run.

use crate::bio::{bread, brelse, buf_handle};
use crate::fs::bitmap;
use crate::memlayout::{MMAP_BEGIN, TRAPFRAME};
use crate::mmap::{node, NIL};
use crate::param::ROOTDEV;
use crate::pmem::{pmem_alloc, pmem_allocable, pmem_free};
use crate::printf;
use crate::proc::myproc;
use crate::riscv::{PteFlags, PGSIZE};
use crate::uvm::{uvm_heap_grow, uvm_heap_ungrow, uvm_mmap, uvm_munmap};
use crate::vm::{freewalk, mappages, unmappages, uvm_create, walk};

pub fn run() {
    printf!("\nselftest: begin\n");
    frame_pool();
    page_table();
    mmap_list();
    heap();
    buffer_cache();
    bitmap_roundtrip();
    printf!("selftest: all suites passed\n\n");
}

fn ok(name: &str) {
    printf!("selftest: {} [ok]\n", name);
}

// LIFO reuse, zeroing on both alloc and free, and counter accounting.
fn frame_pool() {
    let before = pmem_allocable(false);

    let pa = pmem_alloc(false);
    for i in 0..PGSIZE {
        assert!(unsafe { pa.add(i).read() } == 0, "frame not zeroed");
    }
    unsafe { pa.write(0xAB) };
    pmem_free(pa as usize, false);

    let again = pmem_alloc(false);
    assert!(again == pa, "free list is not LIFO");
    assert!(unsafe { again.read() } == 0, "freed frame not scrubbed");
    pmem_free(again as usize, false);

    assert!(pmem_allocable(false) == before, "frame counter drifted");
    ok("frame pool");
}

// map a page, read it back through walk, unmap it, free the tables.
fn page_table() {
    let pgtbl = unsafe { &mut *uvm_create() };
    let va = 0x5000_0000usize;
    let pa = pmem_alloc(false);

    mappages(pgtbl, va, pa as usize, PGSIZE, PteFlags::R | PteFlags::W);

    let pte = walk(pgtbl, va, false).expect("pte missing");
    assert!(pte.is_valid() && pte.is_leaf(), "bad leaf");
    assert!(pte.pa() == pa as usize, "pa mismatch");
    assert!(
        pte.flags().contains(PteFlags::R | PteFlags::W | PteFlags::V),
        "flags mismatch"
    );

    // neighbouring va in the same level-0 table must be unmapped.
    assert!(
        walk(pgtbl, va + PGSIZE, false).map_or(true, |p| !p.is_valid()),
        "stray mapping"
    );

    unmappages(pgtbl, va, PGSIZE, true);
    freewalk(pgtbl, 2);
    ok("page table");
}

fn collect_list() -> ([(usize, usize); 8], usize) {
    let mut out = [(0usize, 0usize); 8];
    let mut n = 0;
    let mut h = myproc().mmap;
    while h != NIL {
        assert!(n < out.len(), "mmap list unexpectedly long");
        out[n] = (node(h).begin, node(h).npages);
        // sorted, non-overlapping, non-adjacent.
        if n > 0 {
            assert!(
                out[n - 1].0 + out[n - 1].1 * PGSIZE < out[n].0,
                "mmap list not coalesced/sorted"
            );
        }
        n += 1;
        h = node(h).next;
    }
    (out, n)
}

// exercise all four reshape cases and all four coalesce cases, and
// check the list comes back bit-for-bit.
fn mmap_list() {
    let (orig, orig_n) = collect_list();

    let pg = |i: usize| MMAP_BEGIN + i * PGSIZE;
    let perm = PteFlags::U | PteFlags::R | PteFlags::W;

    // split: cut pages 4..6 out of the middle of the free window.
    uvm_mmap(pg(4), 2, perm).expect("mmap split");
    // prefix: pages 0..2.
    uvm_mmap(pg(0), 2, perm).expect("mmap prefix");
    // consume: pages 2..4 exactly match the hole left between them.
    uvm_mmap(pg(2), 2, perm).expect("mmap consume");

    // overlapping request must fail without touching the list.
    assert!(uvm_mmap(pg(3), 2, perm).is_err(), "overlap not refused");

    // free them back: right-merge, no-neighbour, bridge-both.
    uvm_munmap(pg(4), 2);
    uvm_munmap(pg(0), 2);
    uvm_munmap(pg(2), 2);

    // suffix cut, then left-merge on the way back.
    uvm_mmap(pg(8094), 2, perm).expect("mmap suffix");
    uvm_munmap(pg(8094), 2);

    let (now, now_n) = collect_list();
    assert!(now_n == orig_n && now == orig, "mmap list not restored");
    ok("mmap list");
}

// heap grow/ungrow restore the frame set; over-limit grow fails.
fn heap() {
    let p = myproc();
    let pgtbl = unsafe { &mut *p.pagetable };
    let top = p.heap_top;

    let new_top = uvm_heap_grow(pgtbl, top, PGSIZE + 123).expect("heap grow");
    assert!(new_top == top + PGSIZE + 123, "heap top not exact");

    // both pages backing [top, new_top) must be resident.
    let pte = walk(pgtbl, top, false).expect("heap page missing");
    assert!(pte.is_valid(), "heap page invalid");
    let pte = walk(pgtbl, top + PGSIZE, false).expect("heap page missing");
    assert!(pte.is_valid(), "heap page invalid");

    let back = uvm_heap_ungrow(pgtbl, new_top, new_top - top);
    assert!(back == top, "heap top not restored");
    assert!(
        walk(pgtbl, top, false).map_or(true, |p| !p.is_valid()),
        "heap page leaked"
    );

    // growing into the trap structures is refused, heap untouched.
    assert!(
        uvm_heap_grow(pgtbl, top, TRAPFRAME - top).is_none(),
        "over-limit grow not refused"
    );
    ok("heap");
}

// exhaust the cache, release two buffers (block 103's then block
// 100's), and check the next misses reuse exactly those slots,
// oldest release first, with the dirty payload written back before
// its slot turns over.
fn buffer_cache() {
    use crate::param::NBUF;

    // hold every buffer; block numbers 100.. are scratch space well
    // past the bitmap blocks.
    let mut held = [0usize; NBUF];
    for i in 0..NBUF {
        let b = bread(ROOTDEV, 100 + i as u32);
        held[i] = buf_handle(b);
    }

    // dirty block 103 while it is held, then free its buffer and
    // block 100's, in that order.
    let slot103 = held[3];
    let b103 = crate::bio::buf_lookup(slot103).unwrap();
    b103.data[0] = 0x5A;
    brelse(b103);

    let slot100 = held[0];
    brelse(crate::bio::buf_lookup(slot100).unwrap());

    // first miss evicts the least recently released buffer (103's),
    // writing the dirty payload back to disk first.
    let next = 100 + NBUF as u32;
    let b_new = bread(ROOTDEV, next);
    assert!(buf_handle(b_new) == slot103, "eviction order wrong");

    // second miss takes 100's slot; re-reading 103 from disk must
    // see the written-back byte.
    let b103 = bread(ROOTDEV, 103);
    assert!(buf_handle(b103) == slot100, "eviction order wrong");
    assert!(b103.data[0] == 0x5A, "write-back lost");

    brelse(b103);
    brelse(b_new);
    for i in 1..NBUF {
        if i != 3 {
            brelse(crate::bio::buf_lookup(held[i]).unwrap());
        }
    }
    ok("buffer cache");
}

// ordered allocation, out-of-order free, ordered re-allocation.
fn bitmap_roundtrip() {
    let b1 = bitmap::alloc_block();
    let b2 = bitmap::alloc_block();
    let b3 = bitmap::alloc_block();
    assert!(b1 < b2 && b2 < b3, "blocks not ascending");
    assert!(b2 == b1 + 1 && b3 == b2 + 1, "blocks not contiguous");

    bitmap::free_block(b2);
    bitmap::free_block(b1);
    bitmap::free_block(b3);

    assert!(bitmap::alloc_block() == b1, "bitmap scan order");
    assert!(bitmap::alloc_block() == b2, "bitmap scan order");
    assert!(bitmap::alloc_block() == b3, "bitmap scan order");

    bitmap::free_block(b1);
    bitmap::free_block(b2);
    bitmap::free_block(b3);

    let i1 = bitmap::alloc_inode();
    bitmap::free_inode(i1);
    assert!(bitmap::alloc_inode() == i1, "inode bitmap scan order");
    bitmap::free_inode(i1);
    ok("bitmap");
}
