// The block-layer test surface: thin wrappers over the bitmap
// allocator and the buffer cache. A buffer returned by read_block
// stays locked until release_block, identified by an opaque handle.

use crate::bio::{bprint, bread, brelse, buf_handle, buf_lookup};
use crate::fs::bitmap;
use crate::param::ROOTDEV;
use crate::proc::myproc;
use crate::syscall::{argaddr, arg_u32, ERR};
use crate::vm::{copyin, copyout};

// how much of a block the test syscalls shuttle to and from user space.
const USER_WINDOW: usize = 128;

pub fn sys_alloc_block() -> u64 {
    let num = bitmap::alloc_block();
    bitmap::bitmap_print(unsafe { crate::fs::SB.data_bitmap_start });
    num as u64
}

pub fn sys_free_block() -> u64 {
    let num = arg_u32(0);
    bitmap::free_block(num);
    bitmap::bitmap_print(unsafe { crate::fs::SB.data_bitmap_start });
    0
}

// Read a block, copy the head of its payload to the user buffer, and
// return a handle to the still-locked buffer.
pub fn sys_read_block() -> u64 {
    let num = arg_u32(0);
    let addr = argaddr(1);

    let p = myproc();
    let b = bread(ROOTDEV, num);
    let n = copyout(
        unsafe { &mut *p.pagetable },
        addr,
        b.data.as_ptr(),
        USER_WINDOW,
    );
    if n != USER_WINDOW {
        brelse(b);
        return ERR;
    }
    buf_handle(b) as u64
}

// Overwrite the head of a held buffer's payload from user memory.
// The data reaches the disk when the buffer is evicted.
pub fn sys_write_block() -> u64 {
    let handle = argaddr(0);
    let addr = argaddr(1);

    let b = match buf_lookup(handle) {
        Some(b) => b,
        None => return ERR,
    };
    if !b.lock.holding_sleep() {
        return ERR;
    }

    let p = myproc();
    let n = copyin(
        unsafe { &mut *p.pagetable },
        b.data.as_mut_ptr(),
        addr,
        USER_WINDOW,
    );
    if n != USER_WINDOW {
        return ERR;
    }
    0
}

pub fn sys_release_block() -> u64 {
    let handle = argaddr(0);
    let b = match buf_lookup(handle) {
        Some(b) => b,
        None => return ERR,
    };
    if !b.lock.holding_sleep() {
        return ERR;
    }
    brelse(b);
    0
}

pub fn sys_show_buf() -> u64 {
    bprint();
    0
}
