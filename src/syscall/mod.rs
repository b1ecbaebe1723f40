mod sysblock;
mod sysmem;
mod sysproc;

use crate::printf;
use crate::proc::myproc;
use crate::vm::copyin_str;

// System call numbers. These are stable: initcode hardcodes them.
pub const SYS_PRINT: usize = 0;
pub const SYS_BRK: usize = 1;
pub const SYS_MMAP: usize = 2;
pub const SYS_MUNMAP: usize = 3;
pub const SYS_FORK: usize = 4;
pub const SYS_WAIT: usize = 5;
pub const SYS_EXIT: usize = 6;
pub const SYS_SLEEP: usize = 7;
pub const SYS_ALLOC_BLOCK: usize = 8;
pub const SYS_FREE_BLOCK: usize = 9;
pub const SYS_READ_BLOCK: usize = 10;
pub const SYS_WRITE_BLOCK: usize = 11;
pub const SYS_RELEASE_BLOCK: usize = 12;
pub const SYS_SHOW_BUF: usize = 13;

/// the syscall failure return value, -1 as seen from user space.
pub const ERR: u64 = u64::MAX;

// Fetch the raw n'th system call argument from the trapframe.
fn argraw(n: usize) -> u64 {
    let tf = unsafe { &*myproc().trapframe };
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("argraw"),
    }
}

// Retrieve an argument as a user address.
// Doesn't check for legality, since copyin/copyout do that.
pub(super) fn argaddr(n: usize) -> usize {
    argraw(n) as usize
}

// Fetch the nth 32-bit system call argument.
pub(super) fn argint(n: usize) -> i32 {
    argraw(n) as i32
}

pub(super) fn arg_u32(n: usize) -> u32 {
    argraw(n) as u32
}

// Fetch the nth argument as a null-terminated string into buf.
// Returns the string length on success.
pub(super) fn argstr(n: usize, buf: &mut [u8]) -> Result<usize, ()> {
    let addr = argaddr(n);
    let p = myproc();
    let max = buf.len();
    copyin_str(unsafe { &mut *p.pagetable }, buf, addr, max)
}

// An array mapping syscall numbers to their handlers.
const SYSCALLS: [fn() -> u64; 14] = {
    let mut arr: [fn() -> u64; 14] = [sysproc::sys_print; 14];
    arr[SYS_PRINT] = sysproc::sys_print;
    arr[SYS_BRK] = sysmem::sys_brk;
    arr[SYS_MMAP] = sysmem::sys_mmap;
    arr[SYS_MUNMAP] = sysmem::sys_munmap;
    arr[SYS_FORK] = sysproc::sys_fork;
    arr[SYS_WAIT] = sysproc::sys_wait;
    arr[SYS_EXIT] = sysproc::sys_exit;
    arr[SYS_SLEEP] = sysproc::sys_sleep;
    arr[SYS_ALLOC_BLOCK] = sysblock::sys_alloc_block;
    arr[SYS_FREE_BLOCK] = sysblock::sys_free_block;
    arr[SYS_READ_BLOCK] = sysblock::sys_read_block;
    arr[SYS_WRITE_BLOCK] = sysblock::sys_write_block;
    arr[SYS_RELEASE_BLOCK] = sysblock::sys_release_block;
    arr[SYS_SHOW_BUF] = sysblock::sys_show_buf;
    arr
};

pub fn syscall() {
    let p = myproc();
    let tf = unsafe { &mut *p.trapframe };
    let num = tf.a7 as usize;

    if num < SYSCALLS.len() {
        // the handler reads its arguments from the trapframe and its
        // return value goes back to the user in a0.
        tf.a0 = SYSCALLS[num]();
    } else {
        printf!("{} {}: unknown sys call {}\n", p.pid, p.name, num);
        tf.a0 = ERR;
    }
}
