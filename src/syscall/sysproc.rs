use crate::param::MAXARG;
use crate::printf;
use crate::proc::{exit, fork, sleep, wait};
use crate::syscall::{argaddr, argint, argstr, arg_u32, ERR};
use crate::trap::{ticks_chan, SYS_TICKS};

// Print a user string on the console.
pub fn sys_print() -> u64 {
    let mut buf = [0u8; MAXARG];
    let n = match argstr(0, &mut buf) {
        Ok(n) => n,
        Err(()) => return ERR,
    };
    if let Ok(s) = core::str::from_utf8(&buf[..n]) {
        printf!("{}", s);
    }
    0
}

pub fn sys_fork() -> u64 {
    fork() as u64
}

// Wait for a child; the exit status lands at the user address in a0.
pub fn sys_wait() -> u64 {
    let addr = argaddr(0);
    wait(addr) as i64 as u64
}

pub fn sys_exit() -> u64 {
    let status = argint(0);
    exit(status)
}

// Sleep for n timer ticks.
pub fn sys_sleep() -> u64 {
    let n = arg_u32(0) as u64;

    let t = unsafe { &mut SYS_TICKS };
    t.lock.acquire();
    let ticks0 = t.ticks;
    while t.ticks - ticks0 < n {
        sleep(ticks_chan(), &t.lock);
    }
    t.lock.release();
    0
}
