//
// driver for qemu's virtio disk device.
// uses qemu's mmio interface to virtio.
// one request is in flight per buffer; the issuing process sleeps on
// the buffer until the completion interrupt wakes it.
//
// qemu ... -drive file=fs.img,if=none,format=raw,id=x0 -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//

use core::ptr;

use crate::buf::Buf;
use crate::fs::BSIZE;
use crate::pmem::pmem_alloc;
use crate::proc::{sleep, wakeup};
use crate::riscv::__sync_synchronize;
use crate::spinlock::Spinlock;
use crate::virtio::*;

// the address of virtio mmio register r.
macro_rules! Reg {
    ( $r:expr ) => {
        ($crate::memlayout::VIRTIO0 + $r) as *mut u32
    };
}

macro_rules! ReadReg {
    ( $r:expr ) => {
        unsafe { (Reg!($r) as *const u32).read_volatile() }
    };
}

macro_rules! WriteReg {
    ( $r:expr, $val:expr ) => {
        unsafe { Reg!($r).write_volatile($val as u32) }
    };
}

#[derive(Copy, Clone)]
struct Info {
    b: *mut Buf,
    status: u8,
}

struct Disk {
    // a set (not a ring) of DMA descriptors, with which the
    // driver tells the device where to read and write individual
    // disk operations. there are NUM descriptors.
    // most commands consist of a "chain" (a linked list) of a couple of
    // these descriptors.
    desc: *mut VirtqDesc,

    // a ring in which the driver writes descriptor numbers
    // that the driver would like the device to process.  it only
    // includes the head descriptor of each chain. the ring has
    // NUM elements.
    avail: *mut VirtqAvail,

    // a ring in which the device writes descriptor numbers that
    // the device has finished processing (just the head of each chain).
    // there are NUM used ring entries.
    used: *mut VirtqUsed,

    // our own book-keeping.
    free: [bool; NUM], // is a descriptor free?
    used_idx: u16,     // we've looked this far in used[2..NUM].

    // track info about in-flight operations,
    // for use when the completion interrupt arrives.
    // indexed by first descriptor index of chain.
    info: [Info; NUM],

    // disk command headers.
    // one-for-one with descriptors, for convenience.
    ops: [VirtioBlkReq; NUM],

    vdisk_lock: Spinlock,
}

static mut DISK: Disk = Disk {
    desc: ptr::null_mut(),
    avail: ptr::null_mut(),
    used: ptr::null_mut(),
    free: [false; NUM],
    used_idx: 0,
    info: [Info {
        b: ptr::null_mut(),
        status: 0,
    }; NUM],
    ops: [VirtioBlkReq {
        desc_type: 0,
        reserved: 0,
        sector: 0,
    }; NUM],
    vdisk_lock: Spinlock::new("virtio_disk"),
};

pub fn virtio_disk_init() {
    if ReadReg!(VIRTIO_MMIO_MAGIC_VALUE) != 0x74726976
        || ReadReg!(VIRTIO_MMIO_VERSION) != 2
        || ReadReg!(VIRTIO_MMIO_DEVICE_ID) != 2
        || ReadReg!(VIRTIO_MMIO_VENDOR_ID) != 0x554d4551
    {
        panic!("could not find virtio disk");
    }

    let mut status: u32 = 0;

    // reset device
    WriteReg!(VIRTIO_MMIO_STATUS, status);

    // set ACKNOWLEDGE status bit
    status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
    WriteReg!(VIRTIO_MMIO_STATUS, status);

    // set DRIVER status bit
    status |= VIRTIO_CONFIG_S_DRIVER;
    WriteReg!(VIRTIO_MMIO_STATUS, status);

    // negotiate features
    let mut features = ReadReg!(VIRTIO_MMIO_DEVICE_FEATURES);
    features &= !(1 << VIRTIO_BLK_F_RO);
    features &= !(1 << VIRTIO_BLK_F_SCSI);
    features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
    features &= !(1 << VIRTIO_BLK_F_MQ);
    features &= !(1 << VIRTIO_F_ANY_LAYOUT);
    features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
    features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
    WriteReg!(VIRTIO_MMIO_DRIVER_FEATURES, features);

    // tell device that feature negotiation is complete.
    status |= VIRTIO_CONFIG_S_FEATURES_OK;
    WriteReg!(VIRTIO_MMIO_STATUS, status);

    // re-read status to ensure FEATURES_OK is set.
    status = ReadReg!(VIRTIO_MMIO_STATUS);
    if status & VIRTIO_CONFIG_S_FEATURES_OK == 0 {
        panic!("virtio disk FEATURES_OK unset");
    }

    // initialize queue 0.
    WriteReg!(VIRTIO_MMIO_QUEUE_SEL, 0);

    // ensure queue 0 is not in use.
    if ReadReg!(VIRTIO_MMIO_QUEUE_READY) != 0 {
        panic!("virtio disk should not be ready");
    }

    // check maximum queue size.
    let max = ReadReg!(VIRTIO_MMIO_QUEUE_NUM_MAX);
    if max == 0 {
        panic!("virtio disk has no queue 0");
    }
    if (max as usize) < NUM {
        panic!("virtio disk max queue too short");
    }

    // allocate and zero queue memory.
    let disk = unsafe { &mut DISK };
    disk.desc = pmem_alloc(true) as *mut VirtqDesc;
    disk.avail = pmem_alloc(true) as *mut VirtqAvail;
    disk.used = pmem_alloc(true) as *mut VirtqUsed;

    // set queue size.
    WriteReg!(VIRTIO_MMIO_QUEUE_NUM, NUM);

    // write physical addresses.
    WriteReg!(VIRTIO_MMIO_QUEUE_DESC_LOW, disk.desc as usize);
    WriteReg!(VIRTIO_MMIO_QUEUE_DESC_HIGH, (disk.desc as usize) >> 32);
    WriteReg!(VIRTIO_MMIO_DRIVER_DESC_LOW, disk.avail as usize);
    WriteReg!(VIRTIO_MMIO_DRIVER_DESC_HIGH, (disk.avail as usize) >> 32);
    WriteReg!(VIRTIO_MMIO_DEVICE_DESC_LOW, disk.used as usize);
    WriteReg!(VIRTIO_MMIO_DEVICE_DESC_HIGH, (disk.used as usize) >> 32);

    // queue is ready.
    WriteReg!(VIRTIO_MMIO_QUEUE_READY, 1);

    // all NUM descriptors start out unused.
    for i in 0..NUM {
        disk.free[i] = true;
    }

    // tell device we're completely ready.
    status |= VIRTIO_CONFIG_S_DRIVER_OK;
    WriteReg!(VIRTIO_MMIO_STATUS, status);

    // plic.rs and trap.rs arrange for interrupts from VIRTIO0_IRQ.
}

// find a free descriptor, mark it non-free, return its index.
fn alloc_desc(disk: &mut Disk) -> Option<usize> {
    for i in 0..NUM {
        if disk.free[i] {
            disk.free[i] = false;
            return Some(i);
        }
    }
    None
}

// mark a descriptor as free.
fn free_desc(disk: &mut Disk, i: usize) {
    if i >= NUM {
        panic!("free_desc: bad index");
    }
    if disk.free[i] {
        panic!("free_desc: already free");
    }
    unsafe {
        *disk.desc.add(i) = VirtqDesc {
            addr: 0,
            len: 0,
            flags: 0,
            next: 0,
        };
    }
    disk.free[i] = true;
    wakeup(unsafe { &DISK.free } as *const _ as usize);
}

// free a chain of descriptors.
fn free_chain(disk: &mut Disk, mut i: usize) {
    loop {
        let desc = unsafe { *disk.desc.add(i) };
        free_desc(disk, i);
        if desc.flags & VRING_DESC_F_NEXT != 0 {
            i = desc.next as usize;
        } else {
            break;
        }
    }
}

// allocate three descriptors (they need not be contiguous).
// disk transfers always use three descriptors.
fn alloc3_desc(disk: &mut Disk, idx: &mut [usize; 3]) -> bool {
    for i in 0..3 {
        match alloc_desc(disk) {
            Some(d) => idx[i] = d,
            None => {
                for j in 0..i {
                    free_desc(disk, idx[j]);
                }
                return false;
            }
        }
    }
    true
}

pub fn virtio_disk_rw(b: &mut Buf, write: bool) {
    let sector = b.blockno as u64 * (BSIZE / 512) as u64;

    let disk = unsafe { &mut DISK };
    disk.vdisk_lock.acquire();

    // the spec's Section 5.2 says that legacy block operations use
    // three descriptors: one for type/reserved/sector, one for the
    // data, one for a 1-byte status result.

    // allocate the three descriptors.
    let mut idx = [0usize; 3];
    while !alloc3_desc(disk, &mut idx) {
        sleep(
            unsafe { &DISK.free } as *const _ as usize,
            &disk.vdisk_lock,
        );
    }

    // format the three descriptors.
    let req = &mut disk.ops[idx[0]];
    req.desc_type = if write {
        VIRTIO_BLK_T_OUT // write the disk
    } else {
        VIRTIO_BLK_T_IN // read the disk
    };
    req.reserved = 0;
    req.sector = sector;

    unsafe {
        *disk.desc.add(idx[0]) = VirtqDesc {
            addr: req as *const VirtioBlkReq as u64,
            len: core::mem::size_of::<VirtioBlkReq>() as u32,
            flags: VRING_DESC_F_NEXT,
            next: idx[1] as u16,
        };

        *disk.desc.add(idx[1]) = VirtqDesc {
            addr: b.data.as_mut_ptr() as u64,
            len: BSIZE as u32,
            flags: if write { 0 } else { VRING_DESC_F_WRITE } | VRING_DESC_F_NEXT,
            next: idx[2] as u16,
        };

        disk.info[idx[0]].status = 0xff; // device writes 0 on success
        *disk.desc.add(idx[2]) = VirtqDesc {
            addr: &disk.info[idx[0]].status as *const u8 as u64,
            len: 1,
            flags: VRING_DESC_F_WRITE,
            next: 0,
        };
    }

    // record struct buf for virtio_disk_intr().
    b.disk = true;
    disk.info[idx[0]].b = b;

    // tell the device the first index in our chain of descriptors.
    unsafe {
        let avail = &mut *disk.avail;
        avail.ring[avail.idx as usize % NUM] = idx[0] as u16;

        __sync_synchronize();

        // tell the device another avail ring entry is available.
        avail.idx = avail.idx.wrapping_add(1);
    }

    __sync_synchronize();

    WriteReg!(VIRTIO_MMIO_QUEUE_NOTIFY, 0); // value is queue number

    // Wait for virtio_disk_intr() to say the request has finished.
    while b.disk {
        sleep(b as *const Buf as usize, &disk.vdisk_lock);
    }

    disk.info[idx[0]].b = ptr::null_mut();
    free_chain(disk, idx[0]);

    disk.vdisk_lock.release();
}

pub fn virtio_disk_intr() {
    let disk = unsafe { &mut DISK };
    disk.vdisk_lock.acquire();

    // the device won't raise another interrupt until we tell it
    // we've seen this one, which the following line does.
    WriteReg!(
        VIRTIO_MMIO_INTERRUPT_ACK,
        ReadReg!(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3
    );

    __sync_synchronize();

    // the device increments used.idx when it adds an entry to the
    // used ring.
    let used = unsafe { &mut *disk.used };
    while disk.used_idx != used.idx {
        __sync_synchronize();
        let id = used.ring[disk.used_idx as usize % NUM].id as usize;

        if disk.info[id].status != 0 {
            panic!("virtio_disk_intr status");
        }

        let b = disk.info[id].b;
        unsafe {
            (*b).disk = false; // disk is done with buf
        }
        wakeup(b as usize);

        disk.used_idx = disk.used_idx.wrapping_add(1);
    }

    disk.vdisk_lock.release();
}
