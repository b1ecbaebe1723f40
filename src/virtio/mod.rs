pub mod virtio_disk;

//
// virtio device definitions.
// for both the mmio interface, and virtio descriptors.
// only tested with qemu.
//
// the virtio spec:
// https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.pdf
//

// virtio mmio control registers, mapped starting at 0x10001000.
// from qemu virtio_mmio.h
pub(super) const VIRTIO_MMIO_MAGIC_VALUE: usize = 0x000; // 0x74726976
pub(super) const VIRTIO_MMIO_VERSION: usize = 0x004; // version; should be 2
pub(super) const VIRTIO_MMIO_DEVICE_ID: usize = 0x008; // device type; 1 is net, 2 is disk
pub(super) const VIRTIO_MMIO_VENDOR_ID: usize = 0x00c; // 0x554d4551
pub(super) const VIRTIO_MMIO_DEVICE_FEATURES: usize = 0x010;
pub(super) const VIRTIO_MMIO_DRIVER_FEATURES: usize = 0x020;
pub(super) const VIRTIO_MMIO_QUEUE_SEL: usize = 0x030; // select queue, write-only
pub(super) const VIRTIO_MMIO_QUEUE_NUM_MAX: usize = 0x034; // max size of current queue, read-only
pub(super) const VIRTIO_MMIO_QUEUE_NUM: usize = 0x038; // size of current queue, write-only
pub(super) const VIRTIO_MMIO_QUEUE_READY: usize = 0x044; // ready bit
pub(super) const VIRTIO_MMIO_QUEUE_NOTIFY: usize = 0x050; // write-only
pub(super) const VIRTIO_MMIO_INTERRUPT_STATUS: usize = 0x060; // read-only
pub(super) const VIRTIO_MMIO_INTERRUPT_ACK: usize = 0x064; // write-only
pub(super) const VIRTIO_MMIO_STATUS: usize = 0x070; // read/write
pub(super) const VIRTIO_MMIO_QUEUE_DESC_LOW: usize = 0x080; // descriptor table, write-only
pub(super) const VIRTIO_MMIO_QUEUE_DESC_HIGH: usize = 0x084;
pub(super) const VIRTIO_MMIO_DRIVER_DESC_LOW: usize = 0x090; // available ring, write-only
pub(super) const VIRTIO_MMIO_DRIVER_DESC_HIGH: usize = 0x094;
pub(super) const VIRTIO_MMIO_DEVICE_DESC_LOW: usize = 0x0a0; // used ring, write-only
pub(super) const VIRTIO_MMIO_DEVICE_DESC_HIGH: usize = 0x0a4;

// status register bits, from qemu virtio_config.h
pub(super) const VIRTIO_CONFIG_S_ACKNOWLEDGE: u32 = 1;
pub(super) const VIRTIO_CONFIG_S_DRIVER: u32 = 2;
pub(super) const VIRTIO_CONFIG_S_DRIVER_OK: u32 = 4;
pub(super) const VIRTIO_CONFIG_S_FEATURES_OK: u32 = 8;

// device feature bits
pub(super) const VIRTIO_BLK_F_RO: u32 = 5; /* Disk is read-only */
pub(super) const VIRTIO_BLK_F_SCSI: u32 = 7; /* Supports scsi command passthru */
pub(super) const VIRTIO_BLK_F_CONFIG_WCE: u32 = 11; /* Writeback mode available in config */
pub(super) const VIRTIO_BLK_F_MQ: u32 = 12; /* support more than one vq */
pub(super) const VIRTIO_F_ANY_LAYOUT: u32 = 27;
pub(super) const VIRTIO_RING_F_INDIRECT_DESC: u32 = 28;
pub(super) const VIRTIO_RING_F_EVENT_IDX: u32 = 29;

// this many virtio descriptors.
// must be a power of two.
pub(super) const NUM: usize = 8;

// a single descriptor, from the spec.
#[derive(Copy, Clone)]
#[repr(C)]
pub(super) struct VirtqDesc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}
pub(super) const VRING_DESC_F_NEXT: u16 = 1; // chained with another descriptor
pub(super) const VRING_DESC_F_WRITE: u16 = 2; // device writes (vs read)

// the (entire) avail ring, from the spec.
#[derive(Copy, Clone)]
#[repr(C)]
pub(super) struct VirtqAvail {
    pub flags: u16,       // always zero
    pub idx: u16,         // driver will write ring[idx] next
    pub ring: [u16; NUM], // descriptor numbers of chain heads
    pub unused: u16,
}

// one entry in the "used" ring, with which the
// device tells the driver about completed requests.
#[derive(Copy, Clone)]
#[repr(C)]
pub(super) struct VirtqUsedElem {
    pub id: u32, // index of start of completed descriptor chain
    pub len: u32,
}

#[derive(Copy, Clone)]
#[repr(C)]
pub(super) struct VirtqUsed {
    pub flags: u16, // always zero
    pub idx: u16,   // device increments when it adds a ring[] entry
    pub ring: [VirtqUsedElem; NUM],
}

// these are specific to virtio block devices, e.g. disks,
// described in Section 5.2 of the spec.

pub(super) const VIRTIO_BLK_T_IN: u32 = 0; // read the disk
pub(super) const VIRTIO_BLK_T_OUT: u32 = 1; // write the disk

// the format of the first descriptor in a disk request.
// to be followed by two more descriptors containing
// the block, and a one-byte status.
#[derive(Copy, Clone)]
#[repr(C)]
pub(super) struct VirtioBlkReq {
    pub desc_type: u32, // VIRTIO_BLK_T_IN or ..._OUT
    pub reserved: u32,
    pub sector: u64,
}
