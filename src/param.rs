pub const NCPU: usize = 4; // maximum number of CPUs
pub const NPROC: usize = 32; // maximum number of processes
pub const NBUF: usize = 64; // size of disk block cache
pub const NMMAP: usize = 256; // size of the mmap interval-node pool
pub const KERN_PAGES: usize = 1024; // frames reserved for the kernel pool
pub const ROOTDEV: u32 = 1; // device number of file system root disk
pub const TIMER_INTERVAL: u64 = 1000000; // timer tick, in cycles; ~1/10th second in qemu
pub const MAXARG: usize = 128; // max bytes fetched for a user string argument
