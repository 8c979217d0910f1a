/// open files per system
pub const NFILE: usize = 100;
/// open files per process
pub const NOFILE: usize = 16;
/// maximum major device number
pub const NDEV: usize = 10;
/// max # of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// max data blocks in on-disk log
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;
/// block size
pub const BSIZE: usize = 1024;

pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>();
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// Blocks every inode write reserves in its transaction besides data:
/// the inode block, the indirect block and two blocks of slop for
/// writes that don't start or end on a block boundary.
pub const WRITE_OVERHEAD_BLOCKS: usize = 1 + 1 + 2;

/// console major number
pub const CONSOLE: usize = 1;
