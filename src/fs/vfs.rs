use alloc::sync::Arc;
use core::fmt;

use super::inode::{Inode, InodeMeta};

/// Errors that can occur during open-file operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// No free slot in the open-file table
    ExhaustedTable,
    /// duplicate/close on a slot nobody references; a use-after-close in the caller
    InvalidReferenceState,
    /// Descriptor is not open in the caller's descriptor table
    BadDescriptor,
    NotReadable,
    NotWritable,
    /// Operation not defined for this kind of open file
    UnsupportedOperation,
    /// Major number out of range or no entry point registered
    UnregisteredDevice,
    /// A device driver reported a failure
    DeviceIo,
    /// Write to a pipe whose read end is closed
    BrokenPipe,
    /// Inode metadata could not be loaded from storage
    InodeNotLoaded,
    AlreadyEncrypted,
    NotEncrypted,
    /// File is larger than the encryption buffer bound
    FileTooLarge,
    /// Encryption read or write moved fewer bytes than the file size
    ShortIO,
    /// An inode write stopped early; `written` bytes were committed
    PartialWrite { written: usize },
    /// Transaction budget can't move a single block
    InvalidConfig,
}

pub type FileResult<T> = Result<T, FileError>;

impl FileError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FileError::ExhaustedTable => "file table exhausted",
            FileError::InvalidReferenceState => "file not referenced",
            FileError::BadDescriptor => "bad file descriptor",
            FileError::NotReadable => "file not open for reading",
            FileError::NotWritable => "file not open for writing",
            FileError::UnsupportedOperation => "operation not supported on this file",
            FileError::UnregisteredDevice => "no such device",
            FileError::DeviceIo => "device i/o error",
            FileError::BrokenPipe => "broken pipe",
            FileError::InodeNotLoaded => "inode not loaded",
            FileError::AlreadyEncrypted => "file already encrypted",
            FileError::NotEncrypted => "file not encrypted",
            FileError::FileTooLarge => "file too large",
            FileError::ShortIO => "short read or write",
            FileError::PartialWrite { .. } => "partial write",
            FileError::InvalidConfig => "invalid file table configuration",
        }
    }

    /// Linux-style negative error number.
    pub const fn code(&self) -> i32 {
        match self {
            FileError::ExhaustedTable => -23, // ENFILE
            FileError::InvalidReferenceState
            | FileError::BadDescriptor
            | FileError::NotReadable
            | FileError::NotWritable => -9, // EBADF
            FileError::UnsupportedOperation
            | FileError::NotEncrypted
            | FileError::InvalidConfig => -22, // EINVAL
            FileError::UnregisteredDevice => -19, // ENODEV
            FileError::DeviceIo
            | FileError::InodeNotLoaded
            | FileError::ShortIO
            | FileError::PartialWrite { .. } => -5, // EIO
            FileError::BrokenPipe => -32,        // EPIPE
            FileError::AlreadyEncrypted => -114, // EALREADY
            FileError::FileTooLarge => -27,      // EFBIG
        }
    }

    /// System calls report every failure as -1.
    pub const fn errno(&self) -> i64 {
        -1
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::PartialWrite { written } => {
                write!(f, "{} ({} bytes committed)", self.as_str(), written)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// On-disk inode types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum InodeType {
    Free = 0,
    Directory = 1,
    File = 2,
    Device = 3,
}

/// File metadata as reported by `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// File system's disk device
    pub dev: u32,
    pub ino: u32,
    pub fileType: InodeType,
    pub nlink: i16,
    /// Size of file in bytes
    pub size: u64,
    pub encrypted: bool,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ  = 0b0000_0001;
        const WRITE = 0b0000_0010;
    }
}

impl OpenFlags {
    /// Maps an xv6 open mode (O_RDONLY / O_WRONLY / O_RDWR) to access flags.
    pub fn fromOmode(omode: i32) -> OpenFlags {
        const O_WRONLY: i32 = 0x001;
        const O_RDWR: i32 = 0x002;

        let mut flags = OpenFlags::empty();
        flags.set(OpenFlags::READ, omode & O_WRONLY == 0);
        flags.set(OpenFlags::WRITE, omode & (O_WRONLY | O_RDWR) != 0);
        flags
    }
}

/// A pipe endpoint pair, owned by the pipe layer.
pub trait Pipe: Send + Sync {
    /// Blocks until data is available or the write end is closed.
    /// Returns 0 only once the writer has gone away.
    fn read(&self, dst: &mut [u8]) -> FileResult<usize>;
    /// Blocks until every byte is buffered or the read end is closed.
    fn write(&self, src: &[u8]) -> FileResult<usize>;
    fn close(&self, writable: bool);
}

/// Inode storage consumed by the file layer.
///
/// Every method except `iput` is called with the inode's lock held and
/// receives the locked metadata.
pub trait InodeStore: Send + Sync {
    /// Reads metadata from storage into `meta` and marks it valid.
    fn load(&self, ip: &Inode, meta: &mut InodeMeta) -> FileResult<()>;
    /// Copies up to `dst.len()` bytes starting at `off`; returns the count.
    fn readi(&self, ip: &Inode, meta: &InodeMeta, off: u32, dst: &mut [u8]) -> usize;
    /// Writes `src` at `off`, growing the file as needed; returns the count.
    fn writei(&self, ip: &Inode, meta: &mut InodeMeta, off: u32, src: &[u8]) -> usize;
    /// Persists `meta` to storage.
    fn iupdate(&self, ip: &Inode, meta: &InodeMeta);
    /// Drops a reference. Must be called inside a transaction.
    fn iput(&self, ip: Arc<Inode>);
}

/// Write-ahead log transaction bracket.
pub trait Journal: Send + Sync {
    /// May block while the log is short on space.
    fn beginOp(&self);
    fn endOp(&self);
    /// Blocks one operation may log.
    fn maxOpBlocks(&self) -> usize;
}
