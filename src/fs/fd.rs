use super::file::FileHandle;
use crate::param::NOFILE;

/// A process's descriptor table: maps small integers to open-file handles.
pub trait Descriptors {
    fn lookup(&self, fd: i32) -> Option<FileHandle>;
}

impl Descriptors for [Option<FileHandle>] {
    fn lookup(&self, fd: i32) -> Option<FileHandle> {
        let idx = usize::try_from(fd).ok()?;
        self.get(idx).copied().flatten()
    }
}

impl<const N: usize> Descriptors for [Option<FileHandle>; N] {
    fn lookup(&self, fd: i32) -> Option<FileHandle> {
        self.as_slice().lookup(fd)
    }
}

/// Fixed-size per-process descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdTable {
    ofile: [Option<FileHandle>; NOFILE],
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            ofile: [None; NOFILE],
        }
    }

    /// Places `handle` in the lowest free descriptor.
    pub fn fdalloc(&mut self, handle: FileHandle) -> Option<i32> {
        let fd = self.ofile.iter().position(Option::is_none)?;
        self.ofile[fd] = Some(handle);
        Some(fd as i32)
    }

    /// Empties descriptor `fd` and returns what it held.
    pub fn take(&mut self, fd: i32) -> Option<FileHandle> {
        let idx = usize::try_from(fd).ok()?;
        self.ofile.get_mut(idx)?.take()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptors for FdTable {
    fn lookup(&self, fd: i32) -> Option<FileHandle> {
        self.ofile.lookup(fd)
    }
}
