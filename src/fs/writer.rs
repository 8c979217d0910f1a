use alloc::sync::Arc;
use core::cmp::min;
use spin::Mutex;

use super::inode::Inode;
use super::journal::Transaction;
use super::vfs::{FileError, FileResult, InodeStore, Journal};

/// Writes to an inode in pieces small enough for one log transaction each.
///
/// A chunk carries at most `maxChunk` bytes, which leaves room in the
/// transaction for the inode block, an indirect block and two blocks of
/// slack for writes that don't start on a block boundary.
pub struct TxWriter<'a> {
    log: &'a dyn Journal,
    inodes: &'a dyn InodeStore,
    maxChunk: usize,
}

impl<'a> TxWriter<'a> {
    pub fn new(log: &'a dyn Journal, inodes: &'a dyn InodeStore, maxChunk: usize) -> Self {
        Self {
            log,
            inodes,
            maxChunk,
        }
    }

    /// Writes `src` at `*off`, advancing the offset by what was written.
    ///
    /// Chunks committed before a short one stay on disk and `off` reflects
    /// them; the error carries the total written.
    pub fn write(&self, ip: &Arc<Inode>, off: &Mutex<u32>, src: &[u8]) -> FileResult<usize> {
        if self.maxChunk == 0 {
            return Err(FileError::InvalidConfig);
        }

        let mut written = 0;
        while written < src.len() {
            let n = min(src.len() - written, self.maxChunk);
            let r = {
                let _tx = Transaction::begin(self.log);
                let mut inode = ip.lock(self.inodes);
                inode.ensureValid()?;
                let mut off = off.lock();
                let r = inode.write(*off, &src[written..written + n]);
                *off += r as u32;
                r
            };
            written += r;

            if r != n {
                log::warn!(
                    "filewrite: inode {} short chunk ({} of {} bytes), {} written",
                    ip.inum(),
                    r,
                    n,
                    written
                );
                return Err(FileError::PartialWrite { written });
            }
        }
        Ok(written)
    }
}
