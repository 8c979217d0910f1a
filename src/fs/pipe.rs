use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_queue::ArrayQueue;

use super::vfs::{FileError, FileResult, Pipe};

pub const PIPESIZE: usize = 512;

/// Bounded in-memory pipe.
pub struct RamPipe {
    data: ArrayQueue<u8>,
    /// read fd is still open
    readOpen: AtomicBool,
    /// write fd is still open
    writeOpen: AtomicBool,
}

impl RamPipe {
    pub fn new() -> Arc<Self> {
        Self::withCapacity(PIPESIZE)
    }

    pub fn withCapacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            data: ArrayQueue::new(capacity),
            readOpen: AtomicBool::new(true),
            writeOpen: AtomicBool::new(true),
        })
    }
}

impl Pipe for RamPipe {
    fn read(&self, dst: &mut [u8]) -> FileResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        // pipe empty: wait for a writer or for the write end to go away
        while self.data.is_empty() && self.writeOpen.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }

        let mut n = 0;
        while n < dst.len() {
            match self.data.pop() {
                Some(byte) => {
                    dst[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&self, src: &[u8]) -> FileResult<usize> {
        let mut i = 0;
        while i < src.len() {
            if !self.readOpen.load(Ordering::Acquire) {
                log::warn!("pipe write with read end closed after {} bytes", i);
                return Err(FileError::BrokenPipe);
            }
            match self.data.push(src[i]) {
                Ok(()) => i += 1,
                Err(_) => core::hint::spin_loop(),
            }
        }
        Ok(i)
    }

    fn close(&self, writable: bool) {
        if writable {
            self.writeOpen.store(false, Ordering::Release);
        } else {
            self.readOpen.store(false, Ordering::Release);
        }
    }
}
