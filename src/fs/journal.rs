use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::vfs::Journal;
use crate::param::{LOGSIZE, MAXOPBLOCKS};

/// One file-system operation's transaction. Ends the operation on drop.
pub struct Transaction<'a> {
    log: &'a dyn Journal,
}

impl<'a> Transaction<'a> {
    pub fn begin(log: &'a dyn Journal) -> Self {
        log.beginOp();
        Self { log }
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        self.log.endOp();
    }
}

struct LogState {
    /// how many operations are executing
    outstanding: usize,
    /// distinct blocks written by the current batch
    blocks: Vec<u32>,
}

/// In-memory group-commit log.
///
/// Admits a new operation only while every outstanding one could still
/// write `maxOpBlocks` blocks without overflowing the log, and commits the
/// batch when the last outstanding operation ends.
pub struct MemLog {
    state: Mutex<LogState>,
    logSize: usize,
    maxOpBlocks: usize,
    ops: AtomicUsize,
    commits: AtomicUsize,
    peakBlocks: AtomicUsize,
}

impl MemLog {
    pub fn new() -> Self {
        Self::withSize(LOGSIZE, MAXOPBLOCKS)
    }

    pub fn withSize(logSize: usize, maxOpBlocks: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                outstanding: 0,
                blocks: Vec::new(),
            }),
            logSize,
            maxOpBlocks,
            ops: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            peakBlocks: AtomicUsize::new(0),
        }
    }

    /// Records that `blockno` was modified by the running batch.
    /// Repeated writes to one block are absorbed.
    pub fn logWrite(&self, blockno: u32) {
        let mut state = self.state.lock();
        if state.outstanding < 1 {
            panic!("log_write outside of trans");
        }
        if state.blocks.contains(&blockno) {
            return;
        }
        if state.blocks.len() >= self.logSize - 1 {
            panic!("too big a transaction");
        }
        state.blocks.push(blockno);
    }

    /// Operations begun so far.
    pub fn operations(&self) -> usize {
        self.ops.load(Ordering::Acquire)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Acquire)
    }

    /// Largest number of distinct blocks any committed batch wrote.
    pub fn peakBatchBlocks(&self) -> usize {
        self.peakBlocks.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal for MemLog {
    fn beginOp(&self) {
        loop {
            let mut state = self.state.lock();
            if state.blocks.len() + (state.outstanding + 1) * self.maxOpBlocks > self.logSize {
                // this op might exhaust log space; wait for commit.
                drop(state);
                core::hint::spin_loop();
                continue;
            }
            state.outstanding += 1;
            self.ops.fetch_add(1, Ordering::AcqRel);
            return;
        }
    }

    fn endOp(&self) {
        let mut state = self.state.lock();
        if state.outstanding == 0 {
            panic!("endOp without beginOp");
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            let written = state.blocks.len();
            self.peakBlocks.fetch_max(written, Ordering::AcqRel);
            state.blocks.clear();
            self.commits.fetch_add(1, Ordering::AcqRel);
            log::trace!("log: committed {} blocks", written);
        }
    }

    fn maxOpBlocks(&self) -> usize {
        self.maxOpBlocks
    }
}
