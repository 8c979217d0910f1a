use alloc::{sync::Arc, vec::Vec};
use spin::Mutex;

use super::inode::Inode;
use super::journal::Transaction;
use super::vfs::{FileError, FileResult, InodeStore, Journal, OpenFlags, Pipe, Stat};
use super::writer::TxWriter;
use crate::kernel::devsw::DeviceRegistry;
use crate::kernel::FileConfig;

/// Index of a slot in the open-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    /// Names slot `idx`. The table checks the slot on every use.
    pub const fn fromIndex(idx: usize) -> Self {
        Self(idx)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// What an open file reads from and writes to.
pub enum FileKind {
    Pipe(Arc<dyn Pipe>),
    Inode {
        ip: Arc<Inode>,
        /// guarded by the inode lock as well; lock the inode first
        off: Mutex<u32>,
    },
    Device { ip: Arc<Inode>, major: i16 },
}

/// An open file. Holds one reference to its pipe end or inode, dropped
/// when the last table reference is closed.
pub struct OpenFile {
    kind: FileKind,
    flags: OpenFlags,
}

impl OpenFile {
    pub fn pipe(pipe: Arc<dyn Pipe>, flags: OpenFlags) -> Self {
        Self {
            kind: FileKind::Pipe(pipe),
            flags,
        }
    }

    pub fn inode(ip: Arc<Inode>, flags: OpenFlags) -> Self {
        Self {
            kind: FileKind::Inode {
                ip,
                off: Mutex::new(0),
            },
            flags,
        }
    }

    pub fn device(ip: Arc<Inode>, major: i16, flags: OpenFlags) -> Self {
        Self {
            kind: FileKind::Device { ip, major },
            flags,
        }
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn readable(&self) -> bool {
        self.flags.contains(OpenFlags::READ)
    }

    pub fn writable(&self) -> bool {
        self.flags.contains(OpenFlags::WRITE)
    }

    /// Cursor of an inode-backed file.
    pub fn offset(&self) -> Option<u32> {
        match &self.kind {
            FileKind::Inode { off, .. } => Some(*off.lock()),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Slot {
    refCount: u32,
    file: Option<Arc<OpenFile>>,
}

/// The system-wide open-file table.
///
/// One spin lock guards the slots' reference counts and contents. It is
/// never held across pipe, device or storage I/O: every operation copies
/// what it needs out of the slot and drops the lock first.
pub struct FileTable {
    slots: Mutex<Vec<Slot>>,
    config: FileConfig,
    devsw: &'static DeviceRegistry,
    inodes: Arc<dyn InodeStore>,
    log: Arc<dyn Journal>,
}

impl FileTable {
    pub fn new(
        config: FileConfig,
        devsw: &'static DeviceRegistry,
        inodes: Arc<dyn InodeStore>,
        log: Arc<dyn Journal>,
    ) -> FileResult<Self> {
        config.validate()?;
        if config.maxOpBlocks > log.maxOpBlocks() {
            log::error!(
                "file config: {} blocks per transaction, journal reserves {}",
                config.maxOpBlocks,
                log.maxOpBlocks()
            );
            return Err(FileError::InvalidConfig);
        }
        let mut slots = Vec::with_capacity(config.nfile);
        slots.resize_with(config.nfile, Slot::default);
        Ok(Self {
            slots: Mutex::new(slots),
            config,
            devsw,
            inodes,
            log,
        })
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.nfile
    }

    /// Number of referenced slots.
    pub fn inUse(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.refCount > 0).count()
    }

    pub(crate) fn inodes(&self) -> &dyn InodeStore {
        &*self.inodes
    }

    pub(crate) fn journal(&self) -> &dyn Journal {
        &*self.log
    }

    /// Reserves a free slot with one reference. The caller fills it with
    /// `install`.
    pub fn allocate(&self) -> FileResult<FileHandle> {
        let mut slots = self.slots.lock();
        let Some(idx) = slots.iter().position(|s| s.refCount == 0) else {
            log::warn!("filealloc: all {} slots in use", slots.len());
            return Err(FileError::ExhaustedTable);
        };
        slots[idx].refCount = 1;
        Ok(FileHandle(idx))
    }

    /// Populates a slot reserved by `allocate`.
    pub fn install(&self, handle: FileHandle, file: OpenFile) -> FileResult<()> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(handle.0).ok_or(FileError::BadDescriptor)?;
        if slot.refCount < 1 || slot.file.is_some() {
            log::error!("fileinstall: slot {} not freshly allocated", handle.0);
            return Err(FileError::InvalidReferenceState);
        }
        slot.file = Some(Arc::new(file));
        Ok(())
    }

    /// Allocates a slot and installs `file` in it.
    pub fn open(&self, file: OpenFile) -> FileResult<FileHandle> {
        let mut slots = self.slots.lock();
        let Some(idx) = slots.iter().position(|s| s.refCount == 0) else {
            log::warn!("filealloc: all {} slots in use", slots.len());
            return Err(FileError::ExhaustedTable);
        };
        slots[idx] = Slot {
            refCount: 1,
            file: Some(Arc::new(file)),
        };
        Ok(FileHandle(idx))
    }

    /// Opens both ends of `pipe`: a read-only slot and a write-only slot.
    pub fn openPipe(&self, pipe: Arc<dyn Pipe>) -> FileResult<(FileHandle, FileHandle)> {
        let reader = self.open(OpenFile::pipe(Arc::clone(&pipe), OpenFlags::READ))?;
        match self.open(OpenFile::pipe(pipe, OpenFlags::WRITE)) {
            Ok(writer) => Ok((reader, writer)),
            Err(e) => {
                self.close(reader)?;
                Err(e)
            }
        }
    }

    /// Increments the reference count of `handle`.
    ///
    /// Panics if the slot is not referenced: the caller is using a file it
    /// already closed.
    pub fn duplicate(&self, handle: FileHandle) -> FileResult<FileHandle> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(handle.0).ok_or(FileError::BadDescriptor)?;
        if slot.refCount < 1 {
            panic!("filedup: slot {} not referenced", handle.0);
        }
        slot.refCount += 1;
        Ok(handle)
    }

    /// Drops one reference; the last one frees the slot and releases the
    /// pipe end or inode after the table lock is gone.
    ///
    /// Panics if the slot is not referenced.
    pub fn close(&self, handle: FileHandle) -> FileResult<()> {
        let file = {
            let mut slots = self.slots.lock();
            let slot = slots.get_mut(handle.0).ok_or(FileError::BadDescriptor)?;
            if slot.refCount < 1 {
                panic!("fileclose: slot {} not referenced", handle.0);
            }
            slot.refCount -= 1;
            if slot.refCount > 0 {
                return Ok(());
            }
            slot.file.take()
        };

        if let Some(file) = file {
            self.teardown(&file);
        }
        Ok(())
    }

    fn teardown(&self, file: &OpenFile) {
        match &file.kind {
            FileKind::Pipe(pipe) => pipe.close(file.writable()),
            FileKind::Inode { ip, .. } | FileKind::Device { ip, .. } => {
                let _tx = Transaction::begin(&*self.log);
                self.inodes.iput(Arc::clone(ip));
            }
        }
    }

    /// The file installed at `handle`; a free or unfilled slot has none.
    pub fn get(&self, handle: FileHandle) -> FileResult<Arc<OpenFile>> {
        let slots = self.slots.lock();
        let slot = slots.get(handle.0).ok_or(FileError::BadDescriptor)?;
        match &slot.file {
            Some(file) if slot.refCount > 0 => Ok(Arc::clone(file)),
            _ => Err(FileError::UnsupportedOperation),
        }
    }

    /// Reference count of `handle`'s slot.
    pub fn refs(&self, handle: FileHandle) -> u32 {
        self.slots.lock().get(handle.0).map_or(0, |s| s.refCount)
    }

    /// Metadata of an inode or device file.
    pub fn stat(&self, handle: FileHandle) -> FileResult<Stat> {
        let file = self.get(handle)?;
        match &file.kind {
            FileKind::Inode { ip, .. } | FileKind::Device { ip, .. } => {
                let inode = ip.lock(&*self.inodes);
                inode.ensureValid()?;
                Ok(inode.stat())
            }
            FileKind::Pipe(_) => Err(FileError::UnsupportedOperation),
        }
    }

    /// Reads up to `dst.len()` bytes. 0 means end of file or a closed pipe.
    pub fn read(&self, handle: FileHandle, dst: &mut [u8]) -> FileResult<usize> {
        let file = self.get(handle)?;
        if !file.readable() {
            return Err(FileError::NotReadable);
        }

        match &file.kind {
            FileKind::Pipe(pipe) => pipe.read(dst),
            FileKind::Device { major, .. } => {
                let read = self.devsw.reader(*major)?;
                read(dst)
            }
            FileKind::Inode { ip, off } => {
                let mut inode = ip.lock(&*self.inodes);
                inode.ensureValid()?;
                let mut off = off.lock();
                let n = inode.read(*off, dst);
                *off += n as u32;
                Ok(n)
            }
        }
    }

    /// Writes all of `src`. Inode writes are split into transactions.
    pub fn write(&self, handle: FileHandle, src: &[u8]) -> FileResult<usize> {
        let file = self.get(handle)?;
        if !file.writable() {
            return Err(FileError::NotWritable);
        }

        match &file.kind {
            FileKind::Pipe(pipe) => pipe.write(src),
            FileKind::Device { major, .. } => {
                let write = self.devsw.writer(*major)?;
                write(src)
            }
            FileKind::Inode { ip, off } => {
                TxWriter::new(&*self.log, &*self.inodes, self.config.maxChunk()).write(ip, off, src)
            }
        }
    }
}
