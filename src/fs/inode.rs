use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, MutexGuard};

use super::vfs::{FileError, FileResult, InodeStore, InodeType, Stat};
use crate::param::NDIRECT;

/// In-memory copy of an inode's metadata. Only meaningful while `valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeMeta {
    /// has the inode been read from disk?
    pub valid: bool,
    /// contents have been through the XOR toggle
    pub encrypted: bool,
    pub fileType: InodeType,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
    pub addrs: [u32; NDIRECT + 1],
}

impl InodeMeta {
    pub const fn empty() -> Self {
        Self {
            valid: false,
            encrypted: false,
            fileType: InodeType::Free,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        }
    }
}

/// A cached inode shared by every open file and directory that refers to it.
///
/// `dev`, `inum` and the reference count are managed by the storage layer;
/// everything in `InodeMeta` is guarded by the inode lock.
#[derive(Debug)]
pub struct Inode {
    dev: u32,
    inum: u32,
    refCount: AtomicU32,
    meta: Mutex<InodeMeta>,
}

impl Inode {
    /// A fresh, unloaded inode holding one reference.
    pub fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            refCount: AtomicU32::new(1),
            meta: Mutex::new(InodeMeta::empty()),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    pub fn refs(&self) -> u32 {
        self.refCount.load(Ordering::Acquire)
    }

    /// Takes another reference.
    pub fn idup(self: &Arc<Self>) -> Arc<Self> {
        self.refCount.fetch_add(1, Ordering::AcqRel);
        Arc::clone(self)
    }

    /// Drops one reference and returns how many remain. Storage layer only.
    pub fn releaseRef(&self) -> u32 {
        let prev = self.refCount.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("iput: inode {} has no references", self.inum);
        }
        prev - 1
    }

    /// Locks the inode, reading its metadata from `store` if it isn't valid yet.
    pub fn lock<'a>(&'a self, store: &'a dyn InodeStore) -> LockedInode<'a> {
        let mut meta = self.meta.lock();
        if !meta.valid {
            if let Err(e) = store.load(self, &mut meta) {
                log::error!("ilock: inode {}:{} failed to load: {}", self.dev, self.inum, e);
            }
        }
        LockedInode {
            ip: self,
            meta,
            store,
        }
    }
}

/// Holds an inode's lock. Unlocks on drop.
pub struct LockedInode<'a> {
    ip: &'a Inode,
    meta: MutexGuard<'a, InodeMeta>,
    store: &'a dyn InodeStore,
}

impl<'a> LockedInode<'a> {
    pub fn inode(&self) -> &Inode {
        self.ip
    }

    pub fn meta(&self) -> &InodeMeta {
        &self.meta
    }

    pub fn metaMut(&mut self) -> &mut InodeMeta {
        &mut self.meta
    }

    pub fn ensureValid(&self) -> FileResult<()> {
        if self.meta.valid {
            Ok(())
        } else {
            Err(FileError::InodeNotLoaded)
        }
    }

    pub fn read(&mut self, off: u32, dst: &mut [u8]) -> usize {
        self.store.readi(self.ip, &self.meta, off, dst)
    }

    pub fn write(&mut self, off: u32, src: &[u8]) -> usize {
        self.store.writei(self.ip, &mut self.meta, off, src)
    }

    /// Persists the metadata. Call after every change to an on-disk field.
    pub fn update(&self) {
        self.store.iupdate(self.ip, &self.meta);
    }

    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.ip.dev,
            ino: self.ip.inum,
            fileType: self.meta.fileType,
            nlink: self.meta.nlink,
            size: self.meta.size as u64,
            encrypted: self.meta.encrypted,
        }
    }
}
